use crate::infrastructure::clock::Clock;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// Eventually-consistent mirror of the local cache. Writes always carry the full value.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, InfraError>;

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError>;
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteEnvelope {
    value: Value,
    #[serde(default)]
    updated_at_ms: i64,
}

#[derive(Clone)]
pub struct ReqwestRemoteStore {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
    clock: Arc<dyn Clock>,
}

impl ReqwestRemoteStore {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid remote base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "remote base url cannot be a base".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Remote(format!("failed to build http client: {error}")))?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            clock,
        })
    }

    fn key_endpoint(&self, namespace: &str, key: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("remote base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push("kv");
            segments.push(namespace);
            segments.push(key);
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        if body.trim().is_empty() {
            InfraError::Remote(format!("remote store error: http {}", status.as_u16()))
        } else {
            InfraError::Remote(format!(
                "remote store error: http {}; body={body}",
                status.as_u16()
            ))
        }
    }

    fn transport_error(action: &str, error: reqwest::Error) -> InfraError {
        if error.is_timeout() {
            InfraError::Remote(format!("timeout while {action}: {error}"))
        } else if error.is_connect() {
            InfraError::RemoteUnavailable
        } else {
            InfraError::Remote(format!("network error while {action}: {error}"))
        }
    }
}

#[async_trait]
impl RemoteStore for ReqwestRemoteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, InfraError> {
        let url = self.key_endpoint(namespace, key)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|error| Self::transport_error("reading key", error))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|error| Self::transport_error("reading response body", error))?;
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let envelope: RemoteEnvelope = serde_json::from_str(&body).map_err(|error| {
            InfraError::Remote(format!("invalid remote payload: {error}; body={body}"))
        })?;
        Ok(Some(envelope.value))
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError> {
        let url = self.key_endpoint(namespace, key)?;
        let envelope = RemoteEnvelope {
            value: value.clone(),
            updated_at_ms: self.clock.now_ms(),
        };
        let response = self
            .authorize(self.client.put(url))
            .json(&envelope)
            .send()
            .await
            .map_err(|error| Self::transport_error("writing key", error))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::http_error(status, &body))
    }
}

/// Remote store kept in process memory, with an availability switch for offline tests.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    entries: Mutex<HashMap<(String, String), Value>>,
    available: AtomicBool,
    put_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            put_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }
}

impl InMemoryRemoteStore {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, namespace: &str, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    pub fn seed(&self, namespace: &str, key: &str, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((namespace.to_string(), key.to_string()), value);
        }
    }

    fn ensure_available(&self) -> Result<(), InfraError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InfraError::RemoteUnavailable)
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, InfraError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::Remote(format!("remote store lock poisoned: {error}")))?;
        Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> Result<(), InfraError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|error| InfraError::Remote(format!("remote store lock poisoned: {error}")))?;
        entries.insert((namespace.to_string(), key.to_string()), value.clone());
        Ok(())
    }
}
