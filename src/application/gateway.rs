//! Local-first, remote-eventually key/value gateway.
//!
//! Every write lands synchronously in the local cache, then a full-value copy is queued for
//! a background worker that pushes it to the remote store with bounded retries. Reads try
//! the remote first (bounded by a timeout) unless the device holds a newer unsynced value.
//! Unsynced state lives in the local cache, so a write the remote never acknowledged keeps
//! shadowing the remote copy after a restart and is queued again.

use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_cache::LocalCache;
use crate::infrastructure::remote_store::RemoteStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, sleep, timeout};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

enum RemoteCommand {
    Write {
        key: String,
        value: Value,
        generation: u64,
    },
    Flush(oneshot::Sender<()>),
}

/// Keys whose local value has not been acknowledged by the remote yet, with the latest
/// queued generation. Mirrors the local cache's unsynced flags for this process.
type DirtyKeys = Arc<Mutex<HashMap<String, u64>>>;

struct RemoteLink {
    store: Arc<dyn RemoteStore>,
    commands: mpsc::UnboundedSender<RemoteCommand>,
    dirty: DirtyKeys,
    next_generation: Mutex<u64>,
    read_timeout: Duration,
}

pub struct PersistenceGateway {
    namespace: String,
    local: Arc<dyn LocalCache>,
    remote: Option<RemoteLink>,
}

impl PersistenceGateway {
    pub fn local_only(namespace: impl Into<String>, local: Arc<dyn LocalCache>) -> Self {
        Self {
            namespace: namespace.into(),
            local,
            remote: None,
        }
    }

    /// Attaches a remote store and spawns its write worker. Must run inside a tokio runtime.
    ///
    /// Entries left unsynced by an earlier run are marked dirty and queued again.
    pub fn with_remote(
        namespace: impl Into<String>,
        local: Arc<dyn LocalCache>,
        store: Arc<dyn RemoteStore>,
        retry_policy: RetryPolicy,
        read_timeout: Duration,
    ) -> Self {
        let namespace = namespace.into();
        let (commands, receiver) = mpsc::unbounded_channel();
        let dirty: DirtyKeys = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(run_remote_worker(
            namespace.clone(),
            local.clone(),
            store.clone(),
            retry_policy,
            dirty.clone(),
            receiver,
        ));

        let remote = RemoteLink {
            store,
            commands,
            dirty,
            next_generation: Mutex::new(0),
            read_timeout,
        };
        let pending = local.unsynced_keys(&namespace).unwrap_or_else(|error| {
            log::warn!("listing unsynced keys failed: {error}");
            Vec::new()
        });
        for key in pending {
            match local.get(&namespace, &key) {
                Ok(Some(value)) => remote.enqueue(&key, value),
                Ok(None) => {}
                Err(error) => log::warn!("unsynced entry {key} is unreadable: {error}"),
            }
        }
        if !remote.is_idle() {
            log::info!("requeued unsynced keys: {:?}", remote.dirty_keys());
        }

        Self {
            namespace,
            local,
            remote: Some(remote),
        }
    }

    /// Remote value, else local value, else `fallback`. Never fails.
    pub async fn get(&self, key: &str, fallback: Value) -> Value {
        if let Some(remote) = self.remote.as_ref().filter(|remote| !remote.is_dirty(key)) {
            match timeout(remote.read_timeout, remote.store.get(&self.namespace, key)).await {
                Ok(Ok(Some(value))) if !value.is_null() => {
                    if let Err(error) = self.local.put_synced(&self.namespace, key, &value) {
                        log::warn!("failed to refresh local cache for {key}: {error}");
                    }
                    return value;
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => log::debug!("remote read of {key} failed: {error}"),
                Err(_) => log::debug!("remote read of {key} timed out"),
            }
        }
        self.get_local(key).unwrap_or(fallback)
    }

    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let value = self.get(key, Value::Null).await;
        decode(key, value).unwrap_or(fallback)
    }

    /// Local-cache read. Missing, null or unreadable entries are `None`.
    pub fn get_local(&self, key: &str) -> Option<Value> {
        match self.local.get(&self.namespace, key) {
            Ok(value) => value.filter(|value| !value.is_null()),
            Err(error) => {
                log::warn!("local read of {key} failed: {error}");
                None
            }
        }
    }

    pub fn get_local_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_local(key).and_then(|value| decode(key, value))
    }

    /// Writes locally, then queues the full value for the remote store.
    pub fn put(&self, key: &str, value: Value) -> Result<(), InfraError> {
        self.local.put(&self.namespace, key, &value)?;
        if let Some(remote) = self.remote.as_ref() {
            remote.enqueue(key, value);
        }
        Ok(())
    }

    pub fn put_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        self.put(key, serde_json::to_value(value)?)
    }

    /// Clears a key by writing null, so the remote converges with last-write-wins.
    pub fn clear(&self, key: &str) -> Result<(), InfraError> {
        self.put(key, Value::Null)
    }

    /// Direct remote read without any fallback.
    pub async fn try_remote(&self, key: &str) -> Result<Option<Value>, InfraError> {
        let remote = self.remote.as_ref().ok_or(InfraError::RemoteUnavailable)?;
        match timeout(remote.read_timeout, remote.store.get(&self.namespace, key)).await {
            Ok(result) => result,
            Err(_) => Err(InfraError::Remote(format!("timeout while reading {key}"))),
        }
    }

    /// Waits until every write queued so far has been attempted.
    pub async fn flush_remote(&self) {
        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if remote.commands.send(RemoteCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn pending_remote_keys(&self) -> Vec<String> {
        self.remote
            .as_ref()
            .map(RemoteLink::dirty_keys)
            .unwrap_or_default()
    }
}

impl RemoteLink {
    fn dirty_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .dirty
            .lock()
            .map(|dirty| dirty.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn is_idle(&self) -> bool {
        self.dirty.lock().map(|dirty| dirty.is_empty()).unwrap_or(false)
    }

    fn is_dirty(&self, key: &str) -> bool {
        self.dirty
            .lock()
            .map(|dirty| dirty.contains_key(key))
            .unwrap_or(true)
    }

    fn enqueue(&self, key: &str, value: Value) {
        let generation = match self.next_generation.lock() {
            Ok(mut next) => {
                *next += 1;
                *next
            }
            Err(_) => return,
        };
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.insert(key.to_string(), generation);
        }
        let command = RemoteCommand::Write {
            key: key.to_string(),
            value,
            generation,
        };
        if self.commands.send(command).is_err() {
            log::warn!("remote write worker stopped; {key} stays local only");
        }
    }
}

async fn run_remote_worker(
    namespace: String,
    local: Arc<dyn LocalCache>,
    store: Arc<dyn RemoteStore>,
    retry_policy: RetryPolicy,
    dirty: DirtyKeys,
    mut receiver: mpsc::UnboundedReceiver<RemoteCommand>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            RemoteCommand::Write {
                key,
                value,
                generation,
            } => {
                if is_superseded(&dirty, &key, generation) {
                    continue;
                }
                match write_with_retry(store.as_ref(), &retry_policy, &namespace, &key, &value).await {
                    Ok(()) => {
                        if let Err(error) = local.mark_synced(&namespace, &key, &value) {
                            log::warn!("failed to flag {key} as synced: {error}");
                        }
                        if let Ok(mut dirty) = dirty.lock() {
                            if dirty.get(&key) == Some(&generation) {
                                dirty.remove(&key);
                            }
                        }
                    }
                    Err(error) => {
                        log::warn!("remote write of {key} dropped after retries: {error}");
                    }
                }
            }
            RemoteCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn is_superseded(dirty: &DirtyKeys, key: &str, generation: u64) -> bool {
    dirty
        .lock()
        .map(|dirty| dirty.get(key).is_some_and(|latest| *latest > generation))
        .unwrap_or(false)
}

async fn write_with_retry(
    store: &dyn RemoteStore,
    retry_policy: &RetryPolicy,
    namespace: &str,
    key: &str,
    value: &Value,
) -> Result<(), InfraError> {
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match store.put(namespace, key, value).await {
            Ok(()) => return Ok(()),
            Err(error) if error.is_retryable() && attempt + 1 < max_attempts => {
                let delay = retry_policy
                    .base_delay_ms
                    .saturating_mul(2u64.saturating_pow(attempt));
                sleep(Duration::from_millis(delay)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            log::warn!("stored value for {key} is malformed: {error}");
            None
        }
    }
}
