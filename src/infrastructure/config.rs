use crate::infrastructure::clock::LocalZone;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const APP_JSON: &str = "app.json";
pub const DEFAULT_IDENTITY: &str = "default";
const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
const DEFAULT_BREAK_TICK_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_break_tick_interval_ms() -> u64 {
    DEFAULT_BREAK_TICK_INTERVAL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u8,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_break_tick_interval_ms")]
    pub break_tick_interval_ms: u64,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            timezone: None,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            break_tick_interval_ms: DEFAULT_BREAK_TICK_INTERVAL_MS,
            identity: None,
            remote: RemoteConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn zone(&self) -> Result<LocalZone, InfraError> {
        LocalZone::parse(self.timezone.as_deref()).map_err(InfraError::InvalidConfig)
    }

    pub fn namespace(&self) -> String {
        normalize_identity(self.identity.as_deref().unwrap_or_default())
    }

    fn validate(&self) -> Result<(), InfraError> {
        if self.tick_interval_ms == 0 || self.break_tick_interval_ms == 0 {
            return Err(InfraError::InvalidConfig(
                "tick intervals must be greater than zero".to_string(),
            ));
        }
        if self.remote.enabled
            && self
                .remote
                .base_url
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .is_none()
        {
            return Err(InfraError::InvalidConfig(
                "remote.baseUrl is required when remote.enabled is true".to_string(),
            ));
        }
        if self.remote.max_attempts == 0 {
            return Err(InfraError::InvalidConfig(
                "remote.maxAttempts must be at least 1".to_string(),
            ));
        }
        self.zone()?;
        Ok(())
    }
}

fn default_app_json() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "timezone": null,
        "tickIntervalMs": DEFAULT_TICK_INTERVAL_MS,
        "breakTickIntervalMs": DEFAULT_BREAK_TICK_INTERVAL_MS,
        "identity": DEFAULT_IDENTITY,
        "remote": {
            "enabled": false,
            "baseUrl": null,
            "timeoutMs": default_timeout_ms(),
            "maxAttempts": default_max_attempts(),
            "baseDelayMs": default_base_delay_ms()
        }
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_json())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let raw = read_config(&config_dir.join(APP_JSON))?;
    let config: AppConfig = serde_json::from_value(raw)?;
    config.validate()?;
    Ok(config)
}

pub fn normalize_identity(identity: &str) -> String {
    let normalized = identity.trim();
    if normalized.is_empty() {
        DEFAULT_IDENTITY.to_string()
    } else {
        normalized.to_string()
    }
}
