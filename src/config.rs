use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::transport::IngestClientConfig;

pub const ENV_BASE_URL: &str = "TRAJECTORY_BASE_URL";
pub const ENV_API_KEY: &str = "TRAJECTORY_API_KEY";
pub const ENV_AGENT_ID: &str = "TRAJECTORY_AGENT_ID";
pub const ENV_FLUSH_INTERVAL_MS: &str = "TRAJECTORY_FLUSH_INTERVAL_MS";
pub const ENV_MAX_BATCH_SIZE: &str = "TRAJECTORY_MAX_BATCH_SIZE";
pub const ENV_DEBOUNCE_MS: &str = "TRAJECTORY_DEBOUNCE_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid configuration: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

/// What happens to a batch the transport rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DeliveryFailurePolicy {
    /// Log and lose the batch.
    Drop,
    /// Put the batch back at the head of the buffer, keeping at most
    /// `max_buffered` events (oldest dropped first).
    #[serde(rename_all = "camelCase")]
    Requeue { max_buffered: usize },
}

impl Default for DeliveryFailurePolicy {
    fn default() -> Self {
        Self::Drop
    }
}

/// Behavior of `start_trajectory` when the session already has a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DoubleStartPolicy {
    /// Keep the existing trajectory and ignore the new start.
    Reject,
    /// End the existing trajectory as cancelled, then start the new one.
    CloseExisting,
    /// Replace the existing trajectory without ending it. Its pending
    /// streamed text is settled into it first.
    Overwrite,
}

impl Default for DoubleStartPolicy {
    fn default() -> Self {
        Self::Reject
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default)]
    pub on_failure: DeliveryFailurePolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            on_failure: DeliveryFailurePolicy::default(),
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default)]
    pub ingest: IngestClientConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_agent_id")]
    pub default_agent_id: String,
    #[serde(default)]
    pub double_start: DoubleStartPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ingest: IngestClientConfig::default(),
            batch: BatchConfig::default(),
            debounce_ms: default_debounce_ms(),
            default_agent_id: default_agent_id(),
            double_start: DoubleStartPolicy::default(),
        }
    }
}

impl CaptureConfig {
    /// Defaults, overlaid with `.env` and process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|error| ConfigError::Parse(error.to_string()))
    }

    /// Load a JSON config file, then apply environment overrides.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        let mut config = Self::from_json_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env(ENV_BASE_URL) {
            self.ingest.base_url = value;
        }
        if let Some(value) = non_empty_env(ENV_API_KEY) {
            self.ingest.api_key = Some(value);
        }
        if let Some(value) = non_empty_env(ENV_AGENT_ID) {
            self.default_agent_id = value;
        }
        if let Some(value) = parsed_env::<u64>(ENV_FLUSH_INTERVAL_MS) {
            self.batch.flush_interval_ms = value;
        }
        if let Some(value) = parsed_env::<usize>(ENV_MAX_BATCH_SIZE) {
            self.batch.max_batch_size = value;
        }
        if let Some(value) = parsed_env::<u64>(ENV_DEBOUNCE_MS) {
            self.debounce_ms = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch maxBatchSize must be greater than 0".to_string(),
            ));
        }
        if self.batch.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "batch flushIntervalMs must be greater than 0".to_string(),
            ));
        }
        if let DeliveryFailurePolicy::Requeue { max_buffered } = self.batch.on_failure {
            if max_buffered == 0 {
                return Err(ConfigError::Invalid(
                    "requeue maxBuffered must be greater than 0".to_string(),
                ));
            }
        }
        if self.ingest.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ingest timeoutMs must be greater than 0".to_string(),
            ));
        }
        if self.default_agent_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "defaultAgentId cannot be empty".to_string(),
            ));
        }
        reqwest::Url::parse(self.ingest.base_url.trim()).map_err(|error| {
            ConfigError::Invalid(format!(
                "invalid ingest baseUrl '{}': {error}",
                self.ingest.base_url
            ))
        })?;
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = non_empty_env(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {key}={raw}: not a valid number");
            None
        }
    }
}

fn default_max_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_agent_id() -> String {
    "main".to_string()
}
