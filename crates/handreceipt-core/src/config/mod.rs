//! Engine configuration.
//!
//! Provides a unified `EngineConfig` struct used by every client to tune the
//! sync engine. All sections default sensibly so an empty JSON object is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the transfer API, e.g. `https://api.example.com/api`.
    pub api_base_url: Option<String>,
    pub sync: SyncConfig,
    pub network: NetworkConfig,
    pub verifier: VerifierConfig,
    pub queue: QueueConfig,
}

/// Retry and transport tuning for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Total commit attempts before a transfer needs manual attention.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub request_timeout_ms: u64,
    /// Keep completed transfers as local history instead of deleting them.
    pub retain_history: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 300_000,
            request_timeout_ms: 15_000,
            retain_history: true,
        }
    }
}

impl SyncConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connectivity must hold this long before a transition counts.
    pub debounce_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { debounce_ms: 1_500 }
    }
}

impl NetworkConfig {
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    pub max_token_age_secs: i64,
    pub clock_skew_secs: i64,
    pub replay_cache_capacity: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_token_age_secs: 24 * 60 * 60,
            clock_skew_secs: 60,
            replay_cache_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1_000,
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|error| match error {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a config from raw JSON.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config =
            serde_json::from_str::<Self>(raw).map_err(|source| ConfigError::Parse {
                path: "<inline>".to_string(),
                source,
            })?;
        config.normalize()?;
        Ok(config)
    }

    /// Trim values and reject settings the engine cannot run with.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        self.api_base_url = match normalize_text_option(self.api_base_url.take()) {
            Some(url) => Some(normalize_api_base_url(&url)?),
            None => None,
        };

        if self.sync.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "sync.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.sync.backoff_multiplier.is_finite() || self.sync.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "sync.backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        if self.sync.max_delay_ms < self.sync.base_delay_ms {
            return Err(ConfigError::Invalid(
                "sync.max_delay_ms must not be below sync.base_delay_ms".to_string(),
            ));
        }
        if self.sync.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.verifier.max_token_age_secs <= 0 || self.verifier.clock_skew_secs < 0 {
            return Err(ConfigError::Invalid(
                "verifier token window must be positive".to_string(),
            ));
        }
        if self.verifier.replay_cache_capacity == 0 || self.queue.max_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "replay cache and queue capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate an API base URL and strip any trailing slash.
pub fn normalize_api_base_url(raw: &str) -> Result<String, ConfigError> {
    let value = raw.trim();
    if !is_http_url(value) {
        return Err(ConfigError::Invalid(
            "api_base_url must include http:// or https://".to_string(),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}
