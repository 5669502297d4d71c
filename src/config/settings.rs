use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::modules::fingerprint::ClientEnvironment;
use crate::modules::rapid_viewing::{
    DEFAULT_MAX_VIEWS, DEFAULT_VIEW_STORAGE_KEY, DEFAULT_VIEW_WINDOW, RapidViewPolicy,
};
use crate::modules::rate_limit::{PolicyError, RateLimitPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let policy = RateLimitPolicy::default();
        Self {
            max_requests: policy.max_requests(),
            window_ms: policy.window_millis(),
        }
    }
}

impl RateLimitSettings {
    pub fn policy(&self) -> Result<RateLimitPolicy, PolicyError> {
        RateLimitPolicy::new(self.max_requests, Duration::from_millis(self.window_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RapidViewSettings {
    pub max_views: usize,
    pub window_ms: u64,
    pub storage_key: String,
}

impl Default for RapidViewSettings {
    fn default() -> Self {
        Self {
            max_views: DEFAULT_MAX_VIEWS,
            window_ms: DEFAULT_VIEW_WINDOW.as_millis() as u64,
            storage_key: DEFAULT_VIEW_STORAGE_KEY.to_string(),
        }
    }
}

impl RapidViewSettings {
    pub fn policy(&self) -> Result<RapidViewPolicy, PolicyError> {
        RapidViewPolicy::new(
            self.max_views,
            Duration::from_millis(self.window_ms),
            self.storage_key.clone(),
        )
    }
}

/// Top-level configuration for a [`crate::ClientShield`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    pub rate_limit: RateLimitSettings,
    pub rapid_view: RapidViewSettings,
    pub fingerprint: ClientEnvironment,
    /// redb file backing the rapid-view log; in-memory when unset.
    pub storage_path: Option<PathBuf>,
}

impl ShieldConfig {
    pub fn builder() -> ShieldConfigBuilder {
        ShieldConfigBuilder::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        log::debug!("loading shield configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.policy()?;
        self.rapid_view.policy()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShieldConfigBuilder {
    config: ShieldConfig,
}

impl ShieldConfigBuilder {
    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.config.rate_limit = RateLimitSettings {
            max_requests,
            window_ms: window.as_millis().min(u64::MAX as u128) as u64,
        };
        self
    }

    pub fn rapid_view(mut self, max_views: usize, window: Duration) -> Self {
        self.config.rapid_view.max_views = max_views;
        self.config.rapid_view.window_ms = window.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn rapid_view_key(mut self, key: impl Into<String>) -> Self {
        self.config.rapid_view.storage_key = key.into();
        self
    }

    pub fn fingerprint(mut self, environment: ClientEnvironment) -> Self {
        self.config.fingerprint = environment;
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ShieldConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
