/// Configuration for the update loop
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::notify::{ChannelKey, NotificationRouter};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {message}")]
    Invalid { message: String },
}

/// Settings for the update loop, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Seconds between cycle starts
    pub interval_secs: u64,
    /// Upper bound on one catalog fetch
    pub fetch_timeout_secs: u64,
    /// Directory holding baseline, current and subscriber files
    pub data_dir: PathBuf,
    /// Endpoint serving snapshots as JSON, used by `HttpCatalogSource`
    pub catalog_url: Option<String>,
    /// Channel for prefixes without a dedicated one
    pub fallback_channel: String,
    /// Channel for failure reports and cycle notices
    pub ops_channel: Option<String>,
    /// Subject prefix (e.g. "COMP") to channel key
    pub channels: BTreeMap<String, String>,
    /// Post a notice to the ops channel after every completed cycle
    pub report_cycles: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            fetch_timeout_secs: 10,
            data_dir: PathBuf::from("data"),
            catalog_url: None,
            fallback_channel: "other".to_string(),
            ops_channel: None,
            channels: BTreeMap::new(),
            report_cycles: false,
        }
    }
}

impl LoopConfig {
    /// Loads and validates a config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: LoopConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "interval_secs must be greater than zero".to_string(),
            });
        }
        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs >= self.interval_secs {
            return Err(ConfigError::Invalid {
                message: format!(
                    "fetch_timeout_secs must be between 1 and {} (exclusive)",
                    self.interval_secs
                ),
            });
        }
        if self.fallback_channel.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "fallback_channel must not be empty".to_string(),
            });
        }
        if let Some(prefix) = self.channels.keys().find(|p| p.chars().count() != 4) {
            return Err(ConfigError::Invalid {
                message: format!("channel prefix {:?} is not 4 characters", prefix),
            });
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn ops_channel(&self) -> Option<ChannelKey> {
        self.ops_channel.as_deref().map(ChannelKey::from)
    }

    /// Builds the router from the prefix table.
    pub fn router(&self) -> NotificationRouter {
        self.channels.iter().fold(
            NotificationRouter::new(ChannelKey::new(self.fallback_channel.clone())),
            |router, (prefix, channel)| router.with_channel(prefix, ChannelKey::new(channel.clone())),
        )
    }
}
