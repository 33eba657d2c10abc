//! Typed spider configuration.
//!
//! Job rows carry an opaque JSON configuration bag. The recognized keys are
//! modeled here and validated when the job is created, not when the worker
//! starts; spider-specific extensions pass through untouched in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

fn default_checkpoint_interval() -> u64 {
    50
}

fn default_staleness_days() -> i64 {
    7
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid spider configuration: {0}")]
    Invalid(String),
    #[error("malformed spider configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Crawl behavior for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderConfig {
    /// Domain the traversal must stay on (suffix match, covers subdomains).
    pub allowed_domain: String,

    /// Substring a URL must contain to be visited at all.
    pub target_url_pattern: String,

    /// URLs containing any of these are never visited.
    #[serde(default)]
    pub excluded_url_patterns: Vec<String>,

    /// URLs ending with any of these are visited but not recorded.
    #[serde(default)]
    pub excluded_url_endings: Vec<String>,

    /// Persist a checkpoint every this many processed pages.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Ignore checkpoints older than this many days when resuming.
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,

    /// Stop (resumably) after this many pages, if set.
    #[serde(default)]
    pub page_limit: Option<u64>,

    /// Spider-specific extension keys, passed through opaquely.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SpiderConfig {
    /// Parse and validate a job's configuration bag.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: SpiderConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_domain.trim().is_empty() {
            return Err(ConfigError::Invalid("allowed_domain must not be empty".into()));
        }
        if self.target_url_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "target_url_pattern must not be empty".into(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_interval must be positive".into(),
            ));
        }
        if self.page_limit == Some(0) {
            return Err(ConfigError::Invalid("page_limit must be positive".into()));
        }
        if self.staleness_days <= 0 {
            return Err(ConfigError::Invalid(
                "staleness_days must be positive".into(),
            ));
        }
        Ok(())
    }
}
