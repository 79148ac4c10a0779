//! Configuration for the settlement pipeline

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Endpoint receiving one POST per batch; empty logs the reports instead
    pub webhook_url: String,

    /// Webhook request timeout in seconds
    pub webhook_timeout_secs: u64,

    /// Currency cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// Pause after an empty batch, in milliseconds
    pub idle_backoff_ms: u64,

    /// Pause after an aborted batch, in milliseconds
    pub failure_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            webhook_timeout_secs: 15,
            cache_ttl_secs: 15,
            idle_backoff_ms: 250,
            failure_backoff_ms: 1000,
        }
    }
}

impl PipelineConfig {
    /// Webhook timeout
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Cache TTL
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Idle backoff
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Failure backoff
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    /// Reject unusable values
    pub fn validate(&self) -> Result<()> {
        if self.webhook_timeout_secs == 0 {
            return Err(Error::Config("webhook_timeout_secs must be positive".to_string()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(Error::Config("cache_ttl_secs must be positive".to_string()));
        }
        let url = self.webhook_url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!("webhook_url must be an http(s) URL: {}", url)));
        }
        Ok(())
    }
}
