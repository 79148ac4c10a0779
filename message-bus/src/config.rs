//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// NATS server URL
    pub url: String,

    /// JetStream stream name
    pub stream: String,

    /// Subject movements are published on
    pub subject: String,

    /// Durable consumer name; every instance sharing it forms one consumer group
    pub group_id: String,

    /// Maximum messages per batch
    pub batch_size: usize,

    /// Maximum time spent filling one batch (ms)
    pub batch_timeout_ms: u64,

    /// How long the server waits for an ack before redelivering (s)
    pub ack_wait_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream: "MOVEMENTS".to_string(),
            subject: "movements.requests".to_string(),
            group_id: "transfer-engine".to_string(),
            batch_size: 1000,
            batch_timeout_ms: 20_000,
            ack_wait_secs: 60,
        }
    }
}

impl QueueConfig {
    /// Batch fill deadline
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Server-side ack deadline
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }
}
