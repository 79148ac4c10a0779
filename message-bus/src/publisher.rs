//! Keyed JetStream publisher with retry logic

use async_nats::jetstream::Context as JetStreamContext;
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::{
    jetstream::MESSAGE_ID_HEADER,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    source::QueuePublisher,
    Error, Result,
};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Publishes to one subject; the key becomes the JetStream dedup id
pub struct JetStreamPublisher {
    context: JetStreamContext,
    subject: String,
    config: PublisherConfig,
}

impl std::fmt::Debug for JetStreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamPublisher")
            .field("subject", &self.subject)
            .field("config", &self.config)
            .finish()
    }
}

impl JetStreamPublisher {
    /// Create new publisher
    pub fn new(context: JetStreamContext, subject: impl Into<String>, config: PublisherConfig) -> Self {
        Self {
            context,
            subject: subject.into(),
            config,
        }
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, key: &str, payload: &Bytes) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(key, payload.clone()).await {
                Ok(_) => {
                    if attempts > 1 {
                        info!("✅ Message {} published after {} attempts", key, attempts);
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!("❌ Failed to publish {} after {} attempts: {}", key, attempts, e);
                        return Err(e);
                    }

                    warn!(
                        "⚠️  Publish of {} failed (attempt {}), retrying in {:?}: {}",
                        key, attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;

                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    async fn publish_once(&self, key: &str, payload: Bytes) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_ID_HEADER, key);

        self.context
            .publish_with_headers(self.subject.clone(), headers, payload)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::Publish(format!("publish ack failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for JetStreamPublisher {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<()> {
        let start = Instant::now();
        let result = self.publish_with_retry(key, &payload).await;

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[status])
            .observe(start.elapsed().as_secs_f64());
        MESSAGE_PUBLISH_TOTAL.with_label_values(&[status]).inc();

        result
    }
}
