//! JetStream integration for persistent messaging
//!
//! The movement stream is consumed through one durable pull consumer per
//! consumer group. Acking a message is the "offset commit"; a message that
//! is never acked (or is nak'ed) is delivered again.

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, DeliverPolicy, PullConsumer, ReplayPolicy},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    AckKind, Context as JetStreamContext,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
    config::QueueConfig,
    message::QueueMessage,
    metrics::{MESSAGE_RECEIVE_TOTAL, NATS_CONNECTION_STATUS},
    source::MessageSource,
    Error, Result,
};

/// Header carrying the publisher's deduplication key
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// Connect to NATS and open a JetStream context
pub async fn connect(url: &str) -> Result<JetStreamContext> {
    info!("Connecting to NATS JetStream at {}", url);

    let client = async_nats::connect(url).await.map_err(|e| {
        NATS_CONNECTION_STATUS.with_label_values(&["disconnected"]).inc();
        Error::Connection(e.to_string())
    })?;
    NATS_CONNECTION_STATUS.with_label_values(&["connected"]).inc();

    Ok(jetstream::new(client))
}

/// Create the movement stream if it does not exist yet
pub async fn ensure_stream(context: &JetStreamContext, config: &QueueConfig) -> Result<jetstream::stream::Stream> {
    let stream_config = StreamConfig {
        name: config.stream.clone(),
        description: Some("Movement requests awaiting settlement".to_string()),
        subjects: vec![config.subject.clone()],
        retention: RetentionPolicy::Limits,
        max_age: Duration::from_secs(7 * 24 * 3600), // 7 days
        storage: StorageType::File,
        duplicate_window: Duration::from_secs(300), // 5 min deduplication
        ..Default::default()
    };

    match context.get_or_create_stream(stream_config).await {
        Ok(stream) => {
            info!("Stream {} ready", config.stream);
            Ok(stream)
        }
        Err(e) => {
            error!("Failed to create stream {}: {}", config.stream, e);
            Err(Error::Stream(e.to_string()))
        }
    }
}

/// [`MessageSource`] backed by a durable JetStream pull consumer
pub struct JetStreamSource {
    messages: Mutex<Option<pull::Stream>>,
    group_id: String,
}

impl std::fmt::Debug for JetStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamSource")
            .field("group_id", &self.group_id)
            .finish()
    }
}

impl JetStreamSource {
    /// Join the consumer group named in `config`
    pub async fn subscribe(context: &JetStreamContext, config: &QueueConfig) -> Result<Self> {
        let stream = ensure_stream(context, config).await?;

        info!(
            "Creating consumer {} on stream {} (subject: {})",
            config.group_id, config.stream, config.subject
        );

        let consumer_config = pull::Config {
            durable_name: Some(config.group_id.clone()),
            description: Some("Transfer settlement pipeline".to_string()),
            filter_subject: config.subject.clone(),
            ack_policy: AckPolicy::Explicit,
            ack_wait: config.ack_wait(),
            max_deliver: -1,
            max_ack_pending: (config.batch_size as i64).saturating_mul(2),
            deliver_policy: DeliverPolicy::All,
            replay_policy: ReplayPolicy::Instant,
            ..Default::default()
        };

        let consumer: PullConsumer = stream
            .get_or_create_consumer(&config.group_id, consumer_config)
            .await
            .map_err(|e| Error::ConsumerGroup(e.to_string()))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(config.batch_size.max(1))
            .messages()
            .await
            .map_err(|e| Error::ConsumerGroup(e.to_string()))?;

        info!("✅ JetStream consumer {} ready", config.group_id);

        Ok(Self {
            messages: Mutex::new(Some(messages)),
            group_id: config.group_id.clone(),
        })
    }
}

fn into_queue_message(msg: jetstream::Message) -> Result<QueueMessage> {
    let (sequence, delivery_attempt) = {
        let info = msg.info().map_err(|e| Error::Fetch(e.to_string()))?;
        (info.stream_sequence, info.delivered.max(1) as u64)
    };
    let key = msg
        .headers
        .as_ref()
        .and_then(|headers| headers.get(MESSAGE_ID_HEADER))
        .map(|value| value.as_str().to_string());
    let payload = msg.payload.clone();

    Ok(QueueMessage {
        sequence,
        key,
        payload,
        received_at: chrono::Utc::now(),
        delivery_attempt,
        handle: Some(Arc::new(msg)),
    })
}

#[async_trait]
impl MessageSource for JetStreamSource {
    async fn next_message(&self) -> Result<QueueMessage> {
        let mut guard = self.messages.lock().await;
        let stream = guard.as_mut().ok_or(Error::EndOfStream)?;

        match stream.next().await {
            Some(Ok(msg)) => {
                MESSAGE_RECEIVE_TOTAL.with_label_values(&["fetched"]).inc();
                into_queue_message(msg)
            }
            Some(Err(e)) => Err(Error::Fetch(e.to_string())),
            None => Err(Error::EndOfStream),
        }
    }

    async fn commit(&self, messages: &[QueueMessage]) -> Result<()> {
        for message in messages {
            if let Some(handle) = &message.handle {
                handle
                    .ack()
                    .await
                    .map_err(|e| Error::Ack(format!("seq {}: {}", message.sequence, e)))?;
            }
        }
        MESSAGE_RECEIVE_TOTAL
            .with_label_values(&["committed"])
            .inc_by(messages.len() as f64);
        debug!("Committed {} messages", messages.len());
        Ok(())
    }

    async fn release(&self, messages: &[QueueMessage]) -> Result<()> {
        for message in messages {
            if let Some(handle) = &message.handle {
                handle
                    .ack_with(AckKind::Nak(None))
                    .await
                    .map_err(|e| Error::Ack(format!("seq {}: {}", message.sequence, e)))?;
            }
        }
        MESSAGE_RECEIVE_TOTAL
            .with_label_values(&["released"])
            .inc_by(messages.len() as f64);
        debug!("Released {} messages for redelivery", messages.len());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.messages.lock().await.take();
        info!("JetStream consumer {} closed", self.group_id);
        Ok(())
    }
}
