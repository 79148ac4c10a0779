//! Raw queue message

use async_nats::jetstream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Message as delivered by a [`crate::MessageSource`].
///
/// The payload is kept undecoded; interpreting it is the consumer's business.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Position in the stream
    pub sequence: u64,

    /// Publisher-supplied key (the `Nats-Msg-Id` header on JetStream)
    pub key: Option<String>,

    /// Raw payload
    pub payload: Bytes,

    /// Local receive time
    pub received_at: DateTime<Utc>,

    /// Delivery count reported by the server, 1 on first delivery
    pub delivery_attempt: u64,

    pub(crate) handle: Option<Arc<jetstream::Message>>,
}

impl QueueMessage {
    /// Build a message not tied to a broker delivery
    pub fn detached(sequence: u64, key: Option<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            key,
            payload: payload.into(),
            received_at: Utc::now(),
            delivery_attempt: 1,
            handle: None,
        }
    }

    /// Payload as UTF-8 for logging
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
