//! Queue seams
//!
//! Consuming and producing are split into two traits so the pipeline and the
//! demo producer can be wired to JetStream in production and to
//! [`crate::MemoryQueue`] in tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::{message::QueueMessage, Result};

/// Source of queue messages with explicit commit.
///
/// Delivered messages stay uncommitted until [`MessageSource::commit`] is
/// called for them; uncommitted messages are delivered again.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    ///
    /// Must be cancel safe: the accumulator drops this future at its deadline.
    /// Returns [`crate::Error::EndOfStream`] once the source is closed.
    async fn next_message(&self) -> Result<QueueMessage>;

    /// Mark messages as processed so they are never delivered again
    async fn commit(&self, messages: &[QueueMessage]) -> Result<()>;

    /// Hand messages back for prompt redelivery
    async fn release(&self, messages: &[QueueMessage]) -> Result<()>;

    /// Stop delivering; pending fetches end with `EndOfStream`
    async fn close(&self) -> Result<()>;
}

/// Keyed message producer
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish one payload under a deduplication key
    async fn publish(&self, key: &str, payload: Bytes) -> Result<()>;
}

/// Serialize `value` as JSON and publish it under `key`
pub async fn publish_json<P, T>(publisher: &P, key: &str, value: &T) -> Result<()>
where
    P: QueuePublisher + ?Sized,
    T: Serialize + Sync,
{
    let payload = serde_json::to_vec(value)?;
    publisher.publish(key, Bytes::from(payload)).await
}
