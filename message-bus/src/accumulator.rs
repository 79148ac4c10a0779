//! Batch accumulation
//!
//! A batch is complete when it holds `max_messages` messages or when
//! `max_wait` has elapsed since accumulation started, whichever comes first.
//! Nothing is committed here.

use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::{message::QueueMessage, metrics::BATCH_SIZE, source::MessageSource, Error};

/// Collects messages from a [`MessageSource`] into bounded batches
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    max_messages: usize,
    max_wait: Duration,
}

impl BatchAccumulator {
    /// `max_messages` is clamped to at least one
    pub fn new(max_messages: usize, max_wait: Duration) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_wait,
        }
    }

    /// Maximum batch size
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Fill one batch in arrival order.
    ///
    /// Deadline expiry and end-of-stream complete the batch normally. Any other
    /// fetch error stops accumulation and keeps what was already fetched; the
    /// error is logged, not returned.
    pub async fn accumulate(&self, source: &dyn MessageSource) -> Vec<QueueMessage> {
        let deadline = Instant::now() + self.max_wait;
        let mut batch = Vec::with_capacity(self.max_messages.min(1024));

        while batch.len() < self.max_messages {
            match timeout_at(deadline, source.next_message()).await {
                Ok(Ok(message)) => batch.push(message),
                Ok(Err(Error::EndOfStream)) => {
                    debug!("Source exhausted after {} messages", batch.len());
                    break;
                }
                Ok(Err(e)) => {
                    warn!("⚠️  Fetch failed, closing batch at {} messages: {}", batch.len(), e);
                    break;
                }
                Err(_) => break,
            }
        }

        BATCH_SIZE.observe(batch.len() as f64);
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryQueue;

    #[tokio::test(start_paused = true)]
    async fn test_batch_closes_at_max_count() {
        let queue = MemoryQueue::new();
        for i in 0..5 {
            queue.push(Some(&i.to_string()), format!("m{}", i));
        }
        let accumulator = BatchAccumulator::new(3, Duration::from_secs(20));

        let batch = accumulator.accumulate(&queue).await;
        let sequences: Vec<u64> = batch.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_closes_at_deadline() {
        let queue = MemoryQueue::new();
        queue.push(Some("1"), "only");
        let accumulator = BatchAccumulator::new(100, Duration::from_millis(500));

        let started = Instant::now();
        let batch = accumulator.accumulate(&queue).await;
        assert_eq!(batch.len(), 1);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_on_idle_queue() {
        let queue = MemoryQueue::new();
        let accumulator = BatchAccumulator::new(10, Duration::from_secs(1));
        assert!(accumulator.accumulate(&queue).await.is_empty());
    }

    struct ScriptedSource {
        script: parking_lot::Mutex<std::collections::VecDeque<crate::Result<QueueMessage>>>,
    }

    #[async_trait::async_trait]
    impl MessageSource for ScriptedSource {
        async fn next_message(&self) -> crate::Result<QueueMessage> {
            let next = self.script.lock().pop_front();
            match next {
                Some(next) => next,
                None => std::future::pending().await,
            }
        }

        async fn commit(&self, _: &[QueueMessage]) -> crate::Result<()> {
            Ok(())
        }

        async fn release(&self, _: &[QueueMessage]) -> crate::Result<()> {
            Ok(())
        }

        async fn close(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_keeps_partial_batch() {
        let source = ScriptedSource {
            script: parking_lot::Mutex::new(
                vec![
                    Ok(QueueMessage::detached(1, Some("1".into()), "a")),
                    Err(Error::Fetch("connection reset".into())),
                    Ok(QueueMessage::detached(2, Some("2".into()), "b")),
                ]
                .into(),
            ),
        };
        let accumulator = BatchAccumulator::new(10, Duration::from_secs(20));

        let batch = accumulator.accumulate(&source).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].sequence, 1);

        let next = accumulator.accumulate(&source).await;
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_completes_batch() {
        let queue = MemoryQueue::new();
        queue.push(Some("1"), "a");
        queue.close().await.unwrap();
        let accumulator = BatchAccumulator::new(10, Duration::from_secs(20));
        assert_eq!(accumulator.accumulate(&queue).await.len(), 1);
    }
}
