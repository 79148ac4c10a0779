//! Message Bus with NATS support
//!
//! Provides at-least-once consumption of keyed messages with:
//! - JetStream durable pull consumers as consumer groups
//! - Explicit commit (ack) and release (nak) of whole batches
//! - Count/deadline bounded batch accumulation
//! - Keyed publishing with deduplication ids and retry
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod accumulator;
pub mod config;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod source;

pub use accumulator::BatchAccumulator;
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use jetstream::JetStreamSource;
pub use memory::MemoryQueue;
pub use message::QueueMessage;
pub use publisher::{JetStreamPublisher, PublisherConfig};
pub use source::{publish_json, MessageSource, QueuePublisher};
