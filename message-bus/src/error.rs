//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream could not be created or looked up
    #[error("Stream error: {0}")]
    Stream(String),

    /// Durable consumer could not be created
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Fetching the next message failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The source was closed and will yield no more messages
    #[error("End of stream")]
    EndOfStream,

    /// Acknowledging (committing) or releasing messages failed
    #[error("Acknowledgement error: {0}")]
    Ack(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
