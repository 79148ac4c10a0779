//! Error types for the ledger client

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// The cluster could not be reached or the call timed out
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The cluster answered with a non-OK gRPC status
    #[error("Ledger request failed: {0}")]
    Status(#[from] tonic::Status),

    /// gRPC channel setup failed
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A response could not be mapped onto domain types
    #[error("Malformed ledger response: {0}")]
    Decode(String),

    /// Identifier rejected by the codec
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Date string rejected by the codec
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Codec errors are caused by bad input; everything else is infrastructure
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::InvalidId(_) | Error::InvalidDate(_))
    }
}
