//! Error types for the settlement pipeline

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
///
/// Infrastructure failures abort the current batch without committing it.
/// Business failures are answers to the caller and never block the queue.
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Queue error
    #[error("Queue error: {0}")]
    Queue(#[from] message_bus::Error),

    /// Metadata store unreachable or failing
    #[error("Metadata store error: {0}")]
    Store(String),

    /// Notification endpoint unreachable or answered non-2xx
    #[error("Notification error: {0}")]
    Notification(String),

    /// The metadata store refused a write (status other than OK)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Currency not found
    #[error("Currency not found: {0}")]
    CurrencyNotFound(u32),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(u128),

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(u128),

    /// Resource already exists
    #[error("Already exists: {0}")]
    Conflict(String),

    /// Input rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Currency provisioning failed after compensation
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure is transient infrastructure trouble
    pub fn is_infra(&self) -> bool {
        match self {
            Error::Ledger(e) => !e.is_input_error(),
            Error::Queue(_) | Error::Store(_) | Error::Notification(_) => true,
            _ => false,
        }
    }

    /// Pipeline stage label for metrics
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Ledger(_) => "ledger",
            Error::Queue(_) => "queue",
            Error::Store(_) => "store",
            Error::Notification(_) => "notification",
            _ => "other",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Notification(err.to_string())
    }
}
