pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use errors::{Result, TransferEngineError};
