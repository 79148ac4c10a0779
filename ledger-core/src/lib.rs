//! Ledger Core
//!
//! Typed access to the external double-entry ledger cluster.
//!
//! # Architecture
//!
//! - **Types**: fixed-layout accounts and transfers with 128-bit ids and amounts
//! - **Identifier codec**: composite account ids and reversal ids
//! - **Client**: [`LedgerClient`] trait with a gRPC and an in-memory implementation
//!
//! # Invariants
//!
//! - Account id = (currency << 64) | owner; owner 0 is the company account
//! - Reversal ids carry bit 64; regular ids never do
//! - Create results are sparse: absent index means success

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod client;
pub mod config;
pub mod error;
pub mod grpc;
pub mod ids;
pub mod memory;
pub mod metrics;
pub mod types;

// Re-exports
pub use client::LedgerClient;
pub use config::LedgerConfig;
pub use error::{Error, Result};
pub use grpc::GrpcLedgerClient;
pub use memory::{LedgerOperation, MemoryLedger};
pub use types::{
    Account, AccountBalance, AccountFilter, AccountFilterFlags, AccountFlags, AccountId,
    CreateAccountResult, CreateTransferResult, QueryFilter, QueryFilterFlags, Transfer,
    TransferCode, TransferFlags, TransferId, ACCOUNT_CODE,
};
