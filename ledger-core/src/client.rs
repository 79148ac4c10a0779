//! Ledger client abstraction
//!
//! The accounting engine is an external, strictly consistent cluster. Every
//! component talks to it through [`LedgerClient`] so the pipeline can run
//! against the gRPC client in production and [`crate::MemoryLedger`] in tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Account, AccountBalance, AccountFilter, AccountId, CreateAccountResult,
    CreateTransferResult, QueryFilter, Transfer, TransferId,
};

/// Operations offered by the ledger cluster.
///
/// Create calls are batched. Results are sparse: only failed events are
/// reported, as `(index into the request, result)`.
#[async_trait]
pub trait LedgerClient: Send + Sync + std::fmt::Debug {
    /// Create accounts
    async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<(u32, CreateAccountResult)>>;

    /// Create transfers
    async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<(u32, CreateTransferResult)>>;

    /// Fetch accounts by id; unknown ids are omitted
    async fn lookup_accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>>;

    /// Fetch transfers by id; unknown ids are omitted
    async fn lookup_transfers(&self, ids: &[TransferId]) -> Result<Vec<Transfer>>;

    /// Transfers touching one account, ordered by timestamp
    async fn get_account_transfers(&self, filter: &AccountFilter) -> Result<Vec<Transfer>>;

    /// Balance history of an account with history enabled
    async fn get_account_balances(&self, filter: &AccountFilter) -> Result<Vec<AccountBalance>>;

    /// Accounts matching metadata, ordered by timestamp
    async fn query_accounts(&self, filter: &QueryFilter) -> Result<Vec<Account>>;
}
