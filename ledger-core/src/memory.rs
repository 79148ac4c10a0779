//! In-memory ledger
//!
//! Strictly consistent stand-in for the ledger cluster. Each create batch is
//! applied under one lock, event by event, with the same validation order and
//! result codes the cluster reports. Used by tests and local runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::client::LedgerClient;
use crate::error::{Error, Result};
use crate::types::{
    Account, AccountBalance, AccountFilter, AccountFilterFlags, AccountFlags, AccountId,
    CreateAccountResult, CreateTransferResult, QueryFilter, QueryFilterFlags, Transfer, TransferId,
};

/// Operation names for failure injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOperation {
    /// `create_accounts`
    CreateAccounts,
    /// `create_transfers`
    CreateTransfers,
    /// `lookup_accounts`
    LookupAccounts,
    /// `lookup_transfers`
    LookupTransfers,
    /// `get_account_transfers`
    GetAccountTransfers,
    /// `get_account_balances`
    GetAccountBalances,
    /// `query_accounts`
    QueryAccounts,
}

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    transfers: HashMap<TransferId, Transfer>,
    // timestamp -> transfer id, ledger order
    transfer_log: BTreeMap<u64, TransferId>,
    history: HashMap<AccountId, Vec<AccountBalance>>,
    last_timestamp: u64,
}

impl State {
    fn next_timestamp(&mut self) -> u64 {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|n| n.max(0) as u64)
            .unwrap_or_default();
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }
}

/// In-memory [`LedgerClient`]
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
    failing: Mutex<HashSet<LedgerOperation>>,
    calls: Mutex<HashMap<LedgerOperation, usize>>,
}

impl std::fmt::Debug for MemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryLedger")
            .field("accounts", &state.accounts.len())
            .field("transfers", &state.transfers.len())
            .finish()
    }
}

impl MemoryLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with [`Error::Unavailable`] until cleared
    pub fn fail(&self, op: LedgerOperation) {
        self.failing.lock().insert(op);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: LedgerOperation) {
        self.failing.lock().remove(&op);
    }

    /// How many times `op` was invoked, failed calls included
    pub fn calls(&self, op: LedgerOperation) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or_default()
    }

    /// Snapshot of one account
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.state.lock().accounts.get(&id).cloned()
    }

    /// Number of applied transfers
    pub fn transfer_count(&self) -> usize {
        self.state.lock().transfers.len()
    }

    /// Set or clear flags on an existing account, e.g. to close it
    pub fn set_account_flags(&self, id: AccountId, flags: AccountFlags) -> bool {
        match self.state.lock().accounts.get_mut(&id) {
            Some(account) => {
                account.flags = flags;
                true
            }
            None => false,
        }
    }

    fn enter(&self, op: LedgerOperation) -> Result<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        if self.failing.lock().contains(&op) {
            return Err(Error::Unavailable(format!("injected failure for {:?}", op)));
        }
        Ok(())
    }

    fn validate_account(state: &State, account: &Account) -> CreateAccountResult {
        if account.id == 0 {
            return CreateAccountResult::IdMustNotBeZero;
        }
        if account.id == u128::MAX {
            return CreateAccountResult::IdMustNotBeIntMax;
        }
        if account.flags.contains(
            AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS | AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS,
        ) {
            return CreateAccountResult::FlagsAreMutuallyExclusive;
        }
        if account.ledger == 0 {
            return CreateAccountResult::LedgerMustNotBeZero;
        }
        if account.code == 0 {
            return CreateAccountResult::CodeMustNotBeZero;
        }
        if let Some(existing) = state.accounts.get(&account.id) {
            return if existing.flags != account.flags {
                CreateAccountResult::ExistsWithDifferentFlags
            } else if existing.user_data_128 != account.user_data_128 {
                CreateAccountResult::ExistsWithDifferentUserData128
            } else if existing.user_data_64 != account.user_data_64 {
                CreateAccountResult::ExistsWithDifferentUserData64
            } else if existing.user_data_32 != account.user_data_32 {
                CreateAccountResult::ExistsWithDifferentUserData32
            } else if existing.ledger != account.ledger {
                CreateAccountResult::ExistsWithDifferentLedger
            } else if existing.code != account.code {
                CreateAccountResult::ExistsWithDifferentCode
            } else {
                CreateAccountResult::Exists
            };
        }
        CreateAccountResult::Ok
    }

    fn validate_transfer(state: &State, transfer: &Transfer) -> CreateTransferResult {
        if transfer.id == 0 {
            return CreateTransferResult::IdMustNotBeZero;
        }
        if transfer.id == u128::MAX {
            return CreateTransferResult::IdMustNotBeIntMax;
        }
        if let Some(existing) = state.transfers.get(&transfer.id) {
            return if existing.flags != transfer.flags {
                CreateTransferResult::ExistsWithDifferentFlags
            } else if existing.debit_account_id != transfer.debit_account_id {
                CreateTransferResult::ExistsWithDifferentDebitAccountId
            } else if existing.credit_account_id != transfer.credit_account_id {
                CreateTransferResult::ExistsWithDifferentCreditAccountId
            } else if existing.amount != transfer.amount {
                CreateTransferResult::ExistsWithDifferentAmount
            } else if existing.user_data_128 != transfer.user_data_128 {
                CreateTransferResult::ExistsWithDifferentUserData128
            } else if existing.user_data_64 != transfer.user_data_64 {
                CreateTransferResult::ExistsWithDifferentUserData64
            } else if existing.user_data_32 != transfer.user_data_32 {
                CreateTransferResult::ExistsWithDifferentUserData32
            } else if existing.code != transfer.code {
                CreateTransferResult::ExistsWithDifferentCode
            } else {
                CreateTransferResult::Exists
            };
        }
        if transfer.debit_account_id == 0 {
            return CreateTransferResult::DebitAccountIdMustNotBeZero;
        }
        if transfer.credit_account_id == 0 {
            return CreateTransferResult::CreditAccountIdMustNotBeZero;
        }
        if transfer.debit_account_id == transfer.credit_account_id {
            return CreateTransferResult::AccountsMustBeDifferent;
        }
        if transfer.ledger == 0 {
            return CreateTransferResult::LedgerMustNotBeZero;
        }
        if transfer.code == 0 {
            return CreateTransferResult::CodeMustNotBeZero;
        }
        let Some(debit) = state.accounts.get(&transfer.debit_account_id) else {
            return CreateTransferResult::DebitAccountNotFound;
        };
        let Some(credit) = state.accounts.get(&transfer.credit_account_id) else {
            return CreateTransferResult::CreditAccountNotFound;
        };
        if debit.ledger != credit.ledger {
            return CreateTransferResult::AccountsMustHaveTheSameLedger;
        }
        if transfer.ledger != debit.ledger {
            return CreateTransferResult::TransferMustHaveTheSameLedgerAsAccounts;
        }
        if debit.is_closed() {
            return CreateTransferResult::DebitAccountAlreadyClosed;
        }
        if credit.is_closed() {
            return CreateTransferResult::CreditAccountAlreadyClosed;
        }
        if debit.forbids_overdraft()
            && debit
                .debits_posted
                .checked_add(transfer.amount)
                .map_or(true, |debits| debits > debit.credits_posted)
        {
            return CreateTransferResult::ExceedsCredits;
        }
        if credit.flags.contains(AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS)
            && credit
                .credits_posted
                .checked_add(transfer.amount)
                .map_or(true, |credits| credits > credit.debits_posted)
        {
            return CreateTransferResult::ExceedsDebits;
        }
        CreateTransferResult::Ok
    }

    fn apply_transfer(state: &mut State, mut transfer: Transfer) {
        let timestamp = state.next_timestamp();
        transfer.timestamp = timestamp;

        for (id, is_debit) in [(transfer.debit_account_id, true), (transfer.credit_account_id, false)] {
            if let Some(account) = state.accounts.get_mut(&id) {
                if is_debit {
                    account.debits_posted += transfer.amount;
                } else {
                    account.credits_posted += transfer.amount;
                }
                if account.flags.contains(AccountFlags::HISTORY) {
                    let snapshot = AccountBalance {
                        debits_pending: account.debits_pending,
                        debits_posted: account.debits_posted,
                        credits_pending: account.credits_pending,
                        credits_posted: account.credits_posted,
                        timestamp,
                    };
                    state.history.entry(id).or_default().push(snapshot);
                }
            }
        }

        state.transfer_log.insert(timestamp, transfer.id);
        state.transfers.insert(transfer.id, transfer);
    }
}

fn in_range(timestamp: u64, min: u64, max: u64) -> bool {
    (min == 0 || timestamp >= min) && (max == 0 || timestamp <= max)
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<(u32, CreateAccountResult)>> {
        self.enter(LedgerOperation::CreateAccounts)?;
        let mut state = self.state.lock();
        let mut results = Vec::new();

        for (index, account) in accounts.iter().enumerate() {
            match Self::validate_account(&state, account) {
                CreateAccountResult::Ok => {
                    let mut account = account.clone();
                    account.timestamp = state.next_timestamp();
                    account.debits_posted = 0;
                    account.credits_posted = 0;
                    state.accounts.insert(account.id, account);
                }
                failed => results.push((index as u32, failed)),
            }
        }

        debug!("Memory ledger: {} accounts submitted, {} failed", accounts.len(), results.len());
        Ok(results)
    }

    async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<(u32, CreateTransferResult)>> {
        self.enter(LedgerOperation::CreateTransfers)?;
        let mut state = self.state.lock();
        let mut results = Vec::new();

        for (index, transfer) in transfers.iter().enumerate() {
            match Self::validate_transfer(&state, transfer) {
                CreateTransferResult::Ok => Self::apply_transfer(&mut state, transfer.clone()),
                failed => results.push((index as u32, failed)),
            }
        }

        debug!("Memory ledger: {} transfers submitted, {} failed", transfers.len(), results.len());
        Ok(results)
    }

    async fn lookup_accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>> {
        self.enter(LedgerOperation::LookupAccounts)?;
        let state = self.state.lock();
        Ok(ids.iter().filter_map(|id| state.accounts.get(id).cloned()).collect())
    }

    async fn lookup_transfers(&self, ids: &[TransferId]) -> Result<Vec<Transfer>> {
        self.enter(LedgerOperation::LookupTransfers)?;
        let state = self.state.lock();
        Ok(ids.iter().filter_map(|id| state.transfers.get(id).cloned()).collect())
    }

    async fn get_account_transfers(&self, filter: &AccountFilter) -> Result<Vec<Transfer>> {
        self.enter(LedgerOperation::GetAccountTransfers)?;
        let state = self.state.lock();
        let debits = filter.flags.contains(AccountFilterFlags::DEBITS);
        let credits = filter.flags.contains(AccountFilterFlags::CREDITS);

        let matching = state
            .transfer_log
            .iter()
            .filter(|(ts, _)| in_range(**ts, filter.timestamp_min, filter.timestamp_max))
            .filter_map(|(_, id)| state.transfers.get(id))
            .filter(|t| {
                (debits && t.debit_account_id == filter.account_id)
                    || (credits && t.credit_account_id == filter.account_id)
            });

        let limit = filter.limit as usize;
        let found: Vec<Transfer> = if filter.flags.contains(AccountFilterFlags::REVERSED) {
            matching.rev().take(limit).cloned().collect()
        } else {
            matching.take(limit).cloned().collect()
        };
        Ok(found)
    }

    async fn get_account_balances(&self, filter: &AccountFilter) -> Result<Vec<AccountBalance>> {
        self.enter(LedgerOperation::GetAccountBalances)?;
        let state = self.state.lock();
        let Some(history) = state.history.get(&filter.account_id) else {
            return Ok(Vec::new());
        };

        let matching = history
            .iter()
            .filter(|b| in_range(b.timestamp, filter.timestamp_min, filter.timestamp_max));
        let limit = filter.limit as usize;
        let found: Vec<AccountBalance> = if filter.flags.contains(AccountFilterFlags::REVERSED) {
            matching.rev().take(limit).cloned().collect()
        } else {
            matching.take(limit).cloned().collect()
        };
        Ok(found)
    }

    async fn query_accounts(&self, filter: &QueryFilter) -> Result<Vec<Account>> {
        self.enter(LedgerOperation::QueryAccounts)?;
        let state = self.state.lock();
        let mut matching: Vec<&Account> = state
            .accounts
            .values()
            .filter(|a| in_range(a.timestamp, filter.timestamp_min, filter.timestamp_max))
            .filter(|a| filter.user_data_128 == 0 || a.user_data_128 == filter.user_data_128)
            .filter(|a| filter.user_data_64 == 0 || a.user_data_64 == filter.user_data_64)
            .filter(|a| filter.user_data_32 == 0 || a.user_data_32 == filter.user_data_32)
            .filter(|a| filter.ledger == 0 || a.ledger == filter.ledger)
            .filter(|a| filter.code == 0 || a.code == filter.code)
            .collect();

        matching.sort_by_key(|a| a.timestamp);
        if filter.flags.contains(QueryFilterFlags::REVERSED) {
            matching.reverse();
        }
        Ok(matching.into_iter().take(filter.limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{account_id, company_account_id};
    use crate::types::{TransferCode, ACCOUNT_CODE};

    fn account(id: AccountId, ledger: u32, flags: AccountFlags) -> Account {
        Account {
            id,
            ledger,
            code: ACCOUNT_CODE,
            flags,
            ..Default::default()
        }
    }

    fn transfer(id: u128, debit: AccountId, credit: AccountId, amount: u128) -> Transfer {
        Transfer {
            id,
            debit_account_id: debit,
            credit_account_id: credit,
            amount,
            ledger: 1,
            code: TransferCode::Normal.as_u16(),
            ..Default::default()
        }
    }

    async fn seeded() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        let results = ledger
            .create_accounts(&[
                account(company_account_id(1), 1, AccountFlags::HISTORY),
                account(
                    account_id(1, 7),
                    1,
                    AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS | AccountFlags::HISTORY,
                ),
            ])
            .await
            .unwrap();
        assert!(results.is_empty());
        ledger
    }

    #[tokio::test]
    async fn test_overdraft_rejected_per_event() {
        let ledger = seeded().await;
        let company = company_account_id(1);
        let user = account_id(1, 7);

        let results = ledger
            .create_transfers(&[
                transfer(1, company, user, 1000),
                transfer(2, user, company, 600),
                transfer(3, user, company, 600),
            ])
            .await
            .unwrap();

        assert_eq!(results, vec![(2, CreateTransferResult::ExceedsCredits)]);
        let user_account = ledger.account(user).unwrap();
        assert_eq!(user_account.credits_posted, 1000);
        assert_eq!(user_account.debits_posted, 600);
    }

    #[tokio::test]
    async fn test_replay_reports_exists() {
        let ledger = seeded().await;
        let t = transfer(9, company_account_id(1), account_id(1, 7), 50);
        assert!(ledger.create_transfers(&[t.clone()]).await.unwrap().is_empty());

        let replay = ledger.create_transfers(&[t.clone()]).await.unwrap();
        assert_eq!(replay, vec![(0, CreateTransferResult::Exists)]);

        let changed = Transfer { amount: 51, ..t };
        let replay = ledger.create_transfers(&[changed]).await.unwrap();
        assert_eq!(replay, vec![(0, CreateTransferResult::ExistsWithDifferentAmount)]);
        assert_eq!(ledger.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_account_transfers_newest_first() {
        let ledger = seeded().await;
        let company = company_account_id(1);
        let user = account_id(1, 7);
        ledger
            .create_transfers(&[transfer(1, company, user, 10), transfer(2, company, user, 20)])
            .await
            .unwrap();

        let filter = AccountFilter {
            account_id: user,
            limit: 1,
            flags: AccountFilterFlags::DEBITS | AccountFilterFlags::CREDITS | AccountFilterFlags::REVERSED,
            ..Default::default()
        };
        let latest = ledger.get_account_transfers(&filter).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, 2);

        let balances = ledger
            .get_account_balances(&AccountFilter { limit: 10, ..filter })
            .await
            .unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].credits_posted, 30);
        assert_eq!(balances[1].credits_posted, 10);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let ledger = seeded().await;
        ledger.fail(LedgerOperation::LookupAccounts);
        assert!(ledger.lookup_accounts(&[account_id(1, 7)]).await.is_err());
        ledger.recover(LedgerOperation::LookupAccounts);
        assert_eq!(ledger.lookup_accounts(&[account_id(1, 7)]).await.unwrap().len(), 1);
        assert_eq!(ledger.calls(LedgerOperation::LookupAccounts), 2);
    }

    #[tokio::test]
    async fn test_closed_debit_account() {
        let ledger = seeded().await;
        let user = account_id(1, 7);
        ledger.set_account_flags(user, AccountFlags::CLOSED);
        let results = ledger
            .create_transfers(&[transfer(1, user, company_account_id(1), 1)])
            .await
            .unwrap();
        assert_eq!(results, vec![(0, CreateTransferResult::DebitAccountAlreadyClosed)]);
    }
}
