//! Account and transfer queries
//!
//! Thin read/write helpers over the ledger used by the admin surface.
//! Account state is derived from the ledger flags: `A` open, `I` closed.

use ledger_core::{
    ids, Account, AccountBalance, AccountFilter, AccountFlags, CreateAccountResult, LedgerClient,
    QueryFilter, QueryFilterFlags, Transfer, TransferCode, ACCOUNT_CODE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{cache::CurrencyCache, types::reasons, Error, Result};

/// Hard cap on accounts scanned by one search
pub const SEARCH_SCAN_CAP: usize = 50_000;

/// Largest page a search may ask for
pub const MAX_SEARCH_LIMIT: u32 = 500;

/// Default page size for searches
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;

/// Default number of balance snapshots
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Request to open a user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    /// Owner; must not be zero
    pub owner_id: u64,
    /// Currency; must be Active
    pub currency_id: u32,
    /// Opening date, defaults to now
    #[serde(default)]
    pub opened_at: Option<String>,
    /// Permit negative balances
    #[serde(default)]
    pub allow_overdraft: bool,
}

/// Account as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    /// Composite id
    #[serde(with = "crate::types::u128_string")]
    pub id: u128,
    /// Owner
    pub owner_id: u64,
    /// Currency
    pub currency_id: u32,
    /// Posted debits
    #[serde(with = "crate::types::u128_string")]
    pub debits: u128,
    /// Posted credits
    #[serde(with = "crate::types::u128_string")]
    pub credits: u128,
    /// Credits minus debits, may be negative
    pub balance: String,
    /// `A` open, `I` closed
    pub state: String,
    /// Whether negative balances are permitted
    pub allow_overdraft: bool,
    /// Opening date
    pub opened_at: Option<String>,
    /// Ledger registration time
    pub registered_at: Option<String>,
    /// Ledger timestamp, usable as a search cursor
    pub timestamp: u64,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            owner_id: account.owner_id(),
            currency_id: account.ledger,
            debits: account.debits_posted,
            credits: account.credits_posted,
            balance: signed_balance(account.credits_posted, account.debits_posted),
            state: if account.is_closed() { "I" } else { "A" }.to_string(),
            allow_overdraft: !account.forbids_overdraft(),
            opened_at: (account.user_data_32 != 0).then(|| ids::format_date_marker(account.user_data_32)),
            registered_at: (account.timestamp != 0).then(|| ids::format_ledger_timestamp(account.timestamp)),
            timestamp: account.timestamp,
        }
    }
}

/// Transfer as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferView {
    /// Transfer id
    #[serde(with = "crate::types::u128_string")]
    pub id: u128,
    /// Debited account
    #[serde(with = "crate::types::u128_string")]
    pub debit_account_id: u128,
    /// Credited account
    #[serde(with = "crate::types::u128_string")]
    pub credit_account_id: u128,
    /// Amount in minor units
    #[serde(with = "crate::types::u128_string")]
    pub amount: u128,
    /// Currency
    pub currency_id: u32,
    /// `normal` or `reversal`
    pub kind: String,
    /// Business category
    pub category: u64,
    /// Transfer undone by this one
    #[serde(with = "crate::types::opt_u128_string")]
    pub reverses: Option<u128>,
    /// Business date
    pub date: Option<String>,
    /// Ledger registration time
    pub registered_at: Option<String>,
}

impl From<&Transfer> for TransferView {
    fn from(transfer: &Transfer) -> Self {
        let reversal = transfer.code == TransferCode::Reversal.as_u16();
        Self {
            id: transfer.id,
            debit_account_id: transfer.debit_account_id,
            credit_account_id: transfer.credit_account_id,
            amount: transfer.amount,
            currency_id: transfer.ledger,
            kind: if reversal { "reversal" } else { "normal" }.to_string(),
            category: transfer.category(),
            reverses: reversal.then_some(transfer.user_data_128),
            date: (transfer.user_data_32 != 0).then(|| ids::format_date_marker(transfer.user_data_32)),
            registered_at: (transfer.timestamp != 0).then(|| ids::format_ledger_timestamp(transfer.timestamp)),
        }
    }
}

/// One balance snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    /// Posted debits
    #[serde(with = "crate::types::u128_string")]
    pub debits: u128,
    /// Posted credits
    #[serde(with = "crate::types::u128_string")]
    pub credits: u128,
    /// Credits minus debits, may be negative
    pub balance: String,
    /// Ledger timestamp of the change
    pub timestamp: u64,
}

impl From<&AccountBalance> for BalanceEntry {
    fn from(snapshot: &AccountBalance) -> Self {
        Self {
            debits: snapshot.debits_posted,
            credits: snapshot.credits_posted,
            balance: signed_balance(snapshot.credits_posted, snapshot.debits_posted),
            timestamp: snapshot.timestamp,
        }
    }
}

/// Balance history of one account, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceHistory {
    /// Owner
    pub owner_id: u64,
    /// Currency
    pub currency_id: u32,
    /// Number of entries
    pub total: usize,
    /// Snapshots
    pub entries: Vec<BalanceEntry>,
}

/// Account search criteria; zero disables a filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSearch {
    /// Owner filter
    #[serde(default)]
    pub owner_id: u64,
    /// Currency filter
    #[serde(default)]
    pub currency_id: u32,
    /// `A` or `I`
    #[serde(default)]
    pub state: Option<String>,
    /// Page size, default [`DEFAULT_SEARCH_LIMIT`]
    #[serde(default)]
    pub limit: Option<u32>,
    /// Continue after this cursor
    #[serde(default)]
    pub cursor: Option<u64>,
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPage {
    /// Number of accounts in this page
    pub total: usize,
    /// Accounts
    pub accounts: Vec<AccountView>,
    /// Cursor for the next page, absent on the last one
    pub next_cursor: Option<u64>,
}

/// Balance history query; zero timestamps are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Lower bound
    #[serde(default)]
    pub timestamp_min: u64,
    /// Upper bound
    #[serde(default)]
    pub timestamp_max: u64,
    /// Maximum entries, default [`DEFAULT_HISTORY_LIMIT`]
    #[serde(default)]
    pub limit: Option<u32>,
}

fn signed_balance(credits: u128, debits: u128) -> String {
    if credits >= debits {
        (credits - debits).to_string()
    } else {
        format!("-{}", debits - credits)
    }
}

/// Account and transfer operations for the admin surface
#[derive(Debug, Clone)]
pub struct AccountService {
    ledger: Arc<dyn LedgerClient>,
    cache: Arc<CurrencyCache>,
}

impl AccountService {
    /// New service
    pub fn new(ledger: Arc<dyn LedgerClient>, cache: Arc<CurrencyCache>) -> Self {
        Self { ledger, cache }
    }

    /// Open one user account
    pub async fn create_account(&self, request: NewAccount) -> Result<AccountView> {
        let account = self.build_account(&request).await?;
        let results = self.ledger.create_accounts(std::slice::from_ref(&account)).await?;

        if let Some((_, result)) = results.first() {
            return Err(match result {
                CreateAccountResult::Exists | CreateAccountResult::ExistsWithDifferentUserData32 => {
                    Error::Conflict(format!("account {} already exists", account.id))
                }
                CreateAccountResult::ExistsWithDifferentFlags => {
                    Error::Conflict(format!("account {} already exists with other settings", account.id))
                }
                other => Error::Validation(format!("ledger refused account {}: {}", account.id, other)),
            });
        }

        info!("Account {} opened for owner {}", account.id, request.owner_id);
        self.get_account(request.currency_id, request.owner_id).await
    }

    /// Open several accounts in one ledger call.
    ///
    /// Every request is checked before anything is written. Returns the new
    /// account ids in request order.
    pub async fn create_accounts(&self, requests: Vec<NewAccount>) -> Result<Vec<u128>> {
        let mut accounts = Vec::with_capacity(requests.len());
        for request in &requests {
            accounts.push(self.build_account(request).await?);
        }
        if accounts.is_empty() {
            return Ok(Vec::new());
        }

        let results = self.ledger.create_accounts(&accounts).await?;
        if !results.is_empty() {
            for (index, result) in &results {
                if let Some(account) = accounts.get(*index as usize) {
                    error!("❌ Account {} not created: {}", account.id, result);
                }
            }
            return Err(Error::Validation(format!(
                "{} of {} accounts could not be created",
                results.len(),
                accounts.len()
            )));
        }

        info!("Opened {} accounts", accounts.len());
        Ok(accounts.iter().map(|a| a.id).collect())
    }

    async fn build_account(&self, request: &NewAccount) -> Result<Account> {
        if request.owner_id == ids::COMPANY_OWNER_ID {
            return Err(Error::Validation("owner id must not be zero".to_string()));
        }
        let currency = self
            .cache
            .get(request.currency_id)
            .await?
            .ok_or(Error::CurrencyNotFound(request.currency_id))?;
        if !currency.is_active() {
            return Err(Error::Validation(reasons::CURRENCY_NOT_ACTIVE.to_string()));
        }

        let opened_at = match request.opened_at.as_deref() {
            Some(raw) if !raw.trim().is_empty() => ids::parse_date_marker(raw)
                .map_err(|e| Error::Validation(format!("invalid opening date: {}", e)))?,
            _ => ids::date_marker_now(),
        };

        let mut flags = AccountFlags::HISTORY;
        if !request.allow_overdraft {
            flags = flags | AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS;
        }

        Ok(Account {
            id: ids::account_id(request.currency_id, request.owner_id),
            user_data_64: request.owner_id,
            user_data_32: opened_at,
            ledger: request.currency_id,
            code: ACCOUNT_CODE,
            flags,
            ..Default::default()
        })
    }

    /// Account of `owner_id` in `currency_id`
    pub async fn get_account(&self, currency_id: u32, owner_id: u64) -> Result<AccountView> {
        self.get_account_by_id(ids::account_id(currency_id, owner_id)).await
    }

    /// Account by composite id
    pub async fn get_account_by_id(&self, id: u128) -> Result<AccountView> {
        let accounts = self.ledger.lookup_accounts(&[id]).await?;
        accounts
            .iter()
            .find(|a| a.id == id)
            .map(AccountView::from)
            .ok_or(Error::AccountNotFound(id))
    }

    /// Transfer by id
    pub async fn get_transfer(&self, id: u128) -> Result<TransferView> {
        let transfers = self.ledger.lookup_transfers(&[id]).await?;
        transfers
            .iter()
            .find(|t| t.id == id)
            .map(TransferView::from)
            .ok_or(Error::TransferNotFound(id))
    }

    /// Search accounts, oldest first, with cursor pagination
    pub async fn search_accounts(&self, search: &AccountSearch) -> Result<AccountPage> {
        let limit = search.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if limit == 0 || limit > MAX_SEARCH_LIMIT {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }
        let closed = match search.state.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("A") => Some(false),
            Some("I") => Some(true),
            Some(other) => {
                return Err(Error::Validation(format!("state must be 'A' or 'I', got '{}'", other)))
            }
        };

        let mut found: Vec<Account> = Vec::new();
        let mut scanned = 0usize;
        let mut cursor = search.cursor.unwrap_or_default();
        let mut exhausted = false;

        while found.len() < limit as usize {
            let wanted = limit - found.len() as u32;
            let filter = QueryFilter {
                user_data_64: search.owner_id,
                ledger: search.currency_id,
                code: ACCOUNT_CODE,
                timestamp_min: cursor,
                limit: wanted,
                flags: QueryFilterFlags::NONE,
                ..Default::default()
            };
            let page = self.ledger.query_accounts(&filter).await?;
            debug!("Account search page: {} results from cursor {}", page.len(), cursor);

            let Some(last) = page.last() else {
                exhausted = true;
                break;
            };
            cursor = last.timestamp + 1;
            scanned += page.len();
            let short = (page.len() as u32) < wanted;

            found.extend(
                page.into_iter()
                    .filter(|a| closed.map_or(true, |c| a.is_closed() == c)),
            );

            if short {
                exhausted = true;
                break;
            }
            if scanned >= SEARCH_SCAN_CAP {
                warn!("⚠️  Account search stopped at the scan cap of {}", SEARCH_SCAN_CAP);
                break;
            }
        }

        let accounts: Vec<AccountView> = found.iter().map(AccountView::from).collect();
        Ok(AccountPage {
            total: accounts.len(),
            accounts,
            next_cursor: (!exhausted).then_some(cursor),
        })
    }

    /// Balance snapshots of one account, newest first
    pub async fn balance_history(&self, currency_id: u32, owner_id: u64, query: HistoryQuery) -> Result<BalanceHistory> {
        let id = ids::account_id(currency_id, owner_id);
        if self.ledger.lookup_accounts(&[id]).await?.is_empty() {
            return Err(Error::AccountNotFound(id));
        }

        let filter = AccountFilter {
            account_id: id,
            timestamp_min: query.timestamp_min,
            timestamp_max: query.timestamp_max,
            limit: query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_HISTORY_LIMIT),
            flags: ledger_core::AccountFilterFlags::DEBITS
                | ledger_core::AccountFilterFlags::CREDITS
                | ledger_core::AccountFilterFlags::REVERSED,
        };
        let entries: Vec<BalanceEntry> = self
            .ledger
            .get_account_balances(&filter)
            .await?
            .iter()
            .map(BalanceEntry::from)
            .collect();

        Ok(BalanceHistory {
            owner_id,
            currency_id,
            total: entries.len(),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMetadataStore;
    use ledger_core::MemoryLedger;
    use std::time::Duration;

    const USD: u32 = 840;

    async fn service() -> (Arc<MemoryLedger>, Arc<MemoryMetadataStore>, AccountService) {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryMetadataStore::new());
        store.put_active_currency(USD, "USD");
        ledger
            .create_accounts(&[crate::provisioning::company_account(USD)])
            .await
            .unwrap();
        let cache = Arc::new(CurrencyCache::new(store.clone(), Duration::from_secs(15)));
        let service = AccountService::new(ledger.clone(), cache);
        (ledger, store, service)
    }

    fn open(owner_id: u64) -> NewAccount {
        NewAccount {
            owner_id,
            currency_id: USD,
            opened_at: Some("2024-03-01".into()),
            allow_overdraft: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let (_, _, service) = service().await;
        let view = service.create_account(open(7)).await.unwrap();
        assert_eq!(view.id, ids::account_id(USD, 7));
        assert_eq!(view.state, "A");
        assert!(!view.allow_overdraft);
        assert_eq!(view.balance, "0");

        assert!(matches!(service.create_account(open(7)).await, Err(Error::Conflict(_))));
        assert!(matches!(
            service.get_account(USD, 8).await,
            Err(Error::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_requires_active_currency() {
        let (_, store, service) = service().await;
        assert!(matches!(
            service.create_account(NewAccount { currency_id: 1, ..open(7) }).await,
            Err(Error::CurrencyNotFound(1))
        ));
        assert!(matches!(service.create_account(open(0)).await, Err(Error::Validation(_))));

        store.put_currency(crate::types::Currency {
            state: crate::types::CurrencyState::Inactive,
            ..store.currency(USD).unwrap()
        });
        let cache = Arc::new(CurrencyCache::new(store.clone(), Duration::from_secs(15)));
        let fresh = AccountService::new(service.ledger.clone(), cache);
        assert!(matches!(fresh.create_account(open(9)).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_search_paginates_with_cursor() {
        let (ledger, _, service) = service().await;
        service
            .create_accounts((1..=5).map(open).collect())
            .await
            .unwrap();
        ledger.set_account_flags(ids::account_id(USD, 3), AccountFlags::HISTORY | AccountFlags::CLOSED);

        let first = service
            .search_accounts(&AccountSearch {
                currency_id: USD,
                limit: Some(3),
                ..Default::default()
            })
            .await
            .unwrap();
        // company account (owner 0) is listed first
        let owners: Vec<u64> = first.accounts.iter().map(|a| a.owner_id).collect();
        assert_eq!(owners, vec![0, 1, 2]);
        let cursor = first.next_cursor.unwrap();

        let rest = service
            .search_accounts(&AccountSearch {
                currency_id: USD,
                limit: Some(10),
                cursor: Some(cursor),
                ..Default::default()
            })
            .await
            .unwrap();
        let owners: Vec<u64> = rest.accounts.iter().map(|a| a.owner_id).collect();
        assert_eq!(owners, vec![3, 4, 5]);
        assert_eq!(rest.next_cursor, None);

        let closed = service
            .search_accounts(&AccountSearch {
                state: Some("I".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(closed.accounts.len(), 1);
        assert_eq!(closed.accounts[0].state, "I");

        assert!(service
            .search_accounts(&AccountSearch {
                limit: Some(501),
                ..Default::default()
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_balance_history_and_transfer_lookup() {
        let (ledger, _, service) = service().await;
        service.create_account(open(7)).await.unwrap();
        ledger
            .create_transfers(&[Transfer {
                id: 77,
                debit_account_id: ids::company_account_id(USD),
                credit_account_id: ids::account_id(USD, 7),
                amount: 250,
                user_data_64: 9,
                ledger: USD,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();

        let history = service
            .balance_history(USD, 7, HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.entries[0].balance, "250");

        let company = service.get_account(USD, 0).await.unwrap();
        assert_eq!(company.balance, "-250");

        let transfer = service.get_transfer(77).await.unwrap();
        assert_eq!(transfer.kind, "normal");
        assert_eq!(transfer.category, 9);
        assert!(matches!(service.get_transfer(78).await, Err(Error::TransferNotFound(78))));
        assert!(matches!(
            service.balance_history(USD, 99, HistoryQuery::default()).await,
            Err(Error::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_views_serialize_ids_as_strings() {
        let view = AccountView::from(&Account {
            id: ids::account_id(USD, 7),
            ledger: USD,
            user_data_64: 7,
            ..Default::default()
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], ids::account_id(USD, 7).to_string());
        assert_eq!(json["ownerId"], 7);
    }
}
