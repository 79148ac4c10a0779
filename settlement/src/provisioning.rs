//! Currency provisioning saga
//!
//! A currency spans two systems: its row in the metadata store and its
//! company account on the ledger. Steps:
//!
//! 1. Insert the row as Pending
//! 2. Create the company account (overdraft permitted)
//! 3. Mark the row Active with the company account id
//!
//! When step 2 fails the row is deleted. When step 3 fails the row is deleted
//! and the ledger account stays behind; ledger accounts cannot be removed,
//! and a later retry adopts it because it has no transfers.

use ledger_core::{
    ids, Account, AccountFilter, AccountFilterFlags, AccountFlags, CreateAccountResult, LedgerClient,
    ACCOUNT_CODE,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    cache::CurrencyCache,
    store::MetadataStore,
    types::{Currency, NewCurrency},
    Error, Result,
};

/// Company account of a currency as the ledger stores it
pub fn company_account(currency_id: u32) -> Account {
    Account {
        id: ids::company_account_id(currency_id),
        user_data_64: ids::COMPANY_OWNER_ID,
        user_data_32: ids::date_marker_now(),
        ledger: currency_id,
        code: ACCOUNT_CODE,
        flags: AccountFlags::HISTORY,
        ..Default::default()
    }
}

/// Creates currencies together with their company accounts
#[derive(Debug, Clone)]
pub struct CurrencyProvisioner {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<CurrencyCache>,
}

impl CurrencyProvisioner {
    /// New provisioner
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<dyn MetadataStore>, cache: Arc<CurrencyCache>) -> Self {
        Self { ledger, store, cache }
    }

    /// Run the saga for `currency`
    pub async fn provision(&self, currency: NewCurrency) -> Result<Currency> {
        if currency.id == 0 {
            return Err(Error::Validation("currency id must not be zero".to_string()));
        }
        if currency.code.trim().is_empty() {
            return Err(Error::Validation("currency code is required".to_string()));
        }

        self.store.create_pending_currency(&currency).await?;
        info!("Currency {} ({}) registered as pending", currency.id, currency.code);

        let company_id = match self.ensure_company_account(currency.id).await {
            Ok(id) => id,
            Err(e) => {
                error!("❌ Company account for currency {} failed: {}", currency.id, e);
                self.compensate(currency.id).await;
                return Err(e);
            }
        };

        let activated = match self.store.activate_currency(currency.id, company_id).await {
            Ok(row) => row,
            Err(e) => {
                error!(
                    "❌ Activating currency {} failed, company account {} stays on the ledger: {}",
                    currency.id, company_id, e
                );
                self.compensate(currency.id).await;
                return Err(e);
            }
        };

        self.cache.invalidate(currency.id);
        info!("✅ Currency {} active with company account {}", currency.id, company_id);
        Ok(activated)
    }

    async fn ensure_company_account(&self, currency_id: u32) -> Result<u128> {
        let account = company_account(currency_id);
        let results = self.ledger.create_accounts(std::slice::from_ref(&account)).await?;

        match results.first().map(|(_, result)| *result) {
            None => Ok(account.id),
            Some(CreateAccountResult::Exists | CreateAccountResult::ExistsWithDifferentUserData32) => {
                let filter = AccountFilter {
                    account_id: account.id,
                    limit: 1,
                    flags: AccountFilterFlags::DEBITS | AccountFilterFlags::CREDITS,
                    ..Default::default()
                };
                if self.ledger.get_account_transfers(&filter).await?.is_empty() {
                    warn!("Reusing existing company account {} without history", account.id);
                    Ok(account.id)
                } else {
                    Err(Error::Provisioning(format!(
                        "company account {} already exists and has transfers",
                        account.id
                    )))
                }
            }
            Some(result) => Err(Error::Provisioning(format!(
                "ledger refused company account {}: {}",
                account.id, result
            ))),
        }
    }

    async fn compensate(&self, currency_id: u32) {
        match self.store.delete_currency(currency_id).await {
            Ok(()) => info!("Compensated: pending currency {} removed", currency_id),
            Err(e) => error!(
                "🚨 Compensation failed, pending currency {} left in store: {}",
                currency_id, e
            ),
        }
        self.cache.invalidate(currency_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryMetadataStore, StoreOperation};
    use crate::types::CurrencyState;
    use ledger_core::{LedgerOperation, MemoryLedger, Transfer};
    use std::time::Duration;

    fn usd() -> NewCurrency {
        NewCurrency {
            id: 840,
            code: "USD".into(),
            name: "US Dollar".into(),
        }
    }

    fn saga() -> (Arc<MemoryLedger>, Arc<MemoryMetadataStore>, CurrencyProvisioner) {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryMetadataStore::new());
        let cache = Arc::new(CurrencyCache::new(store.clone(), Duration::from_secs(15)));
        let provisioner = CurrencyProvisioner::new(ledger.clone(), store.clone(), cache);
        (ledger, store, provisioner)
    }

    #[tokio::test]
    async fn test_happy_path() {
        let (ledger, store, provisioner) = saga();
        let currency = provisioner.provision(usd()).await.unwrap();

        assert_eq!(currency.state, CurrencyState::Active);
        assert_eq!(currency.company_account_id, Some(ids::company_account_id(840)));
        let account = ledger.account(ids::company_account_id(840)).unwrap();
        assert!(!account.forbids_overdraft());
        assert_eq!(store.currency(840).unwrap().state, CurrencyState::Active);
    }

    #[tokio::test]
    async fn test_ledger_failure_removes_row() {
        let (ledger, store, provisioner) = saga();
        ledger.fail(LedgerOperation::CreateAccounts);

        assert!(provisioner.provision(usd()).await.is_err());
        assert!(store.currency(840).is_none());
    }

    #[tokio::test]
    async fn test_activation_failure_keeps_account() {
        let (ledger, store, provisioner) = saga();
        store.fail(StoreOperation::ActivateCurrency);

        assert!(provisioner.provision(usd()).await.is_err());
        assert!(store.currency(840).is_none());
        assert!(ledger.account(ids::company_account_id(840)).is_some());

        store.recover(StoreOperation::ActivateCurrency);
        let retried = provisioner.provision(usd()).await.unwrap();
        assert!(retried.is_active());
    }

    #[tokio::test]
    async fn test_existing_account_with_history_is_refused() {
        let (ledger, store, provisioner) = saga();
        let mut user = company_account(840);
        user.id = ids::account_id(840, 5);
        ledger
            .create_accounts(&[company_account(840), user.clone()])
            .await
            .unwrap();
        ledger
            .create_transfers(&[Transfer {
                id: 1,
                debit_account_id: ids::company_account_id(840),
                credit_account_id: user.id,
                amount: 1,
                ledger: 840,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();

        let err = provisioner.provision(usd()).await.unwrap_err();
        assert!(matches!(err, Error::Provisioning(_)));
        assert!(store.currency(840).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_currency_is_conflict() {
        let (_, _, provisioner) = saga();
        provisioner.provision(usd()).await.unwrap();
        assert!(matches!(provisioner.provision(usd()).await, Err(Error::Conflict(_))));
    }
}
