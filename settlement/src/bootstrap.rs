//! Startup check that every active currency has its company account

use ledger_core::{LedgerClient, ids};
use std::collections::HashSet;
use tracing::{error, info};

use crate::{
    provisioning::company_account,
    store::MetadataStore,
    types::CurrencyState,
    Error, Result,
};

/// Create missing company accounts for all Active currencies.
///
/// Returns how many accounts were created. Any ledger refusal other than
/// `exists` fails startup.
pub async fn ensure_company_accounts(ledger: &dyn LedgerClient, store: &dyn MetadataStore) -> Result<usize> {
    let currencies = store.list_currencies(Some(CurrencyState::Active)).await?;
    if currencies.is_empty() {
        info!("No active currencies, nothing to bootstrap");
        return Ok(0);
    }

    let wanted: Vec<u128> = currencies.iter().map(|c| ids::company_account_id(c.id)).collect();
    let present: HashSet<u128> = ledger
        .lookup_accounts(&wanted)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();

    let missing: Vec<_> = currencies
        .iter()
        .filter(|c| !present.contains(&ids::company_account_id(c.id)))
        .map(|c| company_account(c.id))
        .collect();
    if missing.is_empty() {
        info!("All {} company accounts present", currencies.len());
        return Ok(0);
    }

    let results = ledger.create_accounts(&missing).await?;
    let failures: Vec<String> = results
        .iter()
        .filter(|(_, result)| !result.is_exists())
        .map(|(index, result)| {
            let id = missing.get(*index as usize).map(|a| a.id).unwrap_or_default();
            format!("{}: {}", id, result)
        })
        .collect();
    if !failures.is_empty() {
        error!("❌ Company account bootstrap failed: {}", failures.join(", "));
        return Err(Error::Provisioning(format!(
            "could not create company accounts: {}",
            failures.join(", ")
        )));
    }

    let created = missing.len() - results.len();
    info!("✅ Created {} missing company accounts", created);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMetadataStore;
    use ledger_core::{LedgerOperation, MemoryLedger};

    #[tokio::test]
    async fn test_creates_only_missing_accounts() {
        let ledger = MemoryLedger::new();
        let store = MemoryMetadataStore::new();
        store.put_active_currency(840, "USD");
        store.put_active_currency(978, "EUR");
        ledger.create_accounts(&[company_account(840)]).await.unwrap();

        assert_eq!(ensure_company_accounts(&ledger, &store).await.unwrap(), 1);
        assert!(ledger.account(ids::company_account_id(978)).is_some());
        assert_eq!(ensure_company_accounts(&ledger, &store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_failure_aborts_startup() {
        let ledger = MemoryLedger::new();
        let store = MemoryMetadataStore::new();
        store.put_active_currency(840, "USD");
        ledger.fail(LedgerOperation::LookupAccounts);
        assert!(ensure_company_accounts(&ledger, &store).await.is_err());
    }
}
