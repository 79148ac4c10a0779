//! Currency administration

use std::sync::Arc;
use tracing::info;

use crate::{
    cache::CurrencyCache,
    store::MetadataStore,
    types::{Currency, CurrencyState},
    Error, Result,
};

/// Reads and state changes of existing currencies.
///
/// Creation goes through [`crate::CurrencyProvisioner`].
#[derive(Debug, Clone)]
pub struct CurrencyService {
    store: Arc<dyn MetadataStore>,
    cache: Arc<CurrencyCache>,
}

impl CurrencyService {
    /// New service
    pub fn new(store: Arc<dyn MetadataStore>, cache: Arc<CurrencyCache>) -> Self {
        Self { store, cache }
    }

    /// Currency by id
    pub async fn get(&self, id: u32) -> Result<Currency> {
        self.store
            .get_currency(id)
            .await?
            .ok_or(Error::CurrencyNotFound(id))
    }

    /// Active currencies, or every currency when `include_inactive` is set
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Currency>> {
        let filter = if include_inactive {
            None
        } else {
            Some(CurrencyState::Active)
        };
        self.store.list_currencies(filter).await
    }

    /// Re-enable a currency whose company account already exists
    pub async fn activate(&self, id: u32) -> Result<Currency> {
        let current = self.get(id).await?;
        let company_account_id = current.company_account_id.ok_or_else(|| {
            Error::Validation(format!("currency {} has no company account", id))
        })?;

        let result = self.store.activate_currency(id, company_account_id).await;
        self.cache.invalidate(id);
        let currency = result?;
        info!("Currency {} activated", id);
        Ok(currency)
    }

    /// Stop accepting movements in a currency
    pub async fn deactivate(&self, id: u32) -> Result<Currency> {
        let result = self.store.deactivate_currency(id).await;
        self.cache.invalidate(id);
        let currency = result?;
        info!("Currency {} deactivated", id);
        Ok(currency)
    }

    /// Remove a currency that is not Active
    pub async fn delete(&self, id: u32) -> Result<()> {
        let current = self.get(id).await?;
        if current.is_active() {
            return Err(Error::Validation(format!(
                "currency {} is active; deactivate it first",
                id
            )));
        }
        let result = self.store.delete_currency(id).await;
        self.cache.invalidate(id);
        result?;
        info!("Currency {} deleted", id);
        Ok(())
    }
}
