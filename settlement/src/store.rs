//! Metadata store seam
//!
//! Currencies and runtime parameters live in a relational store reached
//! through stored functions. Each call answers with a status string; anything
//! but [`STATUS_OK`] is surfaced as [`Error::Rejected`]. Transport trouble is
//! [`Error::Store`].

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::{
    types::{Currency, CurrencyState, NewCurrency, Parameter},
    Error, Result,
};

/// Status returned by successful store calls
pub const STATUS_OK: &str = "OK";

/// Turn a store status into a result
pub fn check_status(status: &str) -> Result<()> {
    if status.trim().eq_ignore_ascii_case(STATUS_OK) {
        Ok(())
    } else {
        Err(Error::Rejected(status.trim().to_string()))
    }
}

/// Currency and parameter storage
#[async_trait]
pub trait MetadataStore: Send + Sync + std::fmt::Debug {
    /// Currency by id
    async fn get_currency(&self, id: u32) -> Result<Option<Currency>>;

    /// All currencies, optionally only those in `state`
    async fn list_currencies(&self, state: Option<CurrencyState>) -> Result<Vec<Currency>>;

    /// Insert a Pending row; rejected when the id is taken
    async fn create_pending_currency(&self, currency: &NewCurrency) -> Result<Currency>;

    /// Mark Active and record the company account
    async fn activate_currency(&self, id: u32, company_account_id: u128) -> Result<Currency>;

    /// Mark Inactive
    async fn deactivate_currency(&self, id: u32) -> Result<Currency>;

    /// Delete a row that is not Active
    async fn delete_currency(&self, id: u32) -> Result<()>;

    /// Runtime parameter by name
    async fn get_parameter(&self, name: &str) -> Result<Option<Parameter>>;
}

/// Store operations that can be made to fail in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// [`MetadataStore::get_currency`] and [`MetadataStore::list_currencies`]
    ReadCurrency,
    /// [`MetadataStore::create_pending_currency`]
    CreateCurrency,
    /// [`MetadataStore::activate_currency`]
    ActivateCurrency,
    /// [`MetadataStore::deactivate_currency`]
    DeactivateCurrency,
    /// [`MetadataStore::delete_currency`]
    DeleteCurrency,
    /// [`MetadataStore::get_parameter`]
    ReadParameter,
}

#[derive(Debug, Default)]
struct State {
    currencies: BTreeMap<u32, Currency>,
    parameters: HashMap<String, Parameter>,
    failing: HashMap<StoreOperation, FailureMode>,
    reads: usize,
}

#[derive(Debug, Clone, Copy)]
enum FailureMode {
    Unavailable,
    Refused,
}

/// In-memory [`MetadataStore`]
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    state: Mutex<State>,
}

impl MemoryMetadataStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a currency row directly
    pub fn put_currency(&self, currency: Currency) {
        self.state.lock().currencies.insert(currency.id, currency);
    }

    /// Insert an Active currency with its company account id
    pub fn put_active_currency(&self, id: u32, code: &str) {
        self.put_currency(Currency {
            id,
            code: code.to_string(),
            name: code.to_string(),
            state: CurrencyState::Active,
            company_account_id: Some(ledger_core::ids::company_account_id(id)),
            created_at: Utc::now(),
        });
    }

    /// Insert or replace a parameter
    pub fn set_parameter(&self, name: &str, value: &str) {
        self.state.lock().parameters.insert(
            name.to_string(),
            Parameter {
                name: name.to_string(),
                value: value.to_string(),
                description: String::new(),
                modifiable: true,
            },
        );
    }

    /// Make `op` fail with a transport error
    pub fn fail(&self, op: StoreOperation) {
        self.state.lock().failing.insert(op, FailureMode::Unavailable);
    }

    /// Make `op` answer with a non-OK status
    pub fn refuse(&self, op: StoreOperation) {
        self.state.lock().failing.insert(op, FailureMode::Refused);
    }

    /// Undo [`Self::fail`] / [`Self::refuse`]
    pub fn recover(&self, op: StoreOperation) {
        self.state.lock().failing.remove(&op);
    }

    /// Currency row, bypassing failure injection
    pub fn currency(&self, id: u32) -> Option<Currency> {
        self.state.lock().currencies.get(&id).cloned()
    }

    /// Number of currency reads served
    pub fn currency_reads(&self) -> usize {
        self.state.lock().reads
    }

    fn guard(state: &State, op: StoreOperation) -> Result<()> {
        match state.failing.get(&op) {
            None => Ok(()),
            Some(FailureMode::Unavailable) => Err(Error::Store(format!("{:?}: connection refused", op))),
            Some(FailureMode::Refused) => Err(Error::Rejected(format!("{:?} refused by store", op))),
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_currency(&self, id: u32) -> Result<Option<Currency>> {
        let mut state = self.state.lock();
        Self::guard(&state, StoreOperation::ReadCurrency)?;
        state.reads += 1;
        Ok(state.currencies.get(&id).cloned())
    }

    async fn list_currencies(&self, filter: Option<CurrencyState>) -> Result<Vec<Currency>> {
        let mut state = self.state.lock();
        Self::guard(&state, StoreOperation::ReadCurrency)?;
        state.reads += 1;
        Ok(state
            .currencies
            .values()
            .filter(|c| filter.map_or(true, |s| c.state == s))
            .cloned()
            .collect())
    }

    async fn create_pending_currency(&self, currency: &NewCurrency) -> Result<Currency> {
        let mut state = self.state.lock();
        Self::guard(&state, StoreOperation::CreateCurrency)?;
        if state.currencies.contains_key(&currency.id) {
            return Err(Error::Conflict(format!("currency {} already exists", currency.id)));
        }
        let row = Currency {
            id: currency.id,
            code: currency.code.clone(),
            name: currency.name.clone(),
            state: CurrencyState::Pending,
            company_account_id: None,
            created_at: Utc::now(),
        };
        state.currencies.insert(row.id, row.clone());
        Ok(row)
    }

    async fn activate_currency(&self, id: u32, company_account_id: u128) -> Result<Currency> {
        let mut state = self.state.lock();
        Self::guard(&state, StoreOperation::ActivateCurrency)?;
        let row = state.currencies.get_mut(&id).ok_or(Error::CurrencyNotFound(id))?;
        row.state = CurrencyState::Active;
        row.company_account_id = Some(company_account_id);
        Ok(row.clone())
    }

    async fn deactivate_currency(&self, id: u32) -> Result<Currency> {
        let mut state = self.state.lock();
        Self::guard(&state, StoreOperation::DeactivateCurrency)?;
        let row = state.currencies.get_mut(&id).ok_or(Error::CurrencyNotFound(id))?;
        row.state = CurrencyState::Inactive;
        Ok(row.clone())
    }

    async fn delete_currency(&self, id: u32) -> Result<()> {
        let mut state = self.state.lock();
        Self::guard(&state, StoreOperation::DeleteCurrency)?;
        let active = state
            .currencies
            .get(&id)
            .map(Currency::is_active)
            .ok_or(Error::CurrencyNotFound(id))?;
        if active {
            return Err(Error::Rejected(format!("currency {} is active", id)));
        }
        state.currencies.remove(&id);
        Ok(())
    }

    async fn get_parameter(&self, name: &str) -> Result<Option<Parameter>> {
        let state = self.state.lock();
        Self::guard(&state, StoreOperation::ReadParameter)?;
        Ok(state.parameters.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> NewCurrency {
        NewCurrency {
            id: 840,
            code: "USD".into(),
            name: "US Dollar".into(),
        }
    }

    #[test]
    fn test_status_check() {
        assert!(check_status("OK").is_ok());
        assert!(check_status(" ok ").is_ok());
        assert!(matches!(check_status("currency exists"), Err(Error::Rejected(m)) if m == "currency exists"));
    }

    #[tokio::test]
    async fn test_currency_lifecycle() {
        let store = MemoryMetadataStore::new();
        let row = store.create_pending_currency(&usd()).await.unwrap();
        assert_eq!(row.state, CurrencyState::Pending);
        assert!(matches!(
            store.create_pending_currency(&usd()).await,
            Err(Error::Conflict(_))
        ));

        let row = store.activate_currency(840, 99).await.unwrap();
        assert!(row.is_active());
        assert!(matches!(store.delete_currency(840).await, Err(Error::Rejected(_))));

        store.deactivate_currency(840).await.unwrap();
        store.delete_currency(840).await.unwrap();
        assert!(store.get_currency(840).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let store = MemoryMetadataStore::new();
        store.put_active_currency(1, "AAA");
        store.create_pending_currency(&usd()).await.unwrap();

        let active = store.list_currencies(Some(CurrencyState::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(store.list_currencies(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryMetadataStore::new();
        store.fail(StoreOperation::ReadCurrency);
        assert!(store.get_currency(1).await.unwrap_err().is_infra());

        store.refuse(StoreOperation::ReadParameter);
        assert!(matches!(store.get_parameter("X").await, Err(Error::Rejected(_))));

        store.recover(StoreOperation::ReadCurrency);
        assert!(store.get_currency(1).await.unwrap().is_none());
    }
}
