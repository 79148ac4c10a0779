//! gRPC client for the ledger cluster

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::client::LedgerClient;
use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::ids::{from_le_bytes, to_le_bytes};
use crate::metrics::{LEDGER_REQUESTS_TOTAL, LEDGER_REQUEST_DURATION};
use crate::types::{
    Account, AccountBalance, AccountFilter, AccountFlags, AccountId, CreateAccountResult,
    CreateTransferResult, QueryFilter, Transfer, TransferFlags, TransferId,
};

/// Generated protobuf code
#[allow(missing_docs, clippy::all)]
pub mod proto {
    tonic::include_proto!("ledger");
}

use proto::ledger_service_client::LedgerServiceClient;

/// [`LedgerClient`] backed by the cluster's gRPC interface.
///
/// The channel balances requests across every configured replica address.
#[derive(Debug, Clone)]
pub struct GrpcLedgerClient {
    inner: LedgerServiceClient<Channel>,
}

impl GrpcLedgerClient {
    /// Build a lazily connecting client from configuration
    pub fn connect(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;

        let endpoints = config
            .addresses
            .iter()
            .map(|address| {
                let uri = if address.contains("://") {
                    address.clone()
                } else {
                    format!("http://{}", address)
                };
                Endpoint::from_shared(uri).map(|endpoint| {
                    endpoint
                        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
                        .timeout(Duration::from_millis(config.request_timeout_ms))
                        .tcp_keepalive(Some(Duration::from_secs(30)))
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        info!("Ledger client configured for {} replica(s)", endpoints.len());

        let channel = Channel::balance_list(endpoints.into_iter());
        Ok(Self {
            inner: LedgerServiceClient::new(channel),
        })
    }

    fn client(&self) -> LedgerServiceClient<Channel> {
        self.inner.clone()
    }
}

fn record(operation: &str, started: Instant, ok: bool) {
    LEDGER_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
    LEDGER_REQUESTS_TOTAL
        .with_label_values(&[operation, if ok { "ok" } else { "error" }])
        .inc();
}

fn map_status(operation: &str, status: tonic::Status) -> Error {
    match status.code() {
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Cancelled => {
            warn!("Ledger {} unavailable: {}", operation, status.message());
            Error::Unavailable(status.message().to_string())
        }
        _ => Error::Status(status),
    }
}

fn narrow_u16(value: u32, field: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::Decode(format!("{} out of range: {}", field, value)))
}

impl From<&Account> for proto::Account {
    fn from(a: &Account) -> Self {
        Self {
            id: to_le_bytes(a.id),
            debits_pending: to_le_bytes(a.debits_pending),
            debits_posted: to_le_bytes(a.debits_posted),
            credits_pending: to_le_bytes(a.credits_pending),
            credits_posted: to_le_bytes(a.credits_posted),
            user_data_128: to_le_bytes(a.user_data_128),
            user_data_64: a.user_data_64,
            user_data_32: a.user_data_32,
            ledger: a.ledger,
            code: a.code as u32,
            flags: a.flags.bits() as u32,
            timestamp: a.timestamp,
        }
    }
}

impl TryFrom<proto::Account> for Account {
    type Error = Error;

    fn try_from(a: proto::Account) -> Result<Self> {
        Ok(Self {
            id: from_le_bytes(&a.id)?,
            debits_pending: from_le_bytes(&a.debits_pending)?,
            debits_posted: from_le_bytes(&a.debits_posted)?,
            credits_pending: from_le_bytes(&a.credits_pending)?,
            credits_posted: from_le_bytes(&a.credits_posted)?,
            user_data_128: from_le_bytes(&a.user_data_128)?,
            user_data_64: a.user_data_64,
            user_data_32: a.user_data_32,
            ledger: a.ledger,
            code: narrow_u16(a.code, "account code")?,
            flags: AccountFlags::from_bits(narrow_u16(a.flags, "account flags")?),
            timestamp: a.timestamp,
        })
    }
}

impl From<&Transfer> for proto::Transfer {
    fn from(t: &Transfer) -> Self {
        Self {
            id: to_le_bytes(t.id),
            debit_account_id: to_le_bytes(t.debit_account_id),
            credit_account_id: to_le_bytes(t.credit_account_id),
            amount: to_le_bytes(t.amount),
            pending_id: to_le_bytes(t.pending_id),
            user_data_128: to_le_bytes(t.user_data_128),
            user_data_64: t.user_data_64,
            user_data_32: t.user_data_32,
            timeout: t.timeout,
            ledger: t.ledger,
            code: t.code as u32,
            flags: t.flags.bits() as u32,
            timestamp: t.timestamp,
        }
    }
}

impl TryFrom<proto::Transfer> for Transfer {
    type Error = Error;

    fn try_from(t: proto::Transfer) -> Result<Self> {
        Ok(Self {
            id: from_le_bytes(&t.id)?,
            debit_account_id: from_le_bytes(&t.debit_account_id)?,
            credit_account_id: from_le_bytes(&t.credit_account_id)?,
            amount: from_le_bytes(&t.amount)?,
            pending_id: from_le_bytes(&t.pending_id)?,
            user_data_128: from_le_bytes(&t.user_data_128)?,
            user_data_64: t.user_data_64,
            user_data_32: t.user_data_32,
            timeout: t.timeout,
            ledger: t.ledger,
            code: narrow_u16(t.code, "transfer code")?,
            flags: TransferFlags::from_bits(narrow_u16(t.flags, "transfer flags")?),
            timestamp: t.timestamp,
        })
    }
}

impl TryFrom<proto::AccountBalance> for AccountBalance {
    type Error = Error;

    fn try_from(b: proto::AccountBalance) -> Result<Self> {
        Ok(Self {
            debits_pending: from_le_bytes(&b.debits_pending)?,
            debits_posted: from_le_bytes(&b.debits_posted)?,
            credits_pending: from_le_bytes(&b.credits_pending)?,
            credits_posted: from_le_bytes(&b.credits_posted)?,
            timestamp: b.timestamp,
        })
    }
}

impl From<&AccountFilter> for proto::AccountFilter {
    fn from(f: &AccountFilter) -> Self {
        Self {
            account_id: to_le_bytes(f.account_id),
            timestamp_min: f.timestamp_min,
            timestamp_max: f.timestamp_max,
            limit: f.limit,
            flags: f.flags.bits() as u32,
        }
    }
}

impl From<&QueryFilter> for proto::QueryFilter {
    fn from(f: &QueryFilter) -> Self {
        Self {
            user_data_128: to_le_bytes(f.user_data_128),
            user_data_64: f.user_data_64,
            user_data_32: f.user_data_32,
            ledger: f.ledger,
            code: f.code as u32,
            timestamp_min: f.timestamp_min,
            timestamp_max: f.timestamp_max,
            limit: f.limit,
            flags: f.flags.bits() as u32,
        }
    }
}

#[async_trait]
impl LedgerClient for GrpcLedgerClient {
    async fn create_accounts(&self, accounts: &[Account]) -> Result<Vec<(u32, CreateAccountResult)>> {
        let started = Instant::now();
        let request = proto::CreateAccountsRequest {
            accounts: accounts.iter().map(proto::Account::from).collect(),
        };
        let response = self.client().create_accounts(request).await;
        record("create_accounts", started, response.is_ok());

        let results = response.map_err(|s| map_status("create_accounts", s))?.into_inner().results;
        debug!("create_accounts: {} submitted, {} failed", accounts.len(), results.len());
        Ok(results
            .into_iter()
            .map(|r| (r.index, CreateAccountResult::from_code(r.result)))
            .collect())
    }

    async fn create_transfers(&self, transfers: &[Transfer]) -> Result<Vec<(u32, CreateTransferResult)>> {
        let started = Instant::now();
        let request = proto::CreateTransfersRequest {
            transfers: transfers.iter().map(proto::Transfer::from).collect(),
        };
        let response = self.client().create_transfers(request).await;
        record("create_transfers", started, response.is_ok());

        let results = response.map_err(|s| map_status("create_transfers", s))?.into_inner().results;
        debug!("create_transfers: {} submitted, {} failed", transfers.len(), results.len());
        Ok(results
            .into_iter()
            .map(|r| (r.index, CreateTransferResult::from_code(r.result)))
            .collect())
    }

    async fn lookup_accounts(&self, ids: &[AccountId]) -> Result<Vec<Account>> {
        let started = Instant::now();
        let request = proto::LookupRequest {
            ids: ids.iter().copied().map(to_le_bytes).collect(),
        };
        let response = self.client().lookup_accounts(request).await;
        record("lookup_accounts", started, response.is_ok());

        response
            .map_err(|s| map_status("lookup_accounts", s))?
            .into_inner()
            .accounts
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn lookup_transfers(&self, ids: &[TransferId]) -> Result<Vec<Transfer>> {
        let started = Instant::now();
        let request = proto::LookupRequest {
            ids: ids.iter().copied().map(to_le_bytes).collect(),
        };
        let response = self.client().lookup_transfers(request).await;
        record("lookup_transfers", started, response.is_ok());

        response
            .map_err(|s| map_status("lookup_transfers", s))?
            .into_inner()
            .transfers
            .into_iter()
            .map(Transfer::try_from)
            .collect()
    }

    async fn get_account_transfers(&self, filter: &AccountFilter) -> Result<Vec<Transfer>> {
        let started = Instant::now();
        let response = self
            .client()
            .get_account_transfers(proto::AccountFilter::from(filter))
            .await;
        record("get_account_transfers", started, response.is_ok());

        response
            .map_err(|s| map_status("get_account_transfers", s))?
            .into_inner()
            .transfers
            .into_iter()
            .map(Transfer::try_from)
            .collect()
    }

    async fn get_account_balances(&self, filter: &AccountFilter) -> Result<Vec<AccountBalance>> {
        let started = Instant::now();
        let response = self
            .client()
            .get_account_balances(proto::AccountFilter::from(filter))
            .await;
        record("get_account_balances", started, response.is_ok());

        response
            .map_err(|s| map_status("get_account_balances", s))?
            .into_inner()
            .balances
            .into_iter()
            .map(AccountBalance::try_from)
            .collect()
    }

    async fn query_accounts(&self, filter: &QueryFilter) -> Result<Vec<Account>> {
        let started = Instant::now();
        let response = self
            .client()
            .query_accounts(proto::QueryFilter::from(filter))
            .await;
        record("query_accounts", started, response.is_ok());

        response
            .map_err(|s| map_status("query_accounts", s))?
            .into_inner()
            .accounts
            .into_iter()
            .map(Account::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::account_id;

    #[test]
    fn test_account_wire_mapping() {
        let account = Account {
            id: account_id(978, 55),
            credits_posted: 1_000,
            user_data_64: 55,
            user_data_32: 1_700_000_000,
            ledger: 978,
            code: 1,
            flags: AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS | AccountFlags::HISTORY,
            timestamp: 42,
            ..Default::default()
        };
        let wire = proto::Account::from(&account);
        assert_eq!(wire.id.len(), 16);
        assert_eq!(Account::try_from(wire).unwrap(), account);
    }

    #[test]
    fn test_oversized_code_is_rejected() {
        let wire = proto::Transfer {
            code: 70_000,
            ..Default::default()
        };
        assert!(matches!(Transfer::try_from(wire), Err(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_connect_requires_addresses() {
        let config = LedgerConfig {
            addresses: Vec::new(),
            ..Default::default()
        };
        assert!(GrpcLedgerClient::connect(&config).is_err());
    }
}
