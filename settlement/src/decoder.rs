//! Message decoding
//!
//! Turns raw queue payloads into ledger transfers. Malformed or unresolvable
//! messages become [`Rejection`]s carrying whatever fields could be read.
//! Reversal targets are fetched with one bulk lookup per batch.

use ledger_core::{
    ids::{self, COMPANY_OWNER_ID},
    LedgerClient, Transfer, TransferCode, TransferFlags, TransferId,
};
use message_bus::QueueMessage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::{
    cache::CurrencyCache,
    types::{reasons, Candidate, MovementKind, MovementRequest, MovementSummary, Numeric, Rejection},
    Result,
};

/// Fields that passed syntactic checks
#[derive(Debug)]
struct Draft {
    position: usize,
    summary: MovementSummary,
    kind: MovementKind,
    transfer_id: TransferId,
    owner_id: u64,
    amount: u64,
    currency_id: u32,
    category: u64,
    date_marker: u32,
}

/// Decodes batches of movement requests
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    ledger: Arc<dyn LedgerClient>,
    cache: Arc<CurrencyCache>,
}

impl MessageDecoder {
    /// New decoder
    pub fn new(ledger: Arc<dyn LedgerClient>, cache: Arc<CurrencyCache>) -> Self {
        Self { ledger, cache }
    }

    /// Decode a batch.
    ///
    /// Both returned lists are in batch order. An `Err` means the ledger or
    /// the metadata store could not be reached and the batch must be retried.
    pub async fn decode_batch(&self, messages: &[QueueMessage]) -> Result<(Vec<Candidate>, Vec<Rejection>)> {
        let mut rejections = Vec::new();
        let mut drafts = Vec::with_capacity(messages.len());

        for (position, message) in messages.iter().enumerate() {
            match parse_message(position, message) {
                Ok(draft) => drafts.push(draft),
                Err(rejection) => rejections.push(rejection),
            }
        }

        let originals = self.lookup_originals(&drafts).await?;

        let mut candidates = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let position = draft.position;
            let summary = draft.summary.clone();
            match self.resolve(draft, &originals).await? {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    debug!("Message {} rejected while decoding: {}", position, reason);
                    rejections.push(Rejection {
                        position,
                        summary,
                        reason,
                    });
                }
            }
        }

        rejections.sort_by_key(|r| r.position);
        Ok((candidates, rejections))
    }

    async fn lookup_originals(&self, drafts: &[Draft]) -> Result<HashMap<TransferId, Transfer>> {
        let mut seen = HashSet::new();
        let ids: Vec<TransferId> = drafts
            .iter()
            .filter(|d| d.kind == MovementKind::Reversal)
            .map(|d| d.transfer_id)
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let found = self.ledger.lookup_transfers(&ids).await?;
        Ok(found.into_iter().map(|t| (t.id, t)).collect())
    }

    /// Outer `Err` is infrastructure; inner `Err` is a rejection reason
    async fn resolve(
        &self,
        mut draft: Draft,
        originals: &HashMap<TransferId, Transfer>,
    ) -> Result<std::result::Result<Candidate, String>> {
        let (transfer, reverses) = match draft.kind {
            MovementKind::Reversal => {
                let original = match originals.get(&draft.transfer_id) {
                    Some(original) => original,
                    None => return Ok(Err(reasons::ORIGINAL_NOT_FOUND.to_string())),
                };
                // the original's ledger decides which account history is checked
                draft.currency_id = original.ledger;
                draft.summary.amount = u64::try_from(original.amount).ok();
                draft.summary.category = draft.summary.category.or(Some(original.category()));
                let transfer = Transfer {
                    id: ids::reversal_id(original.id),
                    debit_account_id: original.credit_account_id,
                    credit_account_id: original.debit_account_id,
                    amount: original.amount,
                    user_data_128: original.id,
                    user_data_64: original.user_data_64,
                    user_data_32: draft.date_marker,
                    ledger: original.ledger,
                    code: TransferCode::Reversal.as_u16(),
                    flags: TransferFlags::NONE,
                    ..Default::default()
                };
                (transfer, Some(original.id))
            }
            kind => {
                let currency = match self.cache.get(draft.currency_id).await? {
                    Some(currency) => currency,
                    None => return Ok(Err(reasons::UNKNOWN_CURRENCY.to_string())),
                };
                let user_account = ids::account_id(draft.currency_id, draft.owner_id);
                let company = match currency.company_account_id {
                    Some(id) => id,
                    None => return Ok(Err(reasons::NO_COMPANY_ACCOUNT.to_string())),
                };
                let (debit, credit) = if kind == MovementKind::CreditIn {
                    (company, user_account)
                } else {
                    (user_account, company)
                };
                let transfer = Transfer {
                    id: draft.transfer_id,
                    debit_account_id: debit,
                    credit_account_id: credit,
                    amount: u128::from(draft.amount),
                    user_data_64: draft.category,
                    user_data_32: draft.date_marker,
                    ledger: draft.currency_id,
                    code: TransferCode::Normal.as_u16(),
                    flags: TransferFlags::NONE,
                    ..Default::default()
                };
                (transfer, None)
            }
        };

        Ok(Ok(Candidate {
            position: draft.position,
            summary: draft.summary,
            kind: draft.kind,
            owner_id: draft.owner_id,
            currency_id: draft.currency_id,
            transfer,
            reverses,
        }))
    }
}

fn parse_message(position: usize, message: &QueueMessage) -> std::result::Result<Draft, Rejection> {
    let request: MovementRequest = match serde_json::from_slice(&message.payload) {
        Ok(request) => request,
        Err(e) => {
            return Err(Rejection {
                position,
                summary: MovementSummary {
                    id: message.key.clone(),
                    ..Default::default()
                },
                reason: format!("malformed payload: {}", e),
            })
        }
    };

    let summary = MovementSummary::from_request(&request, message.key.as_deref());
    parse_request(position, &request, summary.clone()).map_err(|reason| Rejection {
        position,
        summary,
        reason,
    })
}

fn parse_request(
    position: usize,
    request: &MovementRequest,
    summary: MovementSummary,
) -> std::result::Result<Draft, String> {
    let transfer_id = match &request.transfer_id {
        None => return Err("missing transfer id".to_string()),
        Some(Numeric::Number(n)) => ids::parse_id(&n.to_string()),
        Some(Numeric::Text(s)) => ids::parse_id(s),
    }
    .map_err(|e| format!("invalid transfer id: {}", e))?;

    let kind = match request.kind.as_deref() {
        None => return Err("missing kind".to_string()),
        Some(raw) => MovementKind::parse(raw).ok_or_else(|| format!("unknown kind: {}", raw))?,
    };

    if ids::has_reversal_marker(transfer_id) {
        return Err(match kind {
            MovementKind::Reversal => reasons::CANNOT_REVERT_REVERSAL.to_string(),
            _ => "transfer id uses the reserved reversal bit".to_string(),
        });
    }

    let owner_id = request.owner_id.ok_or("missing owner id")?;
    if owner_id == COMPANY_OWNER_ID {
        return Err("owner id must not be zero".to_string());
    }

    let amount = request.amount.unwrap_or_default();
    if kind != MovementKind::Reversal && amount == 0 {
        return Err("amount must be greater than zero".to_string());
    }

    let currency_id = request.currency.ok_or("missing currency")?;

    let date_marker = match request.date.as_deref() {
        Some(raw) if !raw.trim().is_empty() => {
            ids::parse_date_marker(raw).map_err(|e| format!("invalid date: {}", e))?
        }
        _ => ids::date_marker_now(),
    };

    Ok(Draft {
        position,
        summary,
        kind,
        transfer_id,
        owner_id,
        amount,
        currency_id,
        category: request.category.unwrap_or_default(),
        date_marker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryMetadataStore, StoreOperation};
    use ledger_core::{LedgerOperation, MemoryLedger};
    use std::time::Duration;

    const USD: u32 = 840;

    fn message(position: u64, body: &str) -> QueueMessage {
        QueueMessage::detached(position, None, body.to_string())
    }

    fn decoder() -> (Arc<MemoryLedger>, Arc<MemoryMetadataStore>, MessageDecoder) {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(MemoryMetadataStore::new());
        store.put_active_currency(USD, "USD");
        let cache = Arc::new(CurrencyCache::new(store.clone(), Duration::from_secs(15)));
        let decoder = MessageDecoder::new(ledger.clone(), cache);
        (ledger, store, decoder)
    }

    #[tokio::test]
    async fn test_credit_in_debits_company() {
        let (_, _, decoder) = decoder();
        let batch = vec![message(
            1,
            r#"{"transferId":"10","ownerId":7,"amount":500,"currency":840,"kind":"credit-in","category":3,"date":"2024-01-02"}"#,
        )];

        let (candidates, rejections) = decoder.decode_batch(&batch).await.unwrap();
        assert!(rejections.is_empty());
        let transfer = &candidates[0].transfer;
        assert_eq!(transfer.debit_account_id, ids::company_account_id(USD));
        assert_eq!(transfer.credit_account_id, ids::account_id(USD, 7));
        assert_eq!(transfer.amount, 500);
        assert_eq!(transfer.user_data_64, 3);
        assert_eq!(transfer.user_data_32, 1_704_153_600);
        assert_eq!(transfer.code, TransferCode::Normal.as_u16());
    }

    #[tokio::test]
    async fn test_debit_out_credits_company() {
        let (_, _, decoder) = decoder();
        let batch = vec![message(
            1,
            r#"{"transferId":11,"ownerId":7,"amount":5,"currency":840,"kind":"debit-out"}"#,
        )];

        let (candidates, _) = decoder.decode_batch(&batch).await.unwrap();
        let transfer = &candidates[0].transfer;
        assert_eq!(transfer.debit_account_id, ids::account_id(USD, 7));
        assert_eq!(transfer.credit_account_id, ids::company_account_id(USD));
    }

    #[tokio::test]
    async fn test_decode_failures_keep_partial_fields() {
        let (_, _, decoder) = decoder();
        let batch = vec![
            QueueMessage::detached(1, Some("42".into()), "not json"),
            message(2, r#"{"transferId":"12","ownerId":0,"amount":5,"currency":840,"kind":"credit-in"}"#),
            message(3, r#"{"transferId":"13","ownerId":7,"amount":0,"currency":840,"kind":"credit-in"}"#),
            message(4, r#"{"transferId":"14","ownerId":7,"amount":5,"currency":840,"kind":"sideways"}"#),
            message(5, r#"{"transferId":"15","ownerId":7,"amount":5,"currency":1,"kind":"credit-in"}"#),
            message(6, r#"{"ownerId":7,"amount":5,"currency":840,"kind":"credit-in"}"#),
            message(7, r#"{"transferId":"18446744073709551616","ownerId":7,"amount":5,"currency":840,"kind":"credit-in"}"#),
            message(8, r#"{"transferId":"16","ownerId":7,"amount":5,"currency":840,"kind":"credit-in","date":"yesterday"}"#),
        ];

        let (candidates, rejections) = decoder.decode_batch(&batch).await.unwrap();
        assert!(candidates.is_empty());
        assert_eq!(rejections.len(), 8);
        assert_eq!(rejections[0].summary.id.as_deref(), Some("42"));
        assert!(rejections[0].reason.starts_with("malformed payload"));
        assert_eq!(rejections[1].summary.amount, Some(5));
        assert_eq!(rejections[1].reason, "owner id must not be zero");
        assert_eq!(rejections[2].reason, "amount must be greater than zero");
        assert_eq!(rejections[3].reason, "unknown kind: sideways");
        assert_eq!(rejections[4].reason, reasons::UNKNOWN_CURRENCY);
        assert_eq!(rejections[5].reason, "missing transfer id");
        assert_eq!(rejections[6].reason, "transfer id uses the reserved reversal bit");
        assert!(rejections[7].reason.starts_with("invalid date"));
    }

    #[tokio::test]
    async fn test_reversal_swaps_accounts() {
        let (ledger, _, decoder) = decoder();
        let accounts: Vec<ledger_core::Account> = [ids::company_account_id(USD), ids::account_id(USD, 7)]
            .into_iter()
            .map(|id| ledger_core::Account {
                id,
                ledger: USD,
                code: ledger_core::ACCOUNT_CODE,
                ..Default::default()
            })
            .collect();
        assert!(ledger.create_accounts(&accounts).await.unwrap().is_empty());
        ledger
            .create_transfers(&[Transfer {
                id: 20,
                debit_account_id: ids::company_account_id(USD),
                credit_account_id: ids::account_id(USD, 7),
                amount: 900,
                user_data_64: 4,
                ledger: USD,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();

        let batch = vec![
            message(1, r#"{"transferId":"20","ownerId":7,"currency":840,"kind":"reversal"}"#),
            message(2, r#"{"transferId":"21","ownerId":7,"currency":840,"kind":"reversal"}"#),
        ];
        let (candidates, rejections) = decoder.decode_batch(&batch).await.unwrap();

        let reversal = &candidates[0];
        assert_eq!(reversal.transfer.id, ids::reversal_id(20));
        assert_eq!(reversal.transfer.debit_account_id, ids::account_id(USD, 7));
        assert_eq!(reversal.transfer.credit_account_id, ids::company_account_id(USD));
        assert_eq!(reversal.transfer.amount, 900);
        assert_eq!(reversal.transfer.user_data_128, 20);
        assert_eq!(reversal.transfer.user_data_64, 4);
        assert_eq!(reversal.transfer.code, TransferCode::Reversal.as_u16());
        assert_eq!(reversal.summary.amount, Some(900));
        assert_eq!(reversal.reverses, Some(20));

        assert_eq!(rejections[0].position, 1);
        assert_eq!(rejections[0].reason, reasons::ORIGINAL_NOT_FOUND);
        assert_eq!(ledger.calls(LedgerOperation::LookupTransfers), 1);
    }

    #[tokio::test]
    async fn test_reversal_skips_currency_resolution() {
        let (ledger, store, decoder) = decoder();
        let accounts: Vec<ledger_core::Account> = [ids::company_account_id(USD), ids::account_id(USD, 7)]
            .into_iter()
            .map(|id| ledger_core::Account {
                id,
                ledger: USD,
                code: ledger_core::ACCOUNT_CODE,
                ..Default::default()
            })
            .collect();
        assert!(ledger.create_accounts(&accounts).await.unwrap().is_empty());
        ledger
            .create_transfers(&[Transfer {
                id: 25,
                debit_account_id: ids::company_account_id(USD),
                credit_account_id: ids::account_id(USD, 7),
                amount: 300,
                ledger: USD,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();

        // currency 999 was never registered
        let batch = vec![message(1, r#"{"transferId":"25","ownerId":7,"currency":999,"kind":"reversal"}"#)];
        store.fail(StoreOperation::ReadCurrency);
        let (candidates, rejections) = decoder.decode_batch(&batch).await.unwrap();

        assert!(rejections.is_empty());
        assert_eq!(candidates[0].transfer.id, ids::reversal_id(25));
        assert_eq!(candidates[0].currency_id, USD);
    }

    #[tokio::test]
    async fn test_infra_failures_abort() {
        let (ledger, store, decoder) = decoder();
        let batch = vec![message(1, r#"{"transferId":"20","ownerId":7,"currency":840,"kind":"reversal"}"#)];

        ledger.fail(LedgerOperation::LookupTransfers);
        assert!(decoder.decode_batch(&batch).await.unwrap_err().is_infra());
        ledger.recover(LedgerOperation::LookupTransfers);

        store.fail(StoreOperation::ReadCurrency);
        let batch = vec![message(1, r#"{"transferId":"30","ownerId":7,"amount":1,"currency":840,"kind":"credit-in"}"#)];
        assert!(decoder.decode_batch(&batch).await.unwrap_err().is_infra());
    }
}
