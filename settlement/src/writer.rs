//! Ledger writer

use ledger_core::{CreateTransferResult, LedgerClient, Transfer};
use std::sync::Arc;
use tracing::{debug, error};

use crate::{types::Candidate, Result};

/// Submits surviving candidates to the ledger in one bulk call
#[derive(Debug, Clone)]
pub struct LedgerWriter {
    ledger: Arc<dyn LedgerClient>,
}

impl LedgerWriter {
    /// New writer
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Create the transfers of `candidates`, in order.
    ///
    /// Returns the sparse failures as `(index into candidates, result)`.
    /// Indexes outside the submitted range are logged and dropped.
    pub async fn submit(&self, candidates: &[Candidate]) -> Result<Vec<(usize, CreateTransferResult)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let transfers: Vec<Transfer> = candidates.iter().map(|c| c.transfer.clone()).collect();
        let results = self.ledger.create_transfers(&transfers).await?;
        debug!(
            "Ledger accepted {} of {} transfers",
            transfers.len().saturating_sub(results.len()),
            transfers.len()
        );

        Ok(results
            .into_iter()
            .filter_map(|(index, result)| {
                let index = index as usize;
                if index < candidates.len() {
                    Some((index, result))
                } else {
                    error!("❌ Ledger reported result {} for out-of-range index {}", result, index);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MovementKind;
    use ledger_core::{ids, Account, LedgerOperation, MemoryLedger};

    fn candidate(position: usize, id: u128) -> Candidate {
        Candidate {
            position,
            summary: Default::default(),
            kind: MovementKind::CreditIn,
            owner_id: 7,
            currency_id: 1,
            transfer: Transfer {
                id,
                debit_account_id: ids::company_account_id(1),
                credit_account_id: ids::account_id(1, 7),
                amount: 10,
                ledger: 1,
                code: 1,
                ..Default::default()
            },
            reverses: None,
        }
    }

    #[tokio::test]
    async fn test_sparse_results() {
        let ledger = Arc::new(MemoryLedger::new());
        let accounts: Vec<Account> = [ids::company_account_id(1), ids::account_id(1, 7)]
            .into_iter()
            .map(|id| Account {
                id,
                ledger: 1,
                code: 1,
                ..Default::default()
            })
            .collect();
        ledger.create_accounts(&accounts).await.unwrap();
        let writer = LedgerWriter::new(ledger.clone());

        let results = writer.submit(&[candidate(0, 5), candidate(1, 6)]).await.unwrap();
        assert!(results.is_empty());

        let results = writer.submit(&[candidate(0, 7), candidate(1, 5)]).await.unwrap();
        assert_eq!(results, vec![(1, CreateTransferResult::Exists)]);
    }

    #[tokio::test]
    async fn test_empty_submission_skips_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let writer = LedgerWriter::new(ledger.clone());
        assert!(writer.submit(&[]).await.unwrap().is_empty());
        assert_eq!(ledger.calls(LedgerOperation::CreateTransfers), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_infra() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fail(LedgerOperation::CreateTransfers);
        let writer = LedgerWriter::new(ledger);
        assert!(writer.submit(&[candidate(0, 5)]).await.unwrap_err().is_infra());
    }
}
