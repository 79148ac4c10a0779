//! Business and solvency pre-validation
//!
//! The ledger checks every transfer of a bulk create against the balances
//! as they stood before the call, so several debits from the same account in
//! one batch could jointly overdraw it. The validator replays the batch in
//! queue order against one snapshot of the accounts, keeping a running total
//! of the debits it has already let through for each account.
//!
//! Transfers the ledger already holds come back on a retried batch. They skip
//! every check and go straight to the writer.

use ledger_core::{
    ids, AccountFilter, AccountFilterFlags, AccountId, LedgerClient, TransferCode, TransferId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    cache::CurrencyCache,
    store::MetadataStore,
    types::{reasons, Candidate, Rejection, PARAM_MAX_TRANSFER_AMOUNT, PARAM_MIN_TRANSFER_AMOUNT},
    Result,
};

/// Inclusive amount limits; `None` disables a side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmountBounds {
    /// Smallest accepted amount
    pub min: Option<u64>,
    /// Largest accepted amount
    pub max: Option<u64>,
}

impl AmountBounds {
    /// Reason when `amount` falls outside the bounds
    pub fn check(&self, amount: u128) -> Option<String> {
        if let Some(min) = self.min {
            if amount < u128::from(min) {
                return Some(format!("amount is below the minimum of {}", min));
            }
        }
        if let Some(max) = self.max {
            if amount > u128::from(max) {
                return Some(format!("amount exceeds the maximum of {}", max));
            }
        }
        None
    }
}

/// Pre-validates decoded candidates before they reach the ledger
#[derive(Debug, Clone)]
pub struct PreValidator {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<CurrencyCache>,
}

impl PreValidator {
    /// New validator
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<dyn MetadataStore>, cache: Arc<CurrencyCache>) -> Self {
        Self { ledger, store, cache }
    }

    /// Split candidates into survivors and rejections, both in batch order.
    ///
    /// An `Err` means the store or the ledger could not be reached.
    pub async fn validate(&self, candidates: Vec<Candidate>) -> Result<(Vec<Candidate>, Vec<Rejection>)> {
        let mut rejections = Vec::new();
        if candidates.is_empty() {
            return Ok((candidates, rejections));
        }

        let bounds = self.load_bounds().await?;
        let applied = self.already_applied(&candidates).await?;

        let mut pending = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if applied.contains(&candidate.transfer.id) {
                pending.push(candidate);
                continue;
            }
            match self.check_rules(&candidate, &bounds).await? {
                None => pending.push(candidate),
                Some(reason) => rejections.push(Rejection::of(&candidate, reason)),
            }
        }

        let mut seen = HashSet::new();
        let account_ids: Vec<AccountId> = pending
            .iter()
            .filter(|c| !applied.contains(&c.transfer.id))
            .flat_map(|c| [c.transfer.debit_account_id, c.transfer.credit_account_id])
            .filter(|id| seen.insert(*id))
            .collect();
        let accounts: HashMap<AccountId, ledger_core::Account> = if account_ids.is_empty() {
            HashMap::new()
        } else {
            self.ledger
                .lookup_accounts(&account_ids)
                .await?
                .into_iter()
                .map(|a| (a.id, a))
                .collect()
        };

        let mut committed_debits: HashMap<AccountId, u128> = HashMap::new();
        let mut accepted = Vec::with_capacity(pending.len());

        for candidate in pending {
            let transfer = &candidate.transfer;
            // the ledger answers `exists` for these and they settle as already processed
            if applied.contains(&transfer.id) {
                debug!("Transfer {} is already in the ledger, skipping checks", transfer.id);
                accepted.push(candidate);
                continue;
            }
            let Some(debit) = accounts.get(&transfer.debit_account_id) else {
                rejections.push(Rejection::of(&candidate, reasons::ACCOUNT_NOT_FOUND));
                continue;
            };
            if !accounts.contains_key(&transfer.credit_account_id) {
                rejections.push(Rejection::of(&candidate, reasons::ACCOUNT_NOT_FOUND));
                continue;
            }
            if debit.is_closed() {
                rejections.push(Rejection::of(&candidate, reasons::DEBIT_ACCOUNT_CLOSED));
                continue;
            }
            if candidate.is_reversal() {
                if let Some(reason) = self.check_reversal(&candidate).await? {
                    rejections.push(Rejection::of(&candidate, reason));
                    continue;
                }
            }
            if debit.forbids_overdraft() {
                let already = committed_debits.get(&debit.id).copied().unwrap_or_default();
                let fits = already
                    .checked_add(transfer.amount)
                    .map_or(false, |needed| needed <= debit.available_balance());
                if !fits {
                    debug!(
                        "Account {} cannot cover {} (available {}, already committed {})",
                        debit.id,
                        transfer.amount,
                        debit.available_balance(),
                        already
                    );
                    rejections.push(Rejection::of(&candidate, reasons::INSUFFICIENT_FUNDS));
                    continue;
                }
                committed_debits.insert(debit.id, already + transfer.amount);
            }
            accepted.push(candidate);
        }

        rejections.sort_by_key(|r| r.position);
        Ok((accepted, rejections))
    }

    async fn load_bounds(&self) -> Result<AmountBounds> {
        Ok(AmountBounds {
            min: self.load_limit(PARAM_MIN_TRANSFER_AMOUNT).await?,
            max: self.load_limit(PARAM_MAX_TRANSFER_AMOUNT).await?,
        })
    }

    async fn load_limit(&self, name: &str) -> Result<Option<u64>> {
        let Some(parameter) = self.store.get_parameter(name).await? else {
            return Ok(None);
        };
        match parameter.value.trim().parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!("⚠️  Ignoring parameter {} with non-numeric value '{}'", name, parameter.value);
                Ok(None)
            }
        }
    }

    async fn check_rules(&self, candidate: &Candidate, bounds: &AmountBounds) -> Result<Option<String>> {
        if !candidate.is_reversal() {
            if let Some(reason) = bounds.check(candidate.transfer.amount) {
                return Ok(Some(reason));
            }
        }
        let active = self
            .cache
            .get(candidate.currency_id)
            .await?
            .map_or(false, |c| c.is_active());
        if !active {
            return Ok(Some(reasons::CURRENCY_NOT_ACTIVE.to_string()));
        }
        Ok(None)
    }

    /// Ids of candidates a previous delivery of the batch already wrote
    async fn already_applied(&self, candidates: &[Candidate]) -> Result<HashSet<TransferId>> {
        let mut seen = HashSet::new();
        let ids: Vec<TransferId> = candidates
            .iter()
            .map(|c| c.transfer.id)
            .filter(|id| seen.insert(*id))
            .collect();
        let found = self.ledger.lookup_transfers(&ids).await?;
        Ok(found.into_iter().map(|t| t.id).collect())
    }

    /// Only the most recent transfer of the user account may be reverted
    async fn check_reversal(&self, candidate: &Candidate) -> Result<Option<&'static str>> {
        let filter = AccountFilter {
            account_id: ids::account_id(candidate.currency_id, candidate.owner_id),
            limit: 1,
            flags: AccountFilterFlags::DEBITS | AccountFilterFlags::CREDITS | AccountFilterFlags::REVERSED,
            ..Default::default()
        };
        let latest = self.ledger.get_account_transfers(&filter).await?;

        Ok(match latest.first() {
            None => Some(reasons::NOTHING_TO_REVERT),
            Some(last) if last.code == TransferCode::Reversal.as_u16() => Some(reasons::CANNOT_REVERT_REVERSAL),
            Some(last) if Some(last.id) != candidate.reverses => Some(reasons::ONLY_MOST_RECENT),
            Some(_) => None,
        })
    }
}
