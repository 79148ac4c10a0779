//! Property tests for the intra-batch overdraft simulation

use ledger_core::{ids, Account, AccountFlags, LedgerClient, MemoryLedger, Transfer, ACCOUNT_CODE};
use proptest::prelude::*;
use settlement::{reasons, Candidate, CurrencyCache, MemoryMetadataStore, MovementKind, PreValidator};
use std::sync::Arc;
use std::time::Duration;

const CURRENCY: u32 = 1;
const OWNER: u64 = 7;

async fn validator_with_balance(balance: u64) -> (Arc<MemoryLedger>, PreValidator) {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryMetadataStore::new());
    store.put_active_currency(CURRENCY, "TST");
    let cache = Arc::new(CurrencyCache::new(store.clone(), Duration::from_secs(15)));

    let account = |id, flags| Account {
        id,
        ledger: CURRENCY,
        code: ACCOUNT_CODE,
        flags,
        ..Default::default()
    };
    ledger
        .create_accounts(&[
            account(ids::company_account_id(CURRENCY), AccountFlags::HISTORY),
            account(
                ids::account_id(CURRENCY, OWNER),
                AccountFlags::HISTORY | AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS,
            ),
        ])
        .await
        .unwrap();
    if balance > 0 {
        ledger
            .create_transfers(&[Transfer {
                id: u128::from(u64::MAX),
                debit_account_id: ids::company_account_id(CURRENCY),
                credit_account_id: ids::account_id(CURRENCY, OWNER),
                amount: u128::from(balance),
                ledger: CURRENCY,
                code: 1,
                ..Default::default()
            }])
            .await
            .unwrap();
    }

    let validator = PreValidator::new(ledger.clone(), store, cache);
    (ledger, validator)
}

fn debit(position: usize, amount: u64) -> Candidate {
    Candidate {
        position,
        summary: Default::default(),
        kind: MovementKind::DebitOut,
        owner_id: OWNER,
        currency_id: CURRENCY,
        transfer: Transfer {
            id: position as u128 + 1,
            debit_account_id: ids::account_id(CURRENCY, OWNER),
            credit_account_id: ids::company_account_id(CURRENCY),
            amount: u128::from(amount),
            ledger: CURRENCY,
            code: 1,
            ..Default::default()
        },
        reverses: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn accepted_debits_never_overdraw(
        balance in 0u64..5_000,
        amounts in prop::collection::vec(1u64..2_000, 1..20),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let (ledger, validator) = validator_with_balance(balance).await;
            let batch: Vec<Candidate> = amounts.iter().enumerate().map(|(i, a)| debit(i, *a)).collect();

            let (accepted, rejected) = validator.validate(batch).await.unwrap();
            prop_assert_eq!(accepted.len() + rejected.len(), amounts.len());

            // greedy in queue order: each debit is taken if it still fits
            let mut remaining = u128::from(balance);
            let mut expected = Vec::new();
            for (i, amount) in amounts.iter().enumerate() {
                let amount = u128::from(*amount);
                if amount <= remaining {
                    remaining -= amount;
                    expected.push(i);
                }
            }
            let positions: Vec<usize> = accepted.iter().map(|c| c.position).collect();
            prop_assert_eq!(positions, expected);
            prop_assert!(rejected.iter().all(|r| r.reason == reasons::INSUFFICIENT_FUNDS));

            // the ledger accepts every survivor of the simulation
            let transfers: Vec<Transfer> = accepted.iter().map(|c| c.transfer.clone()).collect();
            let results = ledger.create_transfers(&transfers).await.unwrap();
            prop_assert!(results.is_empty());
            Ok(())
        })?;
    }
}
