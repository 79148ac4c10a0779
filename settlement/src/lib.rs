//! Settlement Pipeline
//!
//! Turns movement requests from the queue into ledger transfers and reports
//! every outcome to a downstream subscriber.
//!
//! # Architecture
//!
//! Each batch passes through one sequential loop:
//!
//! 1. **Accumulation**: up to N messages or T elapsed ([`message_bus::BatchAccumulator`])
//! 2. **Decoding**: payloads become transfers; reversals are resolved against the ledger
//! 3. **Pre-validation**: currency state, amount bounds, account checks and an
//!    in-order overdraft simulation across the batch
//! 4. **Ledger write**: one bulk create for the survivors
//! 5. **Notification**: one report per batch, one record per message
//! 6. **Commit**: only after the report was delivered
//!
//! Infrastructure failures at any step release the batch; the ledger's
//! idempotency on transfer ids turns the replay into "already processed".
//!
//! Currencies are created through a compensating saga
//! ([`CurrencyProvisioner`]) that keeps the metadata store and the ledger in
//! step.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use ledger_core::MemoryLedger;
//! use message_bus::{BatchAccumulator, MemoryQueue};
//! use settlement::{CurrencyCache, MemoryMetadataStore, PipelineConfig, TransferPipeline, WebhookNotifier};
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let config = PipelineConfig::default();
//!     let store = Arc::new(MemoryMetadataStore::new());
//!     let cache = Arc::new(CurrencyCache::new(store.clone(), config.cache_ttl()));
//!     let pipeline = TransferPipeline::new(
//!         Arc::new(MemoryQueue::new()),
//!         BatchAccumulator::new(1000, Duration::from_secs(20)),
//!         Arc::new(MemoryLedger::new()),
//!         store,
//!         cache,
//!         Arc::new(WebhookNotifier::new(&config.webhook_url, config.webhook_timeout())?),
//!         config,
//!     );
//!
//!     let report = pipeline.run_iteration().await?;
//!     println!("{} settled, {} rejected", report.settled, report.rejected);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod currencies;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod pipeline;
pub mod provisioning;
pub mod store;
pub mod types;
pub mod validator;
pub mod writer;

// Re-exports
pub use accounts::{AccountPage, AccountSearch, AccountService, AccountView, BalanceHistory, HistoryQuery, NewAccount, TransferView};
pub use bootstrap::ensure_company_accounts;
pub use cache::{CurrencyCache, TtlCache};
pub use config::PipelineConfig;
pub use currencies::CurrencyService;
pub use decoder::MessageDecoder;
pub use error::{Error, Result};
pub use notifier::{classify, NotificationSink, WebhookNotifier};
pub use pipeline::{IterationReport, TransferPipeline};
pub use provisioning::CurrencyProvisioner;
pub use store::{MemoryMetadataStore, MetadataStore, StoreOperation};
pub use types::*;
pub use validator::{AmountBounds, PreValidator};
pub use writer::LedgerWriter;
