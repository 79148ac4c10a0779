//! Settlement pipeline and commit gate
//!
//! One sequential loop: accumulate a batch, decode, pre-validate, write to
//! the ledger, notify the subscriber, then commit. Any error before the
//! notification has been delivered releases the whole batch for redelivery;
//! the ledger's idempotency on transfer ids makes the retry harmless.

use ledger_core::LedgerClient;
use message_bus::{BatchAccumulator, MessageSource, QueueMessage};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    cache::CurrencyCache,
    config::PipelineConfig,
    decoder::MessageDecoder,
    metrics::{BATCHES_TOTAL, BATCH_DURATION, INFRA_FAILURES_TOTAL, OUTCOMES_TOTAL},
    notifier::{classify, NotificationSink},
    store::MetadataStore,
    types::{NotificationBatch, OutcomeStatus},
    validator::PreValidator,
    writer::LedgerWriter,
    Result,
};

/// Summary of one pipeline iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Messages in the batch
    pub messages: usize,
    /// Messages reported as settled
    pub settled: usize,
    /// Messages reported as rejected
    pub rejected: usize,
    /// Whether the batch was committed
    pub committed: bool,
}

/// The ingestion and settlement loop
pub struct TransferPipeline {
    source: Arc<dyn MessageSource>,
    accumulator: BatchAccumulator,
    decoder: MessageDecoder,
    validator: PreValidator,
    writer: LedgerWriter,
    sink: Arc<dyn NotificationSink>,
    config: PipelineConfig,
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("accumulator", &self.accumulator)
            .field("config", &self.config)
            .finish()
    }
}

impl TransferPipeline {
    /// Wire a pipeline
    pub fn new(
        source: Arc<dyn MessageSource>,
        accumulator: BatchAccumulator,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn MetadataStore>,
        cache: Arc<CurrencyCache>,
        sink: Arc<dyn NotificationSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            decoder: MessageDecoder::new(ledger.clone(), cache.clone()),
            validator: PreValidator::new(ledger.clone(), store, cache),
            writer: LedgerWriter::new(ledger),
            accumulator,
            sink,
            config,
        }
    }

    /// Accumulate and process one batch.
    ///
    /// `Err` means the batch was not committed and will be delivered again.
    pub async fn run_iteration(&self) -> Result<IterationReport> {
        let batch = self.accumulator.accumulate(self.source.as_ref()).await;
        self.process(batch).await
    }

    async fn process(&self, batch: Vec<QueueMessage>) -> Result<IterationReport> {
        if batch.is_empty() {
            BATCHES_TOTAL.with_label_values(&["empty"]).inc();
            return Ok(IterationReport::default());
        }

        let span = info_span!("batch", batch_id = %Uuid::now_v7(), size = batch.len());
        self.commit_gate(batch).instrument(span).await
    }

    async fn commit_gate(&self, batch: Vec<QueueMessage>) -> Result<IterationReport> {
        let start = Instant::now();
        let outcome = self.settle(&batch).await;
        BATCH_DURATION.observe(start.elapsed().as_secs_f64());

        let mut report = match outcome {
            Ok(report) => report,
            Err(e) => {
                INFRA_FAILURES_TOTAL.with_label_values(&[e.stage()]).inc();
                BATCHES_TOTAL.with_label_values(&["aborted"]).inc();
                error!("❌ Batch of {} aborted, releasing for redelivery: {}", batch.len(), e);
                if let Err(release_err) = self.source.release(&batch).await {
                    warn!("⚠️  Release failed, batch will return after ack wait: {}", release_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.source.commit(&batch).await {
            BATCHES_TOTAL.with_label_values(&["commit_failed"]).inc();
            error!(
                "🚨 CRITICAL: batch of {} processed and reported but commit failed; it will be redelivered: {}",
                batch.len(),
                e
            );
            return Err(e.into());
        }

        report.committed = true;
        BATCHES_TOTAL.with_label_values(&["committed"]).inc();
        info!(
            "✅ Batch committed: {} messages, {} settled, {} rejected",
            report.messages, report.settled, report.rejected
        );
        Ok(report)
    }

    async fn settle(&self, batch: &[QueueMessage]) -> Result<IterationReport> {
        let (candidates, mut rejections) = self.decoder.decode_batch(batch).await?;
        let (accepted, refused) = self.validator.validate(candidates).await?;
        rejections.extend(refused);

        let results = self.writer.submit(&accepted).await?;
        let records = classify(rejections, accepted, &results, chrono::Utc::now());

        let settled = records
            .iter()
            .filter(|r| r.status == OutcomeStatus::Settled)
            .count();
        let report = IterationReport {
            messages: records.len(),
            settled,
            rejected: records.len() - settled,
            committed: false,
        };

        self.sink.deliver(&NotificationBatch::new(records)).await?;

        OUTCOMES_TOTAL
            .with_label_values(&[OutcomeStatus::Settled.as_str()])
            .inc_by(report.settled as u64);
        OUTCOMES_TOTAL
            .with_label_values(&[OutcomeStatus::Rejected.as_str()])
            .inc_by(report.rejected as u64);
        Ok(report)
    }

    /// Run until `stop` turns true or its sender is dropped.
    ///
    /// A batch that is being processed always runs to its commit decision.
    /// Messages fetched by an interrupted accumulation stay uncommitted and
    /// come back after the queue's ack wait.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!("🚀 Settlement pipeline started (batch size {})", self.accumulator.max_messages());

        loop {
            if *stop.borrow() {
                break;
            }

            let batch = tokio::select! {
                _ = stop.changed() => break,
                batch = self.accumulator.accumulate(self.source.as_ref()) => batch,
            };

            let pause = if batch.is_empty() {
                BATCHES_TOTAL.with_label_values(&["empty"]).inc();
                Some(self.config.idle_backoff())
            } else {
                match self.process(batch).await {
                    Ok(_) => None,
                    Err(_) => Some(self.config.failure_backoff()),
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        if let Err(e) = self.source.close().await {
            warn!("⚠️  Closing the queue source failed: {}", e);
        }
        info!("🛑 Settlement pipeline stopped");
    }
}
