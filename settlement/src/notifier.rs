//! Result classification and subscriber notification

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::CreateTransferResult;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{
    types::{reasons, Candidate, NotificationBatch, NotificationRecord, OutcomeStatus, Rejection},
    Error, Result,
};

/// Merge every outcome of a batch into one record per message, in batch order.
///
/// `rejections` come from decoding and pre-validation; `results` are the
/// sparse ledger failures indexed into `submitted`. A submitted candidate
/// without a ledger result settled. A ledger `exists` is reported as settled
/// with [`reasons::ALREADY_PROCESSED`].
pub fn classify(
    rejections: Vec<Rejection>,
    submitted: Vec<Candidate>,
    results: &[(usize, CreateTransferResult)],
    processed_at: DateTime<Utc>,
) -> Vec<NotificationRecord> {
    let failures: HashMap<usize, CreateTransferResult> = results.iter().copied().collect();

    let mut outcomes: Vec<(usize, NotificationRecord)> = rejections
        .into_iter()
        .map(|r| {
            let record = NotificationRecord::new(r.summary, OutcomeStatus::Rejected, Some(r.reason), processed_at);
            (r.position, record)
        })
        .collect();

    for (index, candidate) in submitted.into_iter().enumerate() {
        let (status, reason) = match failures.get(&index) {
            None => (OutcomeStatus::Settled, None),
            Some(result) if result.is_exists() => {
                (OutcomeStatus::Settled, Some(reasons::ALREADY_PROCESSED.to_string()))
            }
            Some(result) => (
                OutcomeStatus::Rejected,
                Some(format!("ledger rejected the transfer: {}", result)),
            ),
        };
        let record = NotificationRecord::new(candidate.summary, status, reason, processed_at);
        outcomes.push((candidate.position, record));
    }

    outcomes.sort_by_key(|(position, _)| *position);
    outcomes.into_iter().map(|(_, record)| record).collect()
}

/// Destination for per-batch outcome reports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one batch report; any error keeps the batch uncommitted
    async fn deliver(&self, batch: &NotificationBatch) -> Result<()>;
}

/// Posts batch reports to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    /// An empty `url` only logs the reports
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("webhook client: {}", e)))?;

        Ok(Self {
            url: url.into().trim().to_string(),
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn deliver(&self, batch: &NotificationBatch) -> Result<()> {
        if self.url.is_empty() {
            let payload = serde_json::to_string(batch).unwrap_or_default();
            warn!("⚠️  No webhook URL configured, batch report not sent: {}", payload);
            return Ok(());
        }

        let response = self.client.post(&self.url).json(batch).send().await.map_err(|e| {
            error!("❌ Webhook call to {} failed: {}", self.url, e);
            Error::Notification(format!("request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("❌ Webhook answered {}: {}", status, body);
            return Err(Error::Notification(format!("webhook answered {}", status)));
        }

        info!("📨 Reported {} transfers to webhook ({})", batch.processed_count, status);
        Ok(())
    }
}
