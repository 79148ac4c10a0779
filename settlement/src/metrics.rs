//! Prometheus metrics for the settlement pipeline
//!
//! - `settlement_batches_total` - iterations by result
//! - `settlement_outcomes_total` - per-message outcomes by status
//! - `settlement_infra_failures_total` - aborted iterations by failing stage
//! - `settlement_batch_duration_seconds` - iteration latency
//! - `currency_cache_requests_total` - cache lookups by result

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, Histogram, IntCounterVec,
};

lazy_static! {
    /// Pipeline iterations by result (committed, aborted, empty)
    pub static ref BATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_batches_total",
        "Total pipeline iterations",
        &["result"]
    )
    .unwrap();

    /// Per-message outcomes
    pub static ref OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_outcomes_total",
        "Movement outcomes reported to the subscriber",
        &["status"]
    )
    .unwrap();

    /// Infrastructure failures by stage
    pub static ref INFRA_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "settlement_infra_failures_total",
        "Pipeline iterations aborted by infrastructure failures",
        &["stage"]
    )
    .unwrap();

    /// Iteration latency
    pub static ref BATCH_DURATION: Histogram = register_histogram!(
        "settlement_batch_duration_seconds",
        "Time spent processing one batch",
        vec![0.005, 0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Currency cache lookups
    pub static ref CACHE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "currency_cache_requests_total",
        "Currency cache lookups",
        &["result"]
    )
    .unwrap();
}
