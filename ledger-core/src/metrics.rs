//! Prometheus metrics for ledger calls
//!
//! - `ledger_requests_total` - requests by operation and outcome
//! - `ledger_request_duration_seconds` - request latency by operation

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Ledger requests by operation and outcome
    pub static ref LEDGER_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ledger_requests_total",
        "Total ledger requests",
        &["operation", "status"]
    )
    .unwrap();

    /// Ledger request latency
    pub static ref LEDGER_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "ledger_request_duration_seconds",
        "Ledger request latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]
    )
    .unwrap();
}
