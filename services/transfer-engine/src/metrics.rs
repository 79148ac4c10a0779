//! Admin surface metrics and the Prometheus text endpoint

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Admin operations by name and result
    pub static ref ADMIN_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "transfer_engine_admin_operations_total",
        "Admin API operations",
        &["operation", "result"]
    )
    .unwrap();
}

/// Count one admin operation
pub fn record<T, E>(operation: &str, outcome: &Result<T, E>) {
    let result = if outcome.is_ok() { "ok" } else { "error" };
    ADMIN_OPERATIONS_TOTAL.with_label_values(&[operation, result]).inc();
}

/// Every registered metric in the text exposition format
pub fn render() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to gather metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("Failed to encode metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        record::<(), ()>("test_operation", &Ok(()));
        record::<(), ()>("test_operation", &Err(()));

        let body = render().unwrap();
        assert!(body.contains("transfer_engine_admin_operations_total"));
        assert!(body.contains("test_operation"));
    }
}
