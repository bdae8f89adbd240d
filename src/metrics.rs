//! Prometheus metrics for the security pipeline.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `security_rate_limit_rejections_total` - Requests rejected by the rate limiter
//! - `security_password_violations_total` - Password policy violations
//! - `security_audit_records_total` - Audit records emitted (label: `outcome` = emitted|deduplicated)
//! - `security_cache_errors_total` - Cache store failures (label: `operation`)
//! - `security_errors_total` - Security errors converted to responses (label: `code`)
//! - `security_masked_fields_total` - Response fields masked before leaving the service
//!
//! Recording functions are no-ops until [`init_metrics`] installs an exporter.

use std::net::SocketAddr;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "security_rate_limit_rejections_total";
    pub const PASSWORD_VIOLATIONS_TOTAL: &str = "security_password_violations_total";
    pub const AUDIT_RECORDS_TOTAL: &str = "security_audit_records_total";
    pub const CACHE_ERRORS_TOTAL: &str = "security_cache_errors_total";
    pub const SECURITY_ERRORS_TOTAL: &str = "security_errors_total";
    pub const MASKED_FIELDS_TOTAL: &str = "security_masked_fields_total";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is taken).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Requests rejected by the rate limiter"
    );
    describe_counter!(
        names::PASSWORD_VIOLATIONS_TOTAL,
        "Registration attempts rejected by the password policy"
    );
    describe_counter!(
        names::AUDIT_RECORDS_TOTAL,
        "Audit records emitted or suppressed by deduplication"
    );
    describe_counter!(
        names::CACHE_ERRORS_TOTAL,
        "Cache store operations that failed"
    );
    describe_counter!(
        names::SECURITY_ERRORS_TOTAL,
        "Security errors returned to clients, by code"
    );
    describe_counter!(
        names::MASKED_FIELDS_TOTAL,
        "Sensitive response fields masked"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

pub fn record_password_violation() {
    counter!(names::PASSWORD_VIOLATIONS_TOTAL).increment(1);
}

/// `outcome` is `emitted` or `deduplicated`.
pub fn record_audit(outcome: &'static str) {
    counter!(names::AUDIT_RECORDS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_cache_error(operation: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_security_error(code: &'static str) {
    counter!(names::SECURITY_ERRORS_TOTAL, "code" => code).increment(1);
}

pub fn record_masked_fields(count: usize) {
    counter!(names::MASKED_FIELDS_TOTAL).increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed exporter must not panic.
    #[test]
    fn test_recorders_without_exporter() {
        record_rate_limit_rejection();
        record_password_violation();
        record_audit("emitted");
        record_audit("deduplicated");
        record_cache_error("get");
        record_security_error("CACHE_ERROR");
        record_masked_fields(3);
    }
}
