//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_operations_total{operation}` - Completed operations, successful or not
//! - `ledger_operation_failures_total{operation,reason}` - Rejected or failed operations
//! - `ledger_operation_duration_seconds{operation}` - Operation latencies
//! - `ledger_accounts_created_total` - Accounts opened
//! - `ledger_accounts_deleted_total` - Accounts deleted
//! - `ledger_transferred_minor_units_total` - Money moved by transfers, in minor units

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Completed operations
    pub operations_total: IntCounterVec,

    /// Failed operations by reason
    pub failures_total: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: HistogramVec,

    /// Accounts created
    pub accounts_created: IntCounter,

    /// Accounts deleted
    pub accounts_deleted: IntCounter,

    /// Transferred volume
    pub transferred_minor_units: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Completed ledger operations"),
            &["operation"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new(
                "ledger_operation_failures_total",
                "Rejected or failed ledger operations",
            ),
            &["operation", "reason"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of ledger operation latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let accounts_created =
            IntCounter::new("ledger_accounts_created_total", "Accounts opened")?;
        registry.register(Box::new(accounts_created.clone()))?;

        let accounts_deleted =
            IntCounter::new("ledger_accounts_deleted_total", "Accounts deleted")?;
        registry.register(Box::new(accounts_deleted.clone()))?;

        let transferred_minor_units = IntCounter::new(
            "ledger_transferred_minor_units_total",
            "Money moved by transfers, in minor units",
        )?;
        registry.register(Box::new(transferred_minor_units.clone()))?;

        Ok(Self {
            operations_total,
            failures_total,
            operation_duration,
            accounts_created,
            accounts_deleted,
            transferred_minor_units,
            registry,
        })
    }

    /// Record a finished operation
    pub fn record_operation(&self, operation: &str, duration_seconds: f64) {
        self.operations_total.with_label_values(&[operation]).inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record a failed operation
    pub fn record_failure(&self, operation: &str, reason: &str) {
        self.failures_total
            .with_label_values(&[operation, reason])
            .inc();
    }

    /// Record account creation
    pub fn record_account_created(&self) {
        self.accounts_created.inc();
    }

    /// Record account deletion
    pub fn record_account_deleted(&self) {
        self.accounts_deleted.inc();
    }

    /// Record transferred volume
    pub fn record_transfer_volume(&self, minor_units: u64) {
        self.transferred_minor_units.inc_by(minor_units);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("accounts_created", &self.accounts_created.get())
            .field("accounts_deleted", &self.accounts_deleted.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.accounts_created.get(), 0);
        assert_eq!(metrics.accounts_deleted.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_account_created();
        assert_eq!(first.accounts_created.get(), 1);
        assert_eq!(second.accounts_created.get(), 0);
    }

    #[test]
    fn test_record_operation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation("transfer", 0.002);
        metrics.record_operation("transfer", 0.003);
        assert_eq!(
            metrics
                .operations_total
                .with_label_values(&["transfer"])
                .get(),
            2
        );
    }

    #[test]
    fn test_record_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure("transfer", "insufficient_funds");
        assert_eq!(
            metrics
                .failures_total
                .with_label_values(&["transfer", "insufficient_funds"])
                .get(),
            1
        );
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transfer_volume(3_000);
        let text = metrics.render().unwrap();
        assert!(text.contains("ledger_transferred_minor_units_total 3000"));
    }
}
