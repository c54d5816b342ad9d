//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the indexer.
//!
//! # Metrics
//!
//! - `indexer_transactions_total` - Transactions that reached a terminal state
//! - `indexer_applied_total{op}` - Applied operations by kind
//! - `indexer_rejected_total{reason}` - Rejected operations by reason
//! - `indexer_rollbacks_total` - Rollbacks performed
//! - `indexer_rolled_back_transactions_total` - Transactions undone by rollbacks
//! - `indexer_cursor_height` - Block height of the cursor
//! - `indexer_apply_duration_seconds` - Histogram of per-transaction latency

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
///
/// Owns its registry, so several indexers can live in one process.
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Transactions processed
    pub transactions_total: IntCounter,

    /// Applied operations by kind
    pub applied_total: IntCounterVec,

    /// Rejections by reason
    pub rejected_total: IntCounterVec,

    /// Rollbacks performed
    pub rollbacks_total: IntCounter,

    /// Transactions undone
    pub rolled_back_total: IntCounter,

    /// Cursor block height
    pub cursor_height: IntGauge,

    /// Processing duration histogram
    pub apply_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounter::new(
            "indexer_transactions_total",
            "Transactions that reached a terminal state",
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let applied_total = IntCounterVec::new(
            Opts::new("indexer_applied_total", "Applied operations by kind"),
            &["op"],
        )?;
        registry.register(Box::new(applied_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("indexer_rejected_total", "Rejected operations by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let rollbacks_total = IntCounter::new("indexer_rollbacks_total", "Rollbacks performed")?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let rolled_back_total = IntCounter::new(
            "indexer_rolled_back_transactions_total",
            "Transactions undone by rollbacks",
        )?;
        registry.register(Box::new(rolled_back_total.clone()))?;

        let cursor_height =
            IntGauge::new("indexer_cursor_height", "Block height of the cursor")?;
        registry.register(Box::new(cursor_height.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "indexer_apply_duration_seconds",
                "Histogram of per-transaction processing latency",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        Ok(Self {
            transactions_total,
            applied_total,
            rejected_total,
            rollbacks_total,
            rolled_back_total,
            cursor_height,
            apply_duration,
            registry,
        })
    }

    /// Record an applied operation
    pub fn record_applied(&self, op_kind: &str) {
        self.transactions_total.inc();
        self.applied_total.with_label_values(&[op_kind]).inc();
    }

    /// Record a rejected operation
    pub fn record_rejected(&self, reason: &str) {
        self.transactions_total.inc();
        self.rejected_total.with_label_values(&[reason]).inc();
    }

    /// Record a rollback
    pub fn record_rollback(&self, undone: usize) {
        self.rollbacks_total.inc();
        self.rolled_back_total.inc_by(undone as u64);
    }

    /// Record processing duration
    pub fn record_apply_duration(&self, duration_seconds: f64) {
        self.apply_duration.observe(duration_seconds);
    }

    /// Update cursor gauge
    pub fn update_cursor_height(&self, height: u64) {
        self.cursor_height.set(i64::try_from(height).unwrap_or(i64::MAX));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
