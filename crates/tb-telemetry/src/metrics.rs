//! Prometheus metrics for the execution core.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, IntCounter, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Total signals handed to the pipeline.
pub static SIGNALS_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tb_signals_received_total",
        "Total trade signals received by the pipeline"
    )
    .unwrap()
});

/// Pipeline terminal outcomes.
/// Labels: stage (terminal pipeline stage), outcome (success/rejected)
pub static PIPELINE_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tb_pipeline_outcomes_total",
        "Signal pipeline outcomes by terminal stage",
        &["stage", "outcome"]
    )
    .unwrap()
});

/// Orders submitted.
/// Labels: purpose (entry/exit), status (final broker status)
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tb_orders_total",
        "Orders submitted by purpose and final status",
        &["purpose", "status"]
    )
    .unwrap()
});

/// Retried submission attempts (attempts after the first).
pub static ORDER_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tb_order_retries_total", "Order submission retries").unwrap()
});

/// Exits executed by exit type.
pub static EXITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tb_exits_total",
        "Exits executed by exit type",
        &["exit_type"]
    )
    .unwrap()
});

/// Optional side-effect failures by hook.
pub static HOOK_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tb_hook_failures_total",
        "Failures of optional side-effect hooks",
        &["hook"]
    )
    .unwrap()
});

/// Open positions in the local book.
pub static POSITIONS_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tb_positions_open", "Open positions in the local book").unwrap()
});

/// Kill switch state (1 = active).
pub static KILL_SWITCH_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tb_kill_switch_active", "Kill switch state (1=active)").unwrap()
});

/// Realized P&L for the current trading day.
pub static DAILY_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("tb_daily_pnl", "Realized P&L for the current trading day").unwrap()
});

/// Last reconciliation result by mismatch kind.
pub static RECONCILIATION_MISMATCHES: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tb_reconciliation_mismatches",
        "Mismatches found by the last reconciliation",
        &["kind"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn signal_received() {
        SIGNALS_RECEIVED_TOTAL.inc();
    }

    /// Record where a signal's pipeline ended.
    pub fn pipeline_outcome(stage: &str, success: bool) {
        let outcome = if success { "success" } else { "rejected" };
        PIPELINE_OUTCOMES_TOTAL
            .with_label_values(&[stage, outcome])
            .inc();
    }

    pub fn order_submitted(purpose: &str, status: &str) {
        ORDERS_TOTAL.with_label_values(&[purpose, status]).inc();
    }

    pub fn order_retry() {
        ORDER_RETRIES_TOTAL.inc();
    }

    pub fn exit_executed(exit_type: &str) {
        EXITS_TOTAL.with_label_values(&[exit_type]).inc();
    }

    pub fn hook_failed(hook: &str) {
        HOOK_FAILURES_TOTAL.with_label_values(&[hook]).inc();
    }

    pub fn positions_open(count: usize) {
        POSITIONS_OPEN.set(count as i64);
    }

    pub fn kill_switch(active: bool) {
        KILL_SWITCH_ACTIVE.set(if active { 1 } else { 0 });
    }

    pub fn daily_pnl(pnl: f64) {
        DAILY_PNL.set(pnl);
    }

    pub fn reconciliation(kind: &str, count: usize) {
        RECONCILIATION_MISMATCHES
            .with_label_values(&[kind])
            .set(count as f64);
    }

    /// Text exposition of every registered metric.
    pub fn encode() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
