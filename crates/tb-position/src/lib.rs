//! Open-position management.
//!
//! Provides:
//! - `ExitMonitor`: nine ranked exit conditions evaluated per position
//! - `PositionReconciler`: local book vs broker comparison (ghost/orphaned
//!   detection)

pub mod error;
pub mod exit_monitor;
pub mod reconciler;

pub use error::{PositionError, PositionResult};
pub use exit_monitor::{ExitMonitor, ExitMonitorConfig, ExitSignal, ExitType, MarketContext};
pub use reconciler::{
    BrokerPosition, MismatchKind, PositionMismatch, PositionReconciler, ReconcilerConfig,
    ReconciliationReport, Severity,
};
