//! Pre-trade risk controls.
//!
//! - `SignalGuard`: rejects stale and duplicate signals before anything else
//!   sees them
//! - `RiskGate`: ordered, short-circuiting account checks that must all pass
//!   before a trade is sized

pub mod error;
pub mod gate;
pub mod signal_guard;

pub use error::{RiskError, RiskResult};
pub use gate::{RiskDecision, RiskGate, RiskGateConfig};
pub use signal_guard::{SignalGuard, SignalGuardConfig, SignalGuardStats};
