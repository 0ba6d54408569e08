//! Crash-safe persistent risk state.
//!
//! Holds the process-wide values that must survive a restart:
//! - Kill switch (manually cleared only)
//! - Daily and lifetime realized P&L, with automatic date rollover
//! - Consecutive-loss streak
//! - Circuit breaker status
//!
//! Every mutation is written atomically (temp file + rename).

pub mod error;
pub mod manager;

pub use error::{StateError, StateResult};
pub use manager::{CircuitBreakerStatus, PersistentState, PersistentStateManager, STATE_FILE_NAME};
