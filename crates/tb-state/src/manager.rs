//! Persistent state manager.
//!
//! The manager owns a single [`PersistentState`] document behind one lock.
//! Public methods lock, mutate, and persist before returning; private
//! `*_locked` helpers operate on the already-guarded state so that composite
//! operations never re-acquire the lock.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/bot_state.json      authoritative copy
//! <state_dir>/bot_state.json.tmp  written first, then renamed over
//! ```
//!
//! A crash mid-write leaves either the old or the new document, never a
//! truncated one. A corrupt document reads as defaults.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use tb_core::{Clock, Price, SystemClock};

use crate::error::StateResult;

/// State file name inside the state directory.
pub const STATE_FILE_NAME: &str = "bot_state.json";

// ============================================================================
// CircuitBreakerStatus
// ============================================================================

/// Circuit breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerStatus {
    /// Normal operation.
    #[default]
    Closed,
    /// Trading blocked.
    Open,
    /// Probing after an open period.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

// ============================================================================
// PersistentState
// ============================================================================

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentState {
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    pub kill_switch_activated_at: Option<DateTime<Utc>>,
    pub daily_pnl: Price,
    pub daily_trade_count: u32,
    pub daily_date: Option<NaiveDate>,
    /// Never rolls over.
    pub lifetime_pnl: Price,
    /// Loss magnitudes of the current losing streak, oldest first.
    pub consecutive_losses: Vec<Price>,
    pub circuit_breaker_status: CircuitBreakerStatus,
    pub circuit_breaker_reason: Option<String>,
    pub last_signal_time: Option<DateTime<Utc>>,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            kill_switch_active: false,
            kill_switch_reason: None,
            kill_switch_activated_at: None,
            daily_pnl: Price::ZERO,
            daily_trade_count: 0,
            daily_date: None,
            lifetime_pnl: Price::ZERO,
            consecutive_losses: Vec::new(),
            circuit_breaker_status: CircuitBreakerStatus::Closed,
            circuit_breaker_reason: None,
            last_signal_time: None,
            last_trade_time: None,
        }
    }
}

// ============================================================================
// PersistentStateManager
// ============================================================================

/// Lock-guarded, file-backed risk state.
///
/// Construct once per process and share via `Arc`.
pub struct PersistentStateManager {
    path: PathBuf,
    state: Mutex<PersistentState>,
    clock: Arc<dyn Clock>,
    /// Timezone that defines the trading day.
    day_tz: Tz,
}

impl PersistentStateManager {
    /// Open (or create) state under `state_dir` using the system clock and
    /// New York trading days.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self::with_clock(
            state_dir,
            Arc::new(SystemClock),
            chrono_tz::America::New_York,
        )
    }

    /// Open with an explicit clock and trading-day timezone.
    pub fn with_clock(state_dir: impl AsRef<Path>, clock: Arc<dyn Clock>, day_tz: Tz) -> Self {
        let dir = state_dir.as_ref();
        if let Err(e) = fs::create_dir_all(dir) {
            warn!(?e, dir = %dir.display(), "Failed to create state directory");
        }
        let path = dir.join(STATE_FILE_NAME);
        let mut state = load_state(&path);
        let today = clock.now().with_timezone(&day_tz).date_naive();
        if state.daily_date.is_none() {
            state.daily_date = Some(today);
        }

        if state.kill_switch_active {
            error!(
                reason = ?state.kill_switch_reason,
                activated_at = ?state.kill_switch_activated_at,
                "Kill switch is ACTIVE from previous session"
            );
        }
        info!(
            path = %path.display(),
            daily_pnl = %state.daily_pnl,
            lifetime_pnl = %state.lifetime_pnl,
            loss_streak = state.consecutive_losses.len(),
            "Persistent state loaded"
        );

        Self {
            path,
            state: Mutex::new(state),
            clock,
            day_tz,
        }
    }

    /// Path of the state document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ------------------------------------------------------------------
    // Kill switch
    // ------------------------------------------------------------------

    pub fn kill_switch_active(&self) -> bool {
        self.state.lock().kill_switch_active
    }

    pub fn kill_switch_reason(&self) -> Option<String> {
        self.state.lock().kill_switch_reason.clone()
    }

    /// Activate the kill switch.
    ///
    /// If already active, the original reason and timestamp are kept.
    pub fn activate_kill_switch(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.kill_switch_active {
            warn!(
                new_reason = %reason,
                existing_reason = ?state.kill_switch_reason,
                "Kill switch already active, ignoring new activation"
            );
            return;
        }
        state.kill_switch_active = true;
        state.kill_switch_reason = Some(reason.to_string());
        state.kill_switch_activated_at = Some(self.clock.now());
        error!(reason = %reason, "KILL SWITCH ACTIVATED");
        self.persist_locked(&state);
    }

    /// Manually clear the kill switch. Also clears the loss streak.
    pub fn deactivate_kill_switch(&self) {
        let mut state = self.state.lock();
        let previous = state.kill_switch_reason.take();
        state.kill_switch_active = false;
        state.kill_switch_activated_at = None;
        state.consecutive_losses.clear();
        info!(previous_reason = ?previous, "Kill switch deactivated");
        self.persist_locked(&state);
    }

    // ------------------------------------------------------------------
    // P&L
    // ------------------------------------------------------------------

    /// Record a realized trade P&L.
    pub fn record_trade_pnl(&self, pnl: Price) {
        let mut state = self.state.lock();
        self.rollover_locked(&mut state);

        state.daily_pnl = state.daily_pnl + pnl;
        state.lifetime_pnl = state.lifetime_pnl + pnl;
        state.daily_trade_count += 1;
        if pnl.inner().is_sign_negative() && !pnl.is_zero() {
            state.consecutive_losses.push(pnl.abs());
        } else {
            state.consecutive_losses.clear();
        }

        debug!(
            pnl = %pnl,
            daily_pnl = %state.daily_pnl,
            daily_trades = state.daily_trade_count,
            loss_streak = state.consecutive_losses.len(),
            "Trade P&L recorded"
        );
        self.persist_locked(&state);
    }

    /// Realized P&L for the current trading day.
    pub fn daily_pnl(&self) -> Price {
        let mut state = self.state.lock();
        self.rollover_locked(&mut state);
        state.daily_pnl
    }

    pub fn daily_trade_count(&self) -> u32 {
        let mut state = self.state.lock();
        self.rollover_locked(&mut state);
        state.daily_trade_count
    }

    pub fn lifetime_pnl(&self) -> Price {
        self.state.lock().lifetime_pnl
    }

    /// Length of the current losing streak.
    pub fn consecutive_losses(&self) -> usize {
        self.state.lock().consecutive_losses.len()
    }

    // ------------------------------------------------------------------
    // Timestamps and circuit breaker
    // ------------------------------------------------------------------

    pub fn record_signal_time(&self) {
        let mut state = self.state.lock();
        state.last_signal_time = Some(self.clock.now());
        self.persist_locked(&state);
    }

    pub fn record_trade_time(&self) {
        let mut state = self.state.lock();
        state.last_trade_time = Some(self.clock.now());
        self.persist_locked(&state);
    }

    pub fn set_circuit_breaker(&self, status: CircuitBreakerStatus, reason: Option<&str>) {
        let mut state = self.state.lock();
        if state.circuit_breaker_status != status {
            warn!(
                from = %state.circuit_breaker_status,
                to = %status,
                reason = ?reason,
                "Circuit breaker status changed"
            );
        }
        state.circuit_breaker_status = status;
        state.circuit_breaker_reason = reason.map(str::to_string);
        self.persist_locked(&state);
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerStatus {
        self.state.lock().circuit_breaker_status
    }

    /// Read-only copy of the whole document (after date rollover).
    pub fn get_snapshot(&self) -> PersistentState {
        let mut state = self.state.lock();
        self.rollover_locked(&mut state);
        state.clone()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Reset daily counters when the trading day changed. Never touches the
    /// kill switch.
    fn rollover_locked(&self, state: &mut PersistentState) {
        let today = self.clock.now().with_timezone(&self.day_tz).date_naive();
        if state.daily_date == Some(today) {
            return;
        }
        info!(
            previous_date = ?state.daily_date,
            new_date = %today,
            previous_daily_pnl = %state.daily_pnl,
            previous_trades = state.daily_trade_count,
            kill_switch_active = state.kill_switch_active,
            "Daily rollover"
        );
        state.daily_date = Some(today);
        state.daily_pnl = Price::ZERO;
        state.daily_trade_count = 0;
        self.persist_locked(state);
    }

    /// Persist, logging instead of failing.
    fn persist_locked(&self, state: &PersistentState) {
        if let Err(e) = write_atomic(&self.path, state) {
            warn!(
                error = %e,
                path = %self.path.display(),
                "Failed to persist state; in-memory state remains authoritative"
            );
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `state` to a sibling temp file, fsync, then rename over `path`.
fn write_atomic(path: &Path, state: &PersistentState) -> StateResult<()> {
    let tmp = tmp_path(path);
    let json = serde_json::to_vec_pretty(state)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load state; missing or corrupt files yield defaults.
fn load_state(path: &Path) -> PersistentState {
    if !path.exists() {
        return PersistentState::default();
    }
    let parsed = fs::read_to_string(path)
        .map_err(crate::error::StateError::from)
        .and_then(|s| serde_json::from_str::<PersistentState>(&s).map_err(Into::into));
    match parsed {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, path = %path.display(), "Corrupt state file, using defaults");
            PersistentState::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
