//! Signal freshness and deduplication guard.
//!
//! Runs before the orchestrator takes its book lock, so it owns an
//! independent lock and is safe to call from several signal sources at once.
//! The dedup cache evicts expired keys on every lookup and is therefore
//! bounded by the number of distinct keys seen within one window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use tb_core::{Clock, SignalKey, SystemClock, TradeSignal};

/// Signal guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalGuardConfig {
    /// Oldest acceptable signal age.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Window within which a repeated key is a duplicate.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    /// Allowed clock skew for future-dated signals.
    #[serde(default = "default_future_tolerance_secs")]
    pub future_tolerance_secs: u64,
}

fn default_max_age_secs() -> u64 {
    300
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_future_tolerance_secs() -> u64 {
    5
}

impl Default for SignalGuardConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            future_tolerance_secs: default_future_tolerance_secs(),
        }
    }
}

/// Observability counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalGuardStats {
    pub active_entries: usize,
    pub dedup_window_secs: u64,
    pub max_age_secs: u64,
}

/// Rejects stale and duplicate signals.
pub struct SignalGuard {
    config: SignalGuardConfig,
    clock: Arc<dyn Clock>,
    /// Key -> monotonic time first seen in the current window.
    seen: Mutex<HashMap<SignalKey, Duration>>,
}

impl SignalGuard {
    pub fn new(config: SignalGuardConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SignalGuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.dedup_window_secs)
    }

    /// True when the signal is within `max_age` of now and not dated beyond
    /// the future tolerance.
    pub fn is_fresh(&self, signal: &TradeSignal) -> bool {
        self.staleness(signal, self.clock.now()).is_none()
    }

    /// True when the signal's key was already seen within the window.
    ///
    /// A non-duplicate is recorded, so an immediate second call returns true.
    pub fn is_duplicate(&self, signal: &TradeSignal) -> bool {
        let now = self.clock.monotonic();
        let window = self.window();
        let key = signal.key();

        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.saturating_sub(*at) < window);

        if seen.contains_key(&key) {
            trace!(key = %key, "Duplicate signal");
            return true;
        }
        seen.insert(key, now);
        false
    }

    /// Freshness then dedup. `None` means the signal may proceed.
    ///
    /// Stale signals are not recorded in the dedup cache.
    pub fn check(&self, signal: &TradeSignal) -> Option<String> {
        if let Some(reason) = self.staleness(signal, self.clock.now()) {
            debug!(ticker = %signal.ticker, reason = %reason, "Signal rejected as stale");
            return Some(reason);
        }
        if self.is_duplicate(signal) {
            let reason = format!(
                "duplicate signal {} within {}s window",
                signal.key(),
                self.config.dedup_window_secs
            );
            debug!(ticker = %signal.ticker, reason = %reason, "Signal rejected as duplicate");
            return Some(reason);
        }
        None
    }

    /// Drop every cached key.
    pub fn clear(&self) {
        let mut seen = self.seen.lock();
        let n = seen.len();
        seen.clear();
        debug!(cleared = n, "Signal guard cache cleared");
    }

    pub fn get_stats(&self) -> SignalGuardStats {
        let now = self.clock.monotonic();
        let window = self.window();
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.saturating_sub(*at) < window);
        SignalGuardStats {
            active_entries: seen.len(),
            dedup_window_secs: self.config.dedup_window_secs,
            max_age_secs: self.config.max_age_secs,
        }
    }

    fn staleness(&self, signal: &TradeSignal, now: DateTime<Utc>) -> Option<String> {
        let age = now - signal.timestamp;
        let max_age = chrono::Duration::seconds(self.config.max_age_secs as i64);
        let tolerance = chrono::Duration::seconds(self.config.future_tolerance_secs as i64);

        if age > max_age {
            return Some(format!(
                "stale signal: age {}s exceeds max {}s",
                age.num_seconds(),
                self.config.max_age_secs
            ));
        }
        if -age > tolerance {
            return Some(format!(
                "future-dated signal: {}s ahead of clock",
                (-age).num_seconds()
            ));
        }
        None
    }
}
