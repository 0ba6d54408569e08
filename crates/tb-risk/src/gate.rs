//! Pre-trade risk gate.
//!
//! Stateless: every decision is a pure function of the signal, the caller's
//! account snapshot and the evaluation instant.
//!
//! # Check Order
//!
//! Checks run in a fixed order and stop at the first failure, so the caller
//! always sees the earliest violated rule:
//!
//! 1. daily_loss        - realized loss fraction of starting equity
//! 2. max_positions     - open position count
//! 3. same_direction    - existing same-side position must be profitable
//! 4. opposite_position - no simultaneous long and short on one ticker
//! 5. ticker_exposure   - existing single-ticker notional vs equity
//! 6. market_session    - regular session only (daily timeframes exempt)
//! 7. min_equity        - account floor
//! 8. buying_power      - a minimal position must be affordable

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use tb_core::{AccountState, Price, SessionHours, TradeSignal};

use crate::error::{RiskError, RiskResult};

/// Risk gate configuration.
///
/// Fractions are expressed as decimals (`0.03` = 3%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGateConfig {
    /// Daily realized loss, as a fraction of starting equity, that blocks
    /// new entries.
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Maximum notional in one ticker as a fraction of equity.
    #[serde(default = "default_max_single_ticker_exposure_pct")]
    pub max_single_ticker_exposure_pct: Decimal,
    #[serde(default = "default_min_equity")]
    pub min_equity: Price,
    /// Size of the smallest position used for the buying-power check.
    #[serde(default = "default_min_position_shares")]
    pub min_position_shares: u32,
    #[serde(default = "default_session_timezone")]
    pub session_timezone: String,
    #[serde(default = "default_session_open")]
    pub session_open: String,
    #[serde(default = "default_session_close")]
    pub session_close: String,
}

fn default_daily_loss_limit_pct() -> Decimal {
    Decimal::new(3, 2) // 3%
}

fn default_max_open_positions() -> usize {
    5
}

fn default_max_single_ticker_exposure_pct() -> Decimal {
    Decimal::new(20, 2) // 20%
}

fn default_min_equity() -> Price {
    Price::from(2_000u32)
}

fn default_min_position_shares() -> u32 {
    1
}

fn default_session_timezone() -> String {
    "America/New_York".to_string()
}

fn default_session_open() -> String {
    "09:30".to_string()
}

fn default_session_close() -> String {
    "16:00".to_string()
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            max_open_positions: default_max_open_positions(),
            max_single_ticker_exposure_pct: default_max_single_ticker_exposure_pct(),
            min_equity: default_min_equity(),
            min_position_shares: default_min_position_shares(),
            session_timezone: default_session_timezone(),
            session_open: default_session_open(),
            session_close: default_session_close(),
        }
    }
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: String,
    /// Approved as an add to an existing profitable same-direction position.
    pub add_to_existing: bool,
}

impl RiskDecision {
    pub fn approve(add_to_existing: bool) -> Self {
        Self {
            approved: true,
            reason: "approved".to_string(),
            add_to_existing,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            add_to_existing: false,
        }
    }
}

/// Pre-trade risk gate.
#[derive(Debug, Clone)]
pub struct RiskGate {
    config: RiskGateConfig,
    session: SessionHours,
}

impl RiskGate {
    /// Create a gate; fails on an unparseable session timezone or time.
    pub fn new(config: RiskGateConfig) -> RiskResult<Self> {
        let session = SessionHours::parse(
            &config.session_timezone,
            &config.session_open,
            &config.session_close,
        )?;
        if config.max_open_positions == 0 {
            return Err(RiskError::ConfigError(
                "max_open_positions must be at least 1".to_string(),
            ));
        }
        Ok(Self { config, session })
    }

    #[must_use]
    pub fn config(&self) -> &RiskGateConfig {
        &self.config
    }

    /// Evaluate at the current wall-clock time.
    pub fn evaluate(&self, signal: &TradeSignal, account: &AccountState) -> RiskDecision {
        self.evaluate_at(signal, account, Utc::now())
    }

    /// Evaluate all checks at `now`, returning on the first failure.
    pub fn evaluate_at(
        &self,
        signal: &TradeSignal,
        account: &AccountState,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let decision = self.run_checks(signal, account, now);
        if decision.approved {
            trace!(
                ticker = %signal.ticker,
                add_to_existing = decision.add_to_existing,
                "Risk gate approved"
            );
        } else {
            debug!(
                ticker = %signal.ticker,
                direction = %signal.direction,
                reason = %decision.reason,
                "Risk gate rejected"
            );
        }
        decision
    }

    fn run_checks(
        &self,
        signal: &TradeSignal,
        account: &AccountState,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        // 1. daily_loss
        if let Some(reason) = self.check_daily_loss(account) {
            return RiskDecision::reject(reason);
        }

        // 2. max_positions
        if account.open_positions.len() >= self.config.max_open_positions {
            return RiskDecision::reject(format!(
                "max open positions reached: {} >= {}",
                account.open_positions.len(),
                self.config.max_open_positions
            ));
        }

        let existing = account.position_for(&signal.ticker);

        // 3. same_direction
        let mut add_to_existing = false;
        if let Some(pos) = existing.filter(|p| p.direction == signal.direction) {
            if !pos.is_profitable() {
                return RiskDecision::reject(format!(
                    "existing {} {} position is not profitable",
                    pos.direction, pos.ticker
                ));
            }
            add_to_existing = true;
        }

        // 4. opposite_position
        if let Some(pos) = existing.filter(|p| p.direction != signal.direction) {
            return RiskDecision::reject(format!(
                "opposite {} position already open in {}",
                pos.direction, pos.ticker
            ));
        }

        // 5. ticker_exposure
        if let (Some(pos), true) = (existing, account.equity.is_positive()) {
            let exposure = pos.notional().inner() / account.equity.inner();
            if exposure >= self.config.max_single_ticker_exposure_pct {
                return RiskDecision::reject(format!(
                    "single-ticker exposure {:.4} >= limit {} for {}",
                    exposure, self.config.max_single_ticker_exposure_pct, pos.ticker
                ));
            }
        }

        // 6. market_session
        if !signal.is_daily_timeframe() && !self.session.is_regular_session_at(now) {
            return RiskDecision::reject(format!(
                "outside regular market session ({} local) for {} timeframe",
                self.session.local_time(now).format("%H:%M"),
                signal.timeframe
            ));
        }

        // 7. min_equity
        if account.equity < self.config.min_equity {
            return RiskDecision::reject(format!(
                "equity {} below minimum {}",
                account.equity, self.config.min_equity
            ));
        }

        // 8. buying_power
        let multiplier = signal.instrument_hint().multiplier();
        let min_notional =
            signal.entry_price.times_qty(self.config.min_position_shares) * multiplier;
        if min_notional > account.buying_power {
            return RiskDecision::reject(format!(
                "insufficient buying power: need {} have {}",
                min_notional, account.buying_power
            ));
        }

        RiskDecision::approve(add_to_existing)
    }

    fn check_daily_loss(&self, account: &AccountState) -> Option<String> {
        if !account.daily_pnl.inner().is_sign_negative() || account.daily_pnl.is_zero() {
            return None;
        }
        let base = if account.starting_equity.is_positive() {
            account.starting_equity
        } else {
            account.equity
        };
        if !base.is_positive() {
            return None;
        }
        let loss_frac = account.daily_pnl.abs().inner() / base.inner();
        if loss_frac >= self.config.daily_loss_limit_pct {
            return Some(format!(
                "daily loss limit reached: {:.4} >= {}",
                loss_frac, self.config.daily_loss_limit_pct
            ));
        }
        None
    }
}
