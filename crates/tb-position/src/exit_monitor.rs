//! Multi-condition exit monitor.
//!
//! Nine independent exit conditions, each with a fixed priority. When several
//! fire on the same evaluation the lowest priority number wins, so a gap
//! through both the stop and the target always exits as `stop_loss`.
//!
//! | prio | type                 | input            |
//! |------|----------------------|------------------|
//! | 1    | `stop_loss`          | price            |
//! | 2    | `exhaustion`         | bars + cloud     |
//! | 3    | `cloud_flip`         | cloud            |
//! | 4    | `target`             | price            |
//! | 5    | `time_stop`          | price + clock    |
//! | 6    | `eod`                | clock            |
//! | 7    | `trailing`           | bars + cloud     |
//! | 8    | `trail_to_breakeven` | price (mutates)  |
//! | 9    | `scale_out`          | price            |
//!
//! Checks that need bars or cloud state are skipped when the caller has none.

use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tb_core::{parse_hhmm, Bar, CloudState, Direction, Position, Price, SessionHours, TradeType};

use crate::error::{PositionError, PositionResult};

// ============================================================================
// ExitType
// ============================================================================

/// Exit condition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    StopLoss,
    Exhaustion,
    CloudFlip,
    Target,
    TimeStop,
    Eod,
    Trailing,
    TrailToBreakeven,
    ScaleOut,
}

impl ExitType {
    pub const ALL: [ExitType; 9] = [
        Self::StopLoss,
        Self::Exhaustion,
        Self::CloudFlip,
        Self::Target,
        Self::TimeStop,
        Self::Eod,
        Self::Trailing,
        Self::TrailToBreakeven,
        Self::ScaleOut,
    ];

    /// 1 = act first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::StopLoss => 1,
            Self::Exhaustion => 2,
            Self::CloudFlip => 3,
            Self::Target => 4,
            Self::TimeStop => 5,
            Self::Eod => 6,
            Self::Trailing => 7,
            Self::TrailToBreakeven => 8,
            Self::ScaleOut => 9,
        }
    }

    /// False for stop adjustments that leave the position open.
    pub fn closes_position(&self) -> bool {
        !matches!(self, Self::TrailToBreakeven)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::Exhaustion => "exhaustion",
            Self::CloudFlip => "cloud_flip",
            Self::Target => "target",
            Self::TimeStop => "time_stop",
            Self::Eod => "eod",
            Self::Trailing => "trailing",
            Self::TrailToBreakeven => "trail_to_breakeven",
            Self::ScaleOut => "scale_out",
        }
    }
}

impl fmt::Display for ExitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ExitSignal / MarketContext
// ============================================================================

/// A fired exit condition. Transient; consumed by the caller immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitSignal {
    pub ticker: String,
    pub exit_type: ExitType,
    pub priority: u8,
    pub reason: String,
    /// Price the condition was evaluated at.
    pub price: Price,
    /// Quantity to close for a partial exit.
    pub partial_qty: Option<u32>,
}

impl ExitSignal {
    fn new(pos: &Position, exit_type: ExitType, reason: String) -> Self {
        Self {
            ticker: pos.ticker.clone(),
            exit_type,
            priority: exit_type.priority(),
            reason,
            price: pos.current_price,
            partial_qty: None,
        }
    }
}

/// Recent bars and cloud state for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Oldest first.
    #[serde(default)]
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub cloud: Option<CloudState>,
}

// ============================================================================
// ExitMonitorConfig
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitMonitorConfig {
    /// Consecutive closes against the fast cloud that mark exhaustion.
    #[serde(default = "default_exhaustion_bars")]
    pub exhaustion_bars: usize,
    /// R multiple for the derived target when the signal has none.
    #[serde(default = "default_target_r_multiple")]
    pub target_r_multiple: Decimal,
    #[serde(default = "default_time_stop_minutes")]
    pub time_stop_minutes: i64,
    /// Unrealized gain fraction below which a timed-out day trade exits.
    #[serde(default = "default_time_stop_min_gain_pct")]
    pub time_stop_min_gain_pct: Decimal,
    /// Local session time after which day trades are flattened.
    #[serde(default = "default_eod_cutoff")]
    pub eod_cutoff: String,
    #[serde(default = "default_session_timezone")]
    pub session_timezone: String,
    /// Profit in R that moves the stop to breakeven.
    #[serde(default = "default_one_r")]
    pub breakeven_trigger_r: Decimal,
    /// Offset beyond entry for the breakeven stop, as a fraction of entry.
    #[serde(default = "default_breakeven_buffer_pct")]
    pub breakeven_buffer_pct: Decimal,
    /// Profit in R that triggers the half-size scale-out.
    #[serde(default = "default_one_r")]
    pub scale_out_r: Decimal,
}

fn default_exhaustion_bars() -> usize {
    3
}

fn default_target_r_multiple() -> Decimal {
    Decimal::TWO
}

fn default_time_stop_minutes() -> i64 {
    90
}

fn default_time_stop_min_gain_pct() -> Decimal {
    Decimal::new(2, 3) // 0.2%
}

fn default_eod_cutoff() -> String {
    "15:50".to_string()
}

fn default_session_timezone() -> String {
    "America/New_York".to_string()
}

fn default_one_r() -> Decimal {
    Decimal::ONE
}

fn default_breakeven_buffer_pct() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}

impl Default for ExitMonitorConfig {
    fn default() -> Self {
        Self {
            exhaustion_bars: default_exhaustion_bars(),
            target_r_multiple: default_target_r_multiple(),
            time_stop_minutes: default_time_stop_minutes(),
            time_stop_min_gain_pct: default_time_stop_min_gain_pct(),
            eod_cutoff: default_eod_cutoff(),
            session_timezone: default_session_timezone(),
            breakeven_trigger_r: default_one_r(),
            breakeven_buffer_pct: default_breakeven_buffer_pct(),
            scale_out_r: default_one_r(),
        }
    }
}

// ============================================================================
// ExitMonitor
// ============================================================================

/// Evaluates open positions against the exit conditions.
#[derive(Debug, Clone)]
pub struct ExitMonitor {
    config: ExitMonitorConfig,
    session: SessionHours,
    eod_cutoff: NaiveTime,
}

impl ExitMonitor {
    pub fn new(config: ExitMonitorConfig) -> PositionResult<Self> {
        if config.exhaustion_bars == 0 {
            return Err(PositionError::InvalidConfig(
                "exhaustion_bars must be at least 1".to_string(),
            ));
        }
        let eod_cutoff = parse_hhmm(&config.eod_cutoff)?;
        let timezone = config.session_timezone.parse().map_err(|e| {
            PositionError::InvalidConfig(format!("timezone {}: {e}", config.session_timezone))
        })?;
        let session = SessionHours {
            timezone,
            ..SessionHours::default()
        };
        Ok(Self {
            config,
            session,
            eod_cutoff,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ExitMonitorConfig {
        &self.config
    }

    /// Run every check and return the highest-priority signal.
    ///
    /// May move the position's stop (breakeven trail) even when a different
    /// signal is returned.
    pub fn check_all(
        &self,
        pos: &mut Position,
        ctx: Option<&MarketContext>,
        now: DateTime<Utc>,
    ) -> Option<ExitSignal> {
        let mut fired: Vec<ExitSignal> = Vec::new();

        fired.extend(self.check_stop_loss(pos));
        if let Some(ctx) = ctx {
            fired.extend(self.check_exhaustion(pos, ctx));
            fired.extend(self.check_cloud_flip(pos, ctx));
        }
        fired.extend(self.check_target(pos));
        fired.extend(self.check_time_stop(pos, now));
        fired.extend(self.check_eod(pos, now));
        if let Some(ctx) = ctx {
            fired.extend(self.check_trailing(pos, ctx));
        }
        fired.extend(self.check_trail_to_breakeven(pos));
        fired.extend(self.check_scale_out(pos));

        let winner = fired.into_iter().min_by_key(|s| s.priority)?;
        debug!(
            ticker = %winner.ticker,
            exit_type = %winner.exit_type,
            price = %winner.price,
            "Exit condition fired"
        );
        Some(winner)
    }

    /// Price crossed the working stop.
    pub fn check_stop_loss(&self, pos: &Position) -> Option<ExitSignal> {
        let hit = match pos.direction {
            Direction::Long => pos.current_price <= pos.stop_loss,
            Direction::Short => pos.current_price >= pos.stop_loss,
        };
        hit.then(|| {
            ExitSignal::new(
                pos,
                ExitType::StopLoss,
                format!("price {} crossed stop {}", pos.current_price, pos.stop_loss),
            )
        })
    }

    /// The last N bar closes all sit outside the fast cloud against the trade.
    pub fn check_exhaustion(&self, pos: &Position, ctx: &MarketContext) -> Option<ExitSignal> {
        let cloud = ctx.cloud.as_ref()?;
        let n = self.config.exhaustion_bars;
        if ctx.bars.len() < n {
            return None;
        }
        let recent = &ctx.bars[ctx.bars.len() - n..];
        recent
            .iter()
            .all(|b| cloud.fast.closed_against(b.close, pos.direction))
            .then(|| {
                ExitSignal::new(
                    pos,
                    ExitType::Exhaustion,
                    format!("{n} consecutive closes outside fast cloud against {}", pos.direction),
                )
            })
    }

    /// Fast cloud trend opposes the position.
    pub fn check_cloud_flip(&self, pos: &Position, ctx: &MarketContext) -> Option<ExitSignal> {
        let cloud = ctx.cloud.as_ref()?;
        cloud.fast.opposes(pos.direction).then(|| {
            ExitSignal::new(
                pos,
                ExitType::CloudFlip,
                format!("fast cloud flipped against {} position", pos.direction),
            )
        })
    }

    /// Explicit target, or entry plus `target_r_multiple` R.
    pub fn check_target(&self, pos: &Position) -> Option<ExitSignal> {
        let target = self.target_for(pos)?;
        let hit = match pos.direction {
            Direction::Long => pos.current_price >= target,
            Direction::Short => pos.current_price <= target,
        };
        hit.then(|| {
            ExitSignal::new(
                pos,
                ExitType::Target,
                format!("price {} reached target {}", pos.current_price, target),
            )
        })
    }

    /// Target price used by [`check_target`](Self::check_target).
    pub fn target_for(&self, pos: &Position) -> Option<Price> {
        if let Some(t) = pos.target_price {
            return Some(t);
        }
        let risk = pos.risk_per_share();
        if risk.is_zero() {
            return None;
        }
        let offset = risk * self.config.target_r_multiple;
        Some(match pos.direction {
            Direction::Long => pos.entry_price + offset,
            Direction::Short => pos.entry_price - offset,
        })
    }

    /// Day trade held too long without meaningful gain.
    pub fn check_time_stop(&self, pos: &Position, now: DateTime<Utc>) -> Option<ExitSignal> {
        if pos.trade_type != TradeType::Day {
            return None;
        }
        let held = now - pos.entry_time;
        if held <= chrono::Duration::minutes(self.config.time_stop_minutes) {
            return None;
        }
        let gain = pos.unrealized_frac();
        (gain < self.config.time_stop_min_gain_pct).then(|| {
            ExitSignal::new(
                pos,
                ExitType::TimeStop,
                format!(
                    "held {}m with gain {:.4} below {}",
                    held.num_minutes(),
                    gain,
                    self.config.time_stop_min_gain_pct
                ),
            )
        })
    }

    /// Day trade still open at or after the end-of-day cutoff, or carried
    /// past the local date it was opened on.
    pub fn check_eod(&self, pos: &Position, now: DateTime<Utc>) -> Option<ExitSignal> {
        if pos.trade_type != TradeType::Day {
            return None;
        }
        let entry_date = self.session.local_date(pos.entry_time);
        if self.session.local_date(now) > entry_date {
            return Some(ExitSignal::new(
                pos,
                ExitType::Eod,
                format!("day trade carried over from {entry_date}"),
            ));
        }
        self.session.is_past(now, self.eod_cutoff).then(|| {
            ExitSignal::new(
                pos,
                ExitType::Eod,
                format!(
                    "end of day cutoff {} reached",
                    self.eod_cutoff.format("%H:%M")
                ),
            )
        })
    }

    /// Swing trade whose last close broke the pullback cloud.
    pub fn check_trailing(&self, pos: &Position, ctx: &MarketContext) -> Option<ExitSignal> {
        if pos.trade_type != TradeType::Swing {
            return None;
        }
        let band = ctx.cloud.as_ref()?.pullback?;
        let last = ctx.bars.last()?;
        band.closed_against(last.close, pos.direction).then(|| {
            ExitSignal::new(
                pos,
                ExitType::Trailing,
                format!("close {} broke pullback cloud", last.close),
            )
        })
    }

    /// Move the stop to breakeven once the trade is up 1R.
    ///
    /// Only ever tightens toward breakeven, so calls after the first
    /// adjustment return `None` and leave the stop unchanged.
    pub fn check_trail_to_breakeven(&self, pos: &mut Position) -> Option<ExitSignal> {
        let r = pos.r_multiple(pos.current_price)?;
        if r < self.config.breakeven_trigger_r {
            return None;
        }
        let buffer = pos.entry_price * self.config.breakeven_buffer_pct;
        let (new_stop, improves) = match pos.direction {
            Direction::Long => {
                let s = pos.entry_price + buffer;
                (s, s > pos.stop_loss)
            }
            Direction::Short => {
                let s = pos.entry_price - buffer;
                (s, s < pos.stop_loss)
            }
        };
        if !improves {
            return None;
        }
        let old = pos.stop_loss;
        pos.stop_loss = new_stop;
        info!(
            ticker = %pos.ticker,
            old_stop = %old,
            new_stop = %new_stop,
            r_multiple = %r,
            "Stop moved to breakeven"
        );
        Some(ExitSignal::new(
            pos,
            ExitType::TrailToBreakeven,
            format!("stop moved from {old} to {new_stop} at {r:.2}R"),
        ))
    }

    /// Half-size partial close at 1R for multi-unit positions, once.
    pub fn check_scale_out(&self, pos: &Position) -> Option<ExitSignal> {
        if pos.shares <= 1 || pos.scaled_out {
            return None;
        }
        let r = pos.r_multiple(pos.current_price)?;
        if r < self.config.scale_out_r {
            return None;
        }
        let qty = pos.shares / 2;
        let mut signal = ExitSignal::new(
            pos,
            ExitType::ScaleOut,
            format!("scale out {qty} of {} at {r:.2}R", pos.shares),
        );
        signal.partial_qty = Some(qty);
        Some(signal)
    }
}

// ============================================================================
// Tests
// ============================================================================
