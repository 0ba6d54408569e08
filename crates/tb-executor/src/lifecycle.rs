//! Periodic position management.
//!
//! The lifecycle manager is the timer-driven half of the bot: it pushes
//! fresh prices into the orchestrator's book, runs the exit monitor over
//! every open position and routes the resulting exits back through
//! [`BotOrchestrator::close_position`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use tb_core::{Clock, Price, SystemClock};
use tb_position::{ExitMonitor, ExitSignal, MarketContext};
use tb_telemetry::Metrics;

use crate::history::ClosedPosition;
use crate::orchestrator::BotOrchestrator;

/// Aggregate view of the open book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub open_positions: usize,
    pub total_unrealized_pnl: Price,
    pub total_notional: Price,
    pub daily_realized_pnl: Price,
    pub kill_switch_active: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct LifecycleManager {
    orchestrator: Arc<BotOrchestrator>,
    exit_monitor: ExitMonitor,
    clock: Arc<dyn Clock>,
}

impl LifecycleManager {
    pub fn new(orchestrator: Arc<BotOrchestrator>, exit_monitor: ExitMonitor) -> Self {
        Self {
            orchestrator,
            exit_monitor,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn orchestrator(&self) -> &Arc<BotOrchestrator> {
        &self.orchestrator
    }

    pub async fn update_prices(&self, prices: &HashMap<String, Price>) -> usize {
        let updated = self.orchestrator.update_prices(prices).await;
        debug!(updated, quotes = prices.len(), "Prices refreshed");
        updated
    }

    /// Refresh prices, then evaluate every open position.
    ///
    /// Runs under the book lock, so breakeven stop moves land directly on the
    /// book's positions. Returns at most one signal per position.
    pub async fn check_exits(
        &self,
        prices: &HashMap<String, Price>,
        market_data: &HashMap<String, MarketContext>,
    ) -> Vec<ExitSignal> {
        self.update_prices(prices).await;
        let now = self.clock.now();
        let monitor = &self.exit_monitor;
        self.orchestrator
            .evaluate_positions(|pos| {
                let ctx = market_data.get(&pos.ticker);
                monitor.check_all(pos, ctx, now)
            })
            .await
    }

    /// Close a position for every closing signal.
    ///
    /// Scale-outs close their partial quantity; signals that only move a
    /// stop are skipped.
    pub async fn execute_exits(
        &self,
        signals: &[ExitSignal],
        prices: &HashMap<String, Price>,
    ) -> Vec<ClosedPosition> {
        let mut closed = Vec::new();
        for signal in signals {
            if !signal.exit_type.closes_position() {
                continue;
            }
            let price = prices.get(&signal.ticker).copied().unwrap_or(signal.price);
            match self
                .orchestrator
                .close_position(
                    &signal.ticker,
                    signal.exit_type.as_str(),
                    Some(price),
                    signal.partial_qty,
                )
                .await
            {
                Some(c) => {
                    Metrics::exit_executed(signal.exit_type.as_str());
                    info!(
                        ticker = %signal.ticker,
                        exit_type = %signal.exit_type,
                        reason = %signal.reason,
                        pnl = %c.realized_pnl,
                        "Exit executed"
                    );
                    closed.push(c);
                }
                None => {
                    error!(
                        ticker = %signal.ticker,
                        exit_type = %signal.exit_type,
                        "Exit could not be executed"
                    );
                }
            }
        }
        closed
    }

    /// One lifecycle pass: check then execute.
    pub async fn tick(
        &self,
        prices: &HashMap<String, Price>,
        market_data: &HashMap<String, MarketContext>,
    ) -> Vec<ClosedPosition> {
        let signals = self.check_exits(prices, market_data).await;
        if signals.is_empty() {
            return Vec::new();
        }
        self.execute_exits(&signals, prices).await
    }

    /// Flatten the book and latch the kill switch, even with nothing open.
    pub async fn emergency_close_all(&self, reason: &str) -> Vec<ClosedPosition> {
        error!(reason, "EMERGENCY CLOSE ALL");
        let closed = self.orchestrator.close_all(reason).await;
        self.orchestrator
            .activate_kill_switch(&format!("emergency close: {reason}"));
        let remaining = self.orchestrator.positions().await.len();
        if remaining > 0 {
            error!(remaining, "Positions still open after emergency close");
        }
        closed
    }

    pub async fn get_portfolio_snapshot(&self) -> PortfolioSnapshot {
        let positions = self.orchestrator.positions().await;
        let state = self.orchestrator.state();
        PortfolioSnapshot {
            open_positions: positions.len(),
            total_unrealized_pnl: positions.iter().map(|p| p.unrealized_pnl()).sum(),
            total_notional: positions.iter().map(|p| p.notional()).sum(),
            daily_realized_pnl: state.daily_pnl(),
            kill_switch_active: state.kill_switch_active(),
            timestamp: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::orchestrator::OrchestratorConfig;
    use crate::retry::RetryPolicy;
    use crate::validator::OrderValidator;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tb_core::{Direction, ManualClock, TradeSignal};
    use tb_position::{ExitMonitorConfig, ExitType};
    use tb_risk::{RiskGate, RiskGateConfig, SignalGuard, SignalGuardConfig};
    use tb_state::PersistentStateManager;
    use tempfile::TempDir;

    struct Harness {
        lifecycle: LifecycleManager,
        clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        // Wednesday 2024-07-10 11:00 EDT.
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 10, 15, 0, 0).unwrap(),
        ));
        let state = Arc::new(PersistentStateManager::with_clock(
            dir.path(),
            clock.clone(),
            chrono_tz::America::New_York,
        ));
        let config = OrchestratorConfig {
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            max_consecutive_losses: 0,
            ..Default::default()
        };
        let orch = BotOrchestrator::new(
            config,
            state,
            Arc::new(SignalGuard::with_clock(SignalGuardConfig::default(), clock.clone())),
            RiskGate::new(RiskGateConfig::default()).unwrap(),
            OrderValidator::default(),
            Arc::new(PaperBroker::new()),
        )
        .with_clock(clock.clone());
        let lifecycle = LifecycleManager::new(
            Arc::new(orch),
            ExitMonitor::new(ExitMonitorConfig::default()).unwrap(),
        )
        .with_clock(clock.clone());
        Harness {
            lifecycle,
            clock,
            _dir: dir,
        }
    }

    async fn open(h: &Harness, ticker: &str) {
        let signal = TradeSignal::new(
            ticker,
            Direction::Long,
            "cloud_breakout",
            "15m",
            dec!(50),
            Price::new(dec!(100)),
            Price::new(dec!(95)),
        )
        .with_timestamp(h.clock.now());
        let r = h.lifecycle.orchestrator().process_signal(signal, None).await;
        assert!(r.success, "{}", r.reason);
    }

    fn quotes(pairs: &[(&str, Price)]) -> HashMap<String, Price> {
        pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[tokio::test]
    async fn test_stop_loss_tick_closes_position() {
        let h = harness();
        open(&h, "AAPL").await;

        let prices = quotes(&[("AAPL", Price::new(dec!(94)))]);
        let closed = h.lifecycle.tick(&prices, &HashMap::new()).await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, ExitType::StopLoss.as_str());
        assert!(h.lifecycle.orchestrator().positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_scale_out_then_breakeven() {
        let h = harness();
        open(&h, "AAPL").await;
        let shares = h.lifecycle.orchestrator().position("AAPL").await.unwrap().shares;

        // +1R: the breakeven trail outranks the scale-out and only moves the stop.
        let prices = quotes(&[("AAPL", Price::new(dec!(105)))]);
        let signals = h.lifecycle.check_exits(&prices, &HashMap::new()).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].exit_type, ExitType::TrailToBreakeven);
        assert!(h.lifecycle.execute_exits(&signals, &prices).await.is_empty());

        let pos = h.lifecycle.orchestrator().position("AAPL").await.unwrap();
        assert!(pos.stop_loss > pos.entry_price);
        assert_eq!(pos.shares, shares);

        // Next pass the stop is already at breakeven, so the scale-out fires.
        let signals = h.lifecycle.check_exits(&prices, &HashMap::new()).await;
        assert_eq!(signals[0].exit_type, ExitType::ScaleOut);
        let closed = h.lifecycle.execute_exits(&signals, &prices).await;
        assert_eq!(closed.len(), 1);
        assert!(closed[0].partial);
        let rest = h.lifecycle.orchestrator().position("AAPL").await.unwrap();
        assert_eq!(rest.shares, shares - shares / 2);
        assert!(rest.scaled_out);

        // Second pass: nothing left to do at the same price.
        assert!(h.lifecycle.tick(&prices, &HashMap::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_closing_signals_skipped() {
        let h = harness();
        open(&h, "AAPL").await;
        let signal = ExitSignal {
            ticker: "AAPL".to_string(),
            exit_type: ExitType::TrailToBreakeven,
            priority: ExitType::TrailToBreakeven.priority(),
            reason: "moved".to_string(),
            price: Price::new(dec!(105)),
            partial_qty: None,
        };
        let closed = h.lifecycle.execute_exits(&[signal], &HashMap::new()).await;
        assert!(closed.is_empty());
        assert!(h.lifecycle.orchestrator().position("AAPL").await.is_some());
    }

    #[tokio::test]
    async fn test_portfolio_snapshot() {
        let h = harness();
        open(&h, "AAPL").await;
        open(&h, "MSFT").await;
        let prices = quotes(&[
            ("AAPL", Price::new(dec!(101))),
            ("MSFT", Price::new(dec!(99))),
        ]);
        h.lifecycle.update_prices(&prices).await;

        let snap = h.lifecycle.get_portfolio_snapshot().await;
        assert_eq!(snap.open_positions, 2);
        // 100 shares each: +100 and -100
        assert_eq!(snap.total_unrealized_pnl, Price::ZERO);
        assert_eq!(snap.total_notional, Price::new(dec!(20000)));
        assert!(!snap.kill_switch_active);
    }

    #[tokio::test]
    async fn test_emergency_close_all_latches_kill_switch() {
        let h = harness();
        open(&h, "AAPL").await;
        let closed = h.lifecycle.emergency_close_all("operator").await;
        assert_eq!(closed.len(), 1);
        let snap = h.lifecycle.get_portfolio_snapshot().await;
        assert_eq!(snap.open_positions, 0);
        assert!(snap.kill_switch_active);
    }
}
