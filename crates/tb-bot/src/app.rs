//! Main application loop.
//!
//! Each poll cycle:
//! 1. Read new signals from the signal log
//! 2. Run each through the execution pipeline (paper mode)
//! 3. Refresh prices and run the exit lifecycle
//!
//! Reconciliation and metrics dumps run on their own intervals. On shutdown
//! the book is flattened and the kill switch latched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use tb_core::{AccountState, SystemClock};
use tb_executor::{BotOrchestrator, ClosedPosition, LifecycleManager, OrderValidator, PaperBroker};
use tb_position::{ExitMonitor, MarketContext, PositionReconciler};
use tb_risk::{RiskGate, SignalGuard};
use tb_state::PersistentStateManager;
use tb_telemetry::Metrics;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::sources::{read_account, read_market, read_prices, SignalSource};

/// Cooperative stop flag checked between loop iterations.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome counts of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub signals_read: usize,
    pub executed: usize,
    pub rejected: usize,
    pub exits: usize,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    orchestrator: Arc<BotOrchestrator>,
    lifecycle: LifecycleManager,
    broker: Arc<PaperBroker>,
    signals: SignalSource,
    shutdown: ShutdownHandle,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let state = Arc::new(PersistentStateManager::with_clock(
            &config.state.dir,
            Arc::new(SystemClock),
            config.day_timezone()?,
        ));
        if state.kill_switch_active() {
            warn!(
                reason = ?state.kill_switch_reason(),
                "Starting with kill switch active; no entries until it is cleared"
            );
        }

        let broker = Arc::new(PaperBroker::new());
        let orchestrator = Arc::new(
            BotOrchestrator::new(
                config.orchestrator.clone(),
                state,
                Arc::new(SignalGuard::new(config.signal_guard.clone())),
                RiskGate::new(config.risk.clone())?,
                OrderValidator::new(config.validator.clone()),
                broker.clone(),
            )
            .with_reconciler(PositionReconciler::new(config.reconciler.clone())),
        );
        let lifecycle = LifecycleManager::new(
            orchestrator.clone(),
            ExitMonitor::new(config.exits.clone())?,
        );
        let signals = SignalSource::new(&config.sources.signal_file);

        Ok(Self {
            config,
            orchestrator,
            lifecycle,
            broker,
            signals,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn orchestrator(&self) -> &Arc<BotOrchestrator> {
        &self.orchestrator
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run until ctrl-c or the shutdown handle fires, then drain.
    pub async fn run(mut self) -> AppResult<()> {
        info!(mode = ?self.config.mode, "Starting application");
        self.signals.skip_existing()?;
        info!(
            signal_file = %self.config.sources.signal_file.display(),
            offset = self.signals.offset(),
            "Tailing signal log"
        );

        let mut poll = tokio::time::interval(Duration::from_millis(
            self.config.sources.poll_interval_ms,
        ));
        let reconcile_enabled = self.config.telemetry.reconcile_interval_secs > 0;
        let mut reconcile = tokio::time::interval(Duration::from_secs(
            self.config.telemetry.reconcile_interval_secs.max(1),
        ));
        let mut stats = tokio::time::interval(Duration::from_secs(
            self.config.telemetry.stats_interval_secs,
        ));

        info!("Entering main event loop");
        loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown flag set");
                break;
            }

            tokio::select! {
                _ = poll.tick() => {
                    match self.run_once().await {
                        Ok(report) if report != CycleReport::default() => {
                            debug!(?report, "Cycle complete");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(?e, "Cycle failed"),
                    }
                }

                _ = reconcile.tick(), if reconcile_enabled => {
                    self.reconcile().await;
                }

                _ = stats.tick() => {
                    self.report_stats().await;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let closed = self.drain("shutdown").await;
        info!(closed = closed.len(), "Shutting down");
        self.report_stats().await;
        Ok(())
    }

    /// One poll cycle: signals, then prices and exits.
    pub async fn run_once(&mut self) -> AppResult<CycleReport> {
        let mut report = CycleReport::default();

        let signals = self.signals.poll().unwrap_or_else(|e| {
            warn!(?e, "Signal intake failed; continuing with exits");
            Vec::new()
        });
        report.signals_read = signals.len();
        if !signals.is_empty() {
            let account = self.read_account();
            for signal in signals {
                if self.config.is_observation_mode() {
                    info!(
                        ticker = %signal.ticker,
                        direction = %signal.direction,
                        signal_type = %signal.signal_type,
                        conviction = %signal.conviction,
                        "Signal observed"
                    );
                    continue;
                }
                let result = self
                    .orchestrator
                    .process_signal(signal, account.as_ref())
                    .await;
                if result.success {
                    report.executed += 1;
                } else {
                    report.rejected += 1;
                }
            }
        }

        let prices = read_prices(&self.config.sources.price_file)?;
        if !prices.is_empty() {
            let market = self.read_market();
            report.exits = self.lifecycle.tick(&prices, &market).await.len();
        }
        Ok(report)
    }

    /// Compare the book against the broker's positions.
    pub async fn reconcile(&self) {
        match self
            .orchestrator
            .reconcile_with_feed(self.broker.as_ref())
            .await
        {
            Ok(report) if report.is_clean() => {
                debug!(matched = report.matched.len(), "Reconciliation clean");
            }
            Ok(report) => {
                for m in report.mismatches() {
                    warn!(
                        ticker = %m.ticker,
                        kind = %m.kind,
                        severity = ?m.severity,
                        detail = %m.detail,
                        "Position mismatch"
                    );
                }
            }
            Err(e) => error!(?e, "Reconciliation failed"),
        }
    }

    /// Flatten everything and latch the kill switch.
    pub async fn drain(&self, reason: &str) -> Vec<ClosedPosition> {
        self.lifecycle.emergency_close_all(reason).await
    }

    async fn report_stats(&self) {
        let snapshot = self.lifecycle.get_portfolio_snapshot().await;
        info!(
            open_positions = snapshot.open_positions,
            unrealized_pnl = %snapshot.total_unrealized_pnl,
            notional = %snapshot.total_notional,
            daily_realized_pnl = %snapshot.daily_realized_pnl,
            kill_switch = snapshot.kill_switch_active,
            "Portfolio snapshot"
        );
        if let Some(path) = &self.config.telemetry.metrics_file {
            match Metrics::encode() {
                Ok(text) => {
                    if let Err(e) = std::fs::write(path, text) {
                        warn!(?e, path = %path.display(), "Failed to write metrics");
                    }
                }
                Err(e) => warn!(?e, "Failed to encode metrics"),
            }
        }
    }

    fn read_account(&self) -> Option<AccountState> {
        let path = self.config.sources.account_file.as_ref()?;
        match read_account(path) {
            Ok(account) => account,
            Err(e) => {
                warn!(?e, path = %path.display(), "Unreadable account snapshot; using fallback checks");
                None
            }
        }
    }

    fn read_market(&self) -> HashMap<String, MarketContext> {
        let Some(path) = &self.config.sources.market_file else {
            return HashMap::new();
        };
        read_market(path).unwrap_or_else(|e| {
            warn!(?e, path = %path.display(), "Unreadable market data; skipping bar checks");
            HashMap::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingMode;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.state.dir = dir.path().join("state");
        config.sources.signal_file = dir.path().join("signals.jsonl");
        config.sources.price_file = dir.path().join("prices.json");
        config.orchestrator.retry.base_delay_ms = 1;
        config
    }

    fn signal_line(ticker: &str) -> String {
        format!(
            r#"{{"ticker":"{ticker}","direction":"long","signal_type":"breakout","timeframe":"1d","conviction":"50","entry_price":"100","stop_loss":"95"}}"#
        )
    }

    #[tokio::test]
    async fn test_cycle_executes_then_exits() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(
            &cfg.sources.signal_file,
            format!("{}\n{}\n", signal_line("AAPL"), signal_line("MSFT")),
        )
        .unwrap();
        let mut app = Application::new(cfg.clone()).unwrap();

        let report = app.run_once().await.unwrap();
        assert_eq!(report.signals_read, 2);
        assert_eq!(report.executed, 2);
        assert_eq!(app.orchestrator().positions().await.len(), 2);

        std::fs::write(&cfg.sources.price_file, r#"{"AAPL": "94", "MSFT": "101"}"#).unwrap();
        let report = app.run_once().await.unwrap();
        assert_eq!(report.signals_read, 0);
        assert_eq!(report.exits, 1);
        assert!(app.orchestrator().position("AAPL").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_signal_bytes_do_not_stop_exits() {
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(&cfg.sources.signal_file, format!("{}\n", signal_line("AAPL"))).unwrap();
        let mut app = Application::new(cfg.clone()).unwrap();
        assert_eq!(app.run_once().await.unwrap().executed, 1);

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&cfg.sources.signal_file)
            .unwrap();
        f.write_all(b"\xff\xfe garbage\n").unwrap();
        drop(f);
        std::fs::write(&cfg.sources.price_file, r#"{"AAPL": "90"}"#).unwrap();

        let report = app.run_once().await.unwrap();
        assert_eq!(report.signals_read, 0);
        assert_eq!(report.exits, 1);
        assert!(app.orchestrator().position("AAPL").await.is_none());

        std::fs::OpenOptions::new()
            .append(true)
            .open(&cfg.sources.signal_file)
            .unwrap()
            .write_all(format!("{}\n", signal_line("MSFT")).as_bytes())
            .unwrap();
        assert_eq!(app.run_once().await.unwrap().executed, 1);
    }

    #[tokio::test]
    async fn test_observation_mode_executes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.mode = OperatingMode::Observation;
        std::fs::write(&cfg.sources.signal_file, format!("{}\n", signal_line("AAPL"))).unwrap();
        let mut app = Application::new(cfg).unwrap();

        let report = app.run_once().await.unwrap();
        assert_eq!(report.signals_read, 1);
        assert_eq!(report.executed, 0);
        assert!(app.orchestrator().positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_flattens_and_latches() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        std::fs::write(&cfg.sources.signal_file, format!("{}\n", signal_line("AAPL"))).unwrap();
        let mut app = Application::new(cfg.clone()).unwrap();
        app.run_once().await.unwrap();

        let closed = app.drain("test").await;
        assert_eq!(closed.len(), 1);
        assert!(app.orchestrator().state().kill_switch_active());
        app.reconcile().await;

        // Restart over the same state directory stays halted.
        let restarted = Application::new(cfg).unwrap();
        assert!(restarted.orchestrator().state().kill_switch_active());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_flag() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.sources.poll_interval_ms = 10;
        let app = Application::new(cfg).unwrap();
        let handle = app.shutdown_handle();
        let orchestrator = app.orchestrator().clone();

        let task = tokio::spawn(app.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(orchestrator.state().kill_switch_active());
    }
}
