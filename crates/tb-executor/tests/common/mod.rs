//! Shared fixtures for executor integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use tb_core::{AccountState, Clock, Direction, ManualClock, OrderResult, Position, Price, TradeSignal};
use tb_executor::{
    AlertLevel, AlertSink, BotOrchestrator, ClosedPosition, ExecutorResult, Hooks, Journal,
    LifecycleManager, OrchestratorConfig, OrderValidator, PaperBroker, RetryPolicy,
};
use tb_position::{ExitMonitor, ExitMonitorConfig};
use tb_risk::{RiskGate, RiskGateConfig, SignalGuard, SignalGuardConfig};
use tb_state::PersistentStateManager;

/// Wednesday 2024-07-10 11:00 EDT.
pub fn in_session() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 15, 0, 0).unwrap()
}

#[derive(Default)]
pub struct RecordingJournal {
    pub entries: Mutex<Vec<String>>,
    pub exits: Mutex<Vec<(String, Price)>>,
}

impl Journal for RecordingJournal {
    fn record_entry(&self, position: &Position, _order: &OrderResult) -> ExecutorResult<()> {
        self.entries.lock().push(position.ticker.clone());
        Ok(())
    }

    fn record_exit(&self, closed: &ClosedPosition) -> ExecutorResult<()> {
        self.exits
            .lock()
            .push((closed.position.ticker.clone(), closed.realized_pnl));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    pub messages: Mutex<Vec<(AlertLevel, String)>>,
}

impl RecordingAlerts {
    pub fn at(&self, wanted: AlertLevel) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(level, _)| *level == wanted)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn critical(&self) -> Vec<String> {
        self.at(AlertLevel::Critical)
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, level: AlertLevel, message: &str) -> ExecutorResult<()> {
        self.messages.lock().push((level, message.to_string()));
        Ok(())
    }
}

pub struct Fixture {
    pub orchestrator: Arc<BotOrchestrator>,
    pub lifecycle: LifecycleManager,
    pub broker: Arc<PaperBroker>,
    pub clock: Arc<ManualClock>,
    pub journal: Arc<RecordingJournal>,
    pub alerts: Arc<RecordingAlerts>,
    pub dir: TempDir,
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
        ..Default::default()
    }
}

pub fn fixture(config: OrchestratorConfig) -> Fixture {
    fixture_in(TempDir::new().unwrap(), config)
}

/// Build a fixture over an existing state directory.
pub fn fixture_in(dir: TempDir, config: OrchestratorConfig) -> Fixture {
    let clock = Arc::new(ManualClock::new(in_session()));
    let state = Arc::new(PersistentStateManager::with_clock(
        dir.path(),
        clock.clone(),
        chrono_tz::America::New_York,
    ));
    let guard = Arc::new(SignalGuard::with_clock(
        SignalGuardConfig::default(),
        clock.clone(),
    ));
    let broker = Arc::new(PaperBroker::new().with_clock(clock.clone()));
    let journal = Arc::new(RecordingJournal::default());
    let alerts = Arc::new(RecordingAlerts::default());
    let hooks = Hooks::default()
        .with_journal(journal.clone())
        .with_alerts(alerts.clone());

    let orchestrator = Arc::new(
        BotOrchestrator::new(
            config,
            state,
            guard,
            RiskGate::new(RiskGateConfig::default()).unwrap(),
            OrderValidator::default(),
            broker.clone(),
        )
        .with_hooks(hooks)
        .with_clock(clock.clone()),
    );
    let lifecycle = LifecycleManager::new(
        orchestrator.clone(),
        ExitMonitor::new(ExitMonitorConfig::default()).unwrap(),
    )
    .with_clock(clock.clone());

    Fixture {
        orchestrator,
        lifecycle,
        broker,
        clock,
        journal,
        alerts,
        dir,
    }
}

pub fn long_signal(
    clock: &ManualClock,
    ticker: &str,
    conviction: Decimal,
    entry: Decimal,
    stop: Decimal,
) -> TradeSignal {
    TradeSignal::new(
        ticker,
        Direction::Long,
        "cloud_breakout",
        "15m",
        conviction,
        Price::new(entry),
        Price::new(stop),
    )
    .with_timestamp(clock.now())
}

pub fn aapl(clock: &ManualClock) -> TradeSignal {
    long_signal(clock, "AAPL", dec!(82), dec!(185), dec!(180))
}

pub fn account() -> AccountState {
    AccountState::with_equity(Price::new(dec!(100000)))
}
