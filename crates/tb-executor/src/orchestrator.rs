//! Signal pipeline orchestrator.
//!
//! # Pipeline Order
//!
//! Stages are evaluated in a fixed order; the first failing stage ends the
//! pipeline and is reported in [`PipelineResult::pipeline_stage`]:
//!
//! 1. `kill_switch`        - persistent kill switch or open circuit breaker
//! 2. `signal_guard`       - signal validity, freshness, dedup
//! 3. `regime_adaptation`  - optional hook, non-fatal
//! 4. `signal_recording`   - optional hook, non-fatal
//! 5. `risk_assessment`    - risk gate with an account, else position-count fallback
//! 6. `instrument_routing` - optional hook, falls back to stock
//! 7. `sizing`             - risk-based share count
//! 8. `order_submission`   - limit order with retry
//! 9. `fill_validation`    - the fill must be trusted before a position exists
//! 10. `position_creation` - book insert or add-to-existing
//! 11. `completed`         - after non-fatal journal/alert/analytics hooks
//!
//! Stages 1-2 run before the book lock is taken. Everything from stage 3 on
//! runs under one async mutex that also guards every close, so the book,
//! the execution history and the P&L bookkeeping change as one step per
//! call. Order submission, including retry sleeps, happens under that lock:
//! trade throughput is serialized behind broker latency, and no risk
//! decision can be invalidated between approval and commit.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use tb_core::{AccountState, Clock, Order, OrderResult, Position, Price, SystemClock, TradeSignal};
use tb_position::{BrokerPosition, PositionReconciler, ReconciliationReport};
use tb_risk::{RiskGate, SignalGuard};
use tb_state::{CircuitBreakerStatus, PersistentStateManager};
use tb_telemetry::Metrics;

use crate::broker::{BrokerPositionFeed, OrderSubmitter};
use crate::error::{ExecutorError, ExecutorResult};
use crate::history::{ClosedPosition, ExecutionHistory, ExecutionRecord};
use crate::hooks::{AlertLevel, Hooks, InstrumentRoute};
use crate::retry::{submit_with_retry, RetryPolicy};
use crate::sizing::{PositionSizer, SizingConfig};
use crate::validator::{FillValidation, OrderValidator};

// ============================================================================
// PipelineStage / PipelineResult
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    KillSwitch,
    SignalGuard,
    RegimeAdaptation,
    SignalRecording,
    RiskAssessment,
    InstrumentRouting,
    Sizing,
    OrderSubmission,
    FillValidation,
    PositionCreation,
    Completed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KillSwitch => "kill_switch",
            Self::SignalGuard => "signal_guard",
            Self::RegimeAdaptation => "regime_adaptation",
            Self::SignalRecording => "signal_recording",
            Self::RiskAssessment => "risk_assessment",
            Self::InstrumentRouting => "instrument_routing",
            Self::Sizing => "sizing",
            Self::OrderSubmission => "order_submission",
            Self::FillValidation => "fill_validation",
            Self::PositionCreation => "position_creation",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one `process_signal` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub pipeline_stage: PipelineStage,
    pub reason: String,
    pub position: Option<Position>,
    pub order_result: Option<OrderResult>,
    pub fill_validation: Option<FillValidation>,
}

impl PipelineResult {
    fn rejected(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            pipeline_stage: stage,
            reason: reason.into(),
            position: None,
            order_result: None,
            fill_validation: None,
        }
    }

    #[must_use]
    fn with_order(mut self, order: OrderResult) -> Self {
        self.order_result = Some(order);
        self
    }

    #[must_use]
    fn with_fill(mut self, fill: FillValidation) -> Self {
        self.fill_validation = Some(fill);
        self
    }
}

// ============================================================================
// OrchestratorConfig
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Use the risk gate when an account snapshot is supplied.
    #[serde(default = "default_true")]
    pub risk_gate_enabled: bool,
    /// Position cap for the fallback check without a risk gate.
    #[serde(default = "default_fallback_max_positions")]
    pub fallback_max_positions: usize,
    /// Send a market order to the broker on every close.
    #[serde(default = "default_true")]
    pub submit_exit_orders: bool,
    /// Equity used for sizing and loss limits when no account was supplied.
    #[serde(default = "default_equity")]
    pub default_equity: Price,
    /// Losing streak that trips the kill switch and opens the circuit
    /// breaker. Zero disables.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub sizing: SizingConfig,
}

fn default_true() -> bool {
    true
}

fn default_fallback_max_positions() -> usize {
    5
}

fn default_equity() -> Price {
    Price::from(100_000u32)
}

fn default_max_consecutive_losses() -> usize {
    3
}

fn default_history_capacity() -> usize {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            risk_gate_enabled: true,
            fallback_max_positions: default_fallback_max_positions(),
            submit_exit_orders: true,
            default_equity: default_equity(),
            max_consecutive_losses: default_max_consecutive_losses(),
            history_capacity: default_history_capacity(),
            retry: RetryPolicy::default(),
            sizing: SizingConfig::default(),
        }
    }
}

// ============================================================================
// BotOrchestrator
// ============================================================================

/// State guarded by the orchestrator lock.
struct Book {
    positions: BTreeMap<String, Position>,
    history: ExecutionHistory,
    last_account: Option<AccountState>,
}

/// Composes guard, risk gate, sizing, submission and validation into one
/// serialized pipeline, and owns the position book.
pub struct BotOrchestrator {
    config: OrchestratorConfig,
    state: Arc<PersistentStateManager>,
    signal_guard: Arc<SignalGuard>,
    risk_gate: RiskGate,
    validator: OrderValidator,
    sizer: PositionSizer,
    reconciler: PositionReconciler,
    broker: Arc<dyn OrderSubmitter>,
    hooks: Hooks,
    clock: Arc<dyn Clock>,
    book: Mutex<Book>,
}

impl BotOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        state: Arc<PersistentStateManager>,
        signal_guard: Arc<SignalGuard>,
        risk_gate: RiskGate,
        validator: OrderValidator,
        broker: Arc<dyn OrderSubmitter>,
    ) -> Self {
        let book = Book {
            positions: BTreeMap::new(),
            history: ExecutionHistory::new(config.history_capacity),
            last_account: None,
        };
        Metrics::kill_switch(state.kill_switch_active());
        Self {
            sizer: PositionSizer::new(config.sizing.clone()),
            config,
            state,
            signal_guard,
            risk_gate,
            validator,
            reconciler: PositionReconciler::default(),
            broker,
            hooks: Hooks::default(),
            clock: Arc::new(SystemClock),
            book: Mutex::new(book),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.validator = self.validator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_reconciler(mut self, reconciler: PositionReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<PersistentStateManager> {
        &self.state
    }

    pub fn signal_guard(&self) -> &Arc<SignalGuard> {
        &self.signal_guard
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ------------------------------------------------------------------
    // Entry pipeline
    // ------------------------------------------------------------------

    /// Run one signal through the pipeline.
    pub async fn process_signal(
        &self,
        signal: TradeSignal,
        account: Option<&AccountState>,
    ) -> PipelineResult {
        Metrics::signal_received();
        let result = self.run_pipeline(signal, account).await;
        Metrics::pipeline_outcome(result.pipeline_stage.as_str(), result.success);
        if result.success {
            info!(
                stage = %result.pipeline_stage,
                position = ?result.position.as_ref().map(|p| (&p.ticker, p.shares, p.entry_price)),
                "Signal executed"
            );
        } else {
            info!(
                stage = %result.pipeline_stage,
                reason = %result.reason,
                "Signal rejected"
            );
        }
        result
    }

    async fn run_pipeline(
        &self,
        mut signal: TradeSignal,
        account: Option<&AccountState>,
    ) -> PipelineResult {
        // 1. kill_switch
        if let Some(reason) = self.trading_block_reason() {
            return PipelineResult::rejected(PipelineStage::KillSwitch, reason);
        }

        // 2. signal_guard
        if let Err(e) = signal.validate() {
            return PipelineResult::rejected(PipelineStage::SignalGuard, e.to_string());
        }
        if let Some(reason) = self.signal_guard.check(&signal) {
            return PipelineResult::rejected(PipelineStage::SignalGuard, reason);
        }

        let mut book = self.book.lock().await;

        // The kill switch may have tripped while waiting for the lock.
        if let Some(reason) = self.trading_block_reason() {
            return PipelineResult::rejected(PipelineStage::KillSwitch, reason);
        }

        // 3. regime_adaptation
        if let Some(regime) = &self.hooks.regime {
            match regime.adapt(&signal) {
                Ok(Some(adapted)) => {
                    debug!(ticker = %signal.ticker, "Signal adapted to regime");
                    signal = adapted;
                }
                Ok(None) => {}
                Err(e) => hook_failed(PipelineStage::RegimeAdaptation.as_str(), &e),
            }
        }

        // 4. signal_recording
        if let Some(recorder) = &self.hooks.recorder {
            if let Err(e) = recorder.record(&signal) {
                hook_failed(PipelineStage::SignalRecording.as_str(), &e);
            }
        }
        self.state.record_signal_time();

        // 5. risk_assessment
        let key = signal.ticker.to_ascii_uppercase();
        let add_to_existing = match account {
            Some(account) if self.config.risk_gate_enabled => {
                let mut snapshot = account.clone();
                snapshot.open_positions = book.positions.values().cloned().collect();
                snapshot.daily_pnl = self.state.daily_pnl();
                book.last_account = Some(account.clone());

                let decision = self
                    .risk_gate
                    .evaluate_at(&signal, &snapshot, self.clock.now());
                if !decision.approved {
                    return PipelineResult::rejected(PipelineStage::RiskAssessment, decision.reason);
                }
                decision.add_to_existing
            }
            _ => {
                if let Some(account) = account {
                    book.last_account = Some(account.clone());
                }
                if book.positions.len() >= self.config.fallback_max_positions {
                    return PipelineResult::rejected(
                        PipelineStage::RiskAssessment,
                        format!(
                            "max open positions reached: {} >= {}",
                            book.positions.len(),
                            self.config.fallback_max_positions
                        ),
                    );
                }
                if book.positions.contains_key(&key) {
                    return PipelineResult::rejected(
                        PipelineStage::RiskAssessment,
                        format!("position already open in {key}"),
                    );
                }
                false
            }
        };

        // 6. instrument_routing
        let route = match &self.hooks.router {
            Some(router) => router.route(&signal).unwrap_or_else(|e| {
                hook_failed(PipelineStage::InstrumentRouting.as_str(), &e);
                InstrumentRoute::default()
            }),
            None => InstrumentRoute::default(),
        };

        // 7. sizing
        let equity = account
            .map(|a| a.equity)
            .unwrap_or(self.config.default_equity);
        let shares = self.sizer.size(&signal, equity, route.instrument_type);
        if shares == 0 {
            return PipelineResult::rejected(
                PipelineStage::Sizing,
                format!(
                    "position size is zero for equity {equity} at entry {}",
                    signal.entry_price
                ),
            );
        }

        // 8. order_submission
        let order = Order::limit(
            key.clone(),
            signal.direction.entry_side(),
            shares,
            signal.entry_price,
            signal.signal_id.clone(),
        );
        let order_result =
            submit_with_retry(self.broker.as_ref(), &order, &self.config.retry).await;
        Metrics::order_submitted("entry", order_result.status.as_str());
        if order_result.is_rejected() {
            let reason = order_result
                .reason
                .clone()
                .unwrap_or_else(|| "order rejected".to_string());
            return PipelineResult::rejected(PipelineStage::OrderSubmission, reason)
                .with_order(order_result);
        }

        // 9. fill_validation
        let fill = self
            .validator
            .validate_fill(&order_result, shares, signal.entry_price);
        if !fill.is_valid {
            if order_result.filled_qty > 0 {
                error!(
                    ticker = %key,
                    filled_qty = order_result.filled_qty,
                    reason = %fill.reason,
                    "Broker reported a fill that was not trusted; reconcile before trading"
                );
            }
            return PipelineResult::rejected(PipelineStage::FillValidation, fill.reason.clone())
                .with_order(order_result)
                .with_fill(fill);
        }

        // 10. position_creation
        let now = self.clock.now();
        let position = match book.positions.get_mut(&key) {
            Some(existing) if add_to_existing && existing.direction == signal.direction => {
                existing.add_shares(fill.adjusted_qty, fill.fill_price);
                existing.clone()
            }
            _ => match Position::from_fill(
                &signal,
                fill.adjusted_qty,
                fill.fill_price,
                route.instrument_type,
                route.leverage,
                now,
            ) {
                Ok(p) => {
                    book.positions.insert(key.clone(), p.clone());
                    p
                }
                Err(e) => {
                    return PipelineResult::rejected(PipelineStage::PositionCreation, e.to_string())
                        .with_order(order_result)
                        .with_fill(fill);
                }
            },
        };
        book.history.push(ExecutionRecord::entry(
            &position,
            fill.adjusted_qty,
            fill.fill_price,
            &order_result,
        ));
        self.state.record_trade_time();
        Metrics::positions_open(book.positions.len());

        // 11. side effects
        if let Some(journal) = &self.hooks.journal {
            if let Err(e) = journal.record_entry(&position, &order_result) {
                hook_failed("journal", &e);
            }
        }
        self.alert(
            AlertLevel::Info,
            &format!(
                "opened {} {} x{} @ {}",
                position.direction, position.ticker, fill.adjusted_qty, fill.fill_price
            ),
        );
        if let Some(analytics) = &self.hooks.analytics {
            if let Err(e) = analytics.on_entry(&position) {
                hook_failed("analytics", &e);
            }
        }
        if let Some(feedback) = &self.hooks.feedback {
            if let Err(e) = feedback.on_position_opened(&signal, &position) {
                hook_failed("feedback", &e);
            }
        }

        PipelineResult {
            success: true,
            pipeline_stage: PipelineStage::Completed,
            reason: fill.reason.clone(),
            position: Some(position),
            order_result: Some(order_result),
            fill_validation: Some(fill),
        }
    }

    /// Reason new entries are blocked, if any.
    fn trading_block_reason(&self) -> Option<String> {
        let snap = self.state.get_snapshot();
        if snap.kill_switch_active {
            return Some(format!(
                "kill switch active: {}",
                snap.kill_switch_reason.as_deref().unwrap_or("no reason recorded")
            ));
        }
        if snap.circuit_breaker_status == CircuitBreakerStatus::Open {
            return Some(format!(
                "circuit breaker open: {}",
                snap.circuit_breaker_reason
                    .as_deref()
                    .unwrap_or("no reason recorded")
            ));
        }
        None
    }

    // ------------------------------------------------------------------
    // Exits
    // ------------------------------------------------------------------

    /// Close `partial_qty` units of `ticker`, or the whole position.
    ///
    /// `partial_qty` at or above the position size is a full close; `Some(0)`
    /// is refused. Returns `None` when there is no such position or the exit
    /// order was rejected, in which case the book is unchanged.
    pub async fn close_position(
        &self,
        ticker: &str,
        reason: &str,
        exit_price: Option<Price>,
        partial_qty: Option<u32>,
    ) -> Option<ClosedPosition> {
        let mut book = self.book.lock().await;
        self.close_locked(&mut book, ticker, reason, exit_price, partial_qty)
            .await
    }

    /// Close every open position. Positions whose exit order is rejected
    /// stay in the book.
    pub async fn close_all(&self, reason: &str) -> Vec<ClosedPosition> {
        let mut book = self.book.lock().await;
        let tickers: Vec<String> = book.positions.keys().cloned().collect();
        let mut closed = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            if let Some(c) = self
                .close_locked(&mut book, &ticker, reason, None, None)
                .await
            {
                closed.push(c);
            }
        }
        closed
    }

    async fn close_locked(
        &self,
        book: &mut Book,
        ticker: &str,
        reason: &str,
        exit_price: Option<Price>,
        partial_qty: Option<u32>,
    ) -> Option<ClosedPosition> {
        let key = ticker.to_ascii_uppercase();
        let Some(pos) = book.positions.get(&key) else {
            warn!(ticker = %key, reason, "Close requested for unknown position");
            return None;
        };
        let requested = match partial_qty {
            Some(0) => {
                warn!(ticker = %key, "Refusing zero-quantity close");
                return None;
            }
            Some(q) if q < pos.shares => q,
            _ => pos.shares,
        };
        let price = exit_price.unwrap_or(pos.current_price);
        let exit_side = pos.direction.exit_side();
        let signal_id = pos.signal_id.clone();

        let (fill_price, qty, order_result) = if self.config.submit_exit_orders {
            let order = Order::market(key.clone(), exit_side, requested, Some(price), signal_id);
            let result = submit_with_retry(self.broker.as_ref(), &order, &self.config.retry).await;
            Metrics::order_submitted("exit", result.status.as_str());
            if result.is_rejected() || result.filled_qty == 0 {
                error!(
                    ticker = %key,
                    status = %result.status,
                    reason = ?result.reason,
                    "Exit order not filled; position left in book"
                );
                self.alert(
                    AlertLevel::Critical,
                    &format!("exit order for {key} failed: {:?}", result.reason),
                );
                return None;
            }
            let qty = result.filled_qty.min(requested);
            let fill_price = if result.filled_price.is_positive() {
                result.filled_price
            } else {
                price
            };
            (fill_price, qty, Some(result))
        } else {
            (price, requested, None)
        };

        let full = book.positions.get(&key).map(|p| qty >= p.shares)?;
        let (mut closed_pos, partial) = if full {
            (book.positions.remove(&key)?, false)
        } else {
            let pos = book.positions.get_mut(&key)?;
            let closed = match pos.split_off(qty) {
                Ok(c) => c,
                Err(e) => {
                    error!(ticker = %key, error = %e, "Partial close failed");
                    return None;
                }
            };
            pos.scaled_out = true;
            pos.current_price = fill_price;
            (closed, true)
        };
        closed_pos.current_price = fill_price;
        let realized_pnl = closed_pos.pnl_at(fill_price, closed_pos.shares);

        let closed = ClosedPosition {
            position: closed_pos,
            exit_price: fill_price,
            realized_pnl,
            reason: reason.to_string(),
            exit_time: self.clock.now(),
            partial,
            order_result,
        };
        book.history.push(ExecutionRecord::exit(&closed));
        self.state.record_trade_pnl(realized_pnl);
        self.state.record_trade_time();
        info!(
            ticker = %key,
            qty = closed.position.shares,
            exit_price = %fill_price,
            pnl = %realized_pnl,
            partial,
            reason,
            "Position closed"
        );

        self.evaluate_auto_kill(book);

        if let Some(journal) = &self.hooks.journal {
            if let Err(e) = journal.record_exit(&closed) {
                hook_failed("journal", &e);
            }
        }
        if let Some(analytics) = &self.hooks.analytics {
            if let Err(e) = analytics.on_exit(&closed) {
                hook_failed("analytics", &e);
            }
        }
        if let Some(feedback) = &self.hooks.feedback {
            if let Err(e) = feedback.on_trade_closed(&closed) {
                hook_failed("feedback", &e);
            }
        }

        Metrics::positions_open(book.positions.len());
        Metrics::daily_pnl(self.state.daily_pnl().inner().to_f64().unwrap_or(0.0));
        Some(closed)
    }

    /// Trip the kill switch on daily loss or a losing streak.
    fn evaluate_auto_kill(&self, book: &Book) {
        if self.state.kill_switch_active() {
            return;
        }

        let daily = self.state.daily_pnl();
        let base = book
            .last_account
            .as_ref()
            .map(|a| {
                if a.starting_equity.is_positive() {
                    a.starting_equity
                } else {
                    a.equity
                }
            })
            .filter(Price::is_positive)
            .unwrap_or(self.config.default_equity);
        if daily.inner().is_sign_negative() && !daily.is_zero() && base.is_positive() {
            let frac = daily.abs().inner() / base.inner();
            let limit = self.risk_gate.config().daily_loss_limit_pct;
            if frac >= limit {
                self.trip_kill_switch(&format!(
                    "daily loss limit breached: {daily} is {frac:.4} of {base} (limit {limit})"
                ));
                return;
            }
        }

        let streak = self.state.consecutive_losses();
        if self.config.max_consecutive_losses > 0 && streak >= self.config.max_consecutive_losses
        {
            let reason = format!("{streak} consecutive losing trades");
            self.state
                .set_circuit_breaker(CircuitBreakerStatus::Open, Some(&reason));
            self.trip_kill_switch(&reason);
        }
    }

    fn trip_kill_switch(&self, reason: &str) {
        self.state.activate_kill_switch(reason);
        Metrics::kill_switch(true);
        self.alert(AlertLevel::Critical, &format!("kill switch activated: {reason}"));
    }

    /// Activate the kill switch directly.
    pub fn activate_kill_switch(&self, reason: &str) {
        self.trip_kill_switch(reason);
    }

    /// Operator reset: clear the kill switch and close the circuit breaker.
    pub fn resume_trading(&self) {
        self.state.deactivate_kill_switch();
        self.state
            .set_circuit_breaker(CircuitBreakerStatus::Closed, None);
        Metrics::kill_switch(false);
        info!("Trading resumed by operator");
    }

    fn alert(&self, level: AlertLevel, message: &str) {
        if let Some(alerts) = &self.hooks.alerts {
            if let Err(e) = alerts.alert(level, message) {
                hook_failed("alerts", &e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Book access
    // ------------------------------------------------------------------

    /// Refresh `current_price` on matching positions. Returns the count updated.
    pub async fn update_prices(&self, prices: &HashMap<String, Price>) -> usize {
        let mut book = self.book.lock().await;
        let mut updated = 0;
        for (ticker, price) in prices {
            if !price.is_positive() {
                continue;
            }
            if let Some(pos) = book.positions.get_mut(&ticker.to_ascii_uppercase()) {
                pos.current_price = *price;
                updated += 1;
            }
        }
        updated
    }

    /// Run `f` over every open position under the book lock.
    pub(crate) async fn evaluate_positions<T, F>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(&mut Position) -> Option<T>,
    {
        let mut book = self.book.lock().await;
        book.positions.values_mut().filter_map(|p| f(p)).collect()
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.book.lock().await.positions.values().cloned().collect()
    }

    pub async fn position(&self, ticker: &str) -> Option<Position> {
        self.book
            .lock()
            .await
            .positions
            .get(&ticker.to_ascii_uppercase())
            .cloned()
    }

    /// Execution history, oldest first.
    pub async fn execution_history(&self) -> Vec<ExecutionRecord> {
        self.book.lock().await.history.to_vec()
    }

    pub async fn last_account(&self) -> Option<AccountState> {
        self.book.lock().await.last_account.clone()
    }

    /// Compare the book against a broker snapshot.
    pub async fn reconcile(&self, broker_positions: &[BrokerPosition]) -> ReconciliationReport {
        let local = self.positions().await;
        let report = self.reconciler.reconcile(&local, broker_positions);
        Metrics::reconciliation("ghost", report.ghosts.len());
        Metrics::reconciliation("orphaned", report.orphaned.len());
        Metrics::reconciliation("mismatched", report.mismatched.len());
        if !report.ghosts.is_empty() {
            self.alert(
                AlertLevel::Critical,
                &format!("{} ghost position(s) found", report.ghosts.len()),
            );
        }
        let drift = report.orphaned.len() + report.mismatched.len();
        if drift > 0 {
            self.alert(
                AlertLevel::Warning,
                &format!("{drift} broker position(s) disagree with the book"),
            );
        }
        report
    }

    /// Fetch the broker's positions and reconcile.
    pub async fn reconcile_with_feed(
        &self,
        feed: &dyn BrokerPositionFeed,
    ) -> ExecutorResult<ReconciliationReport> {
        let broker_positions = feed.broker_positions().await?;
        Ok(self.reconcile(&broker_positions).await)
    }
}

fn hook_failed(hook: &str, error: &ExecutorError) {
    warn!(hook, error = %error, "Optional hook failed; continuing");
    Metrics::hook_failed(hook);
}

// ============================================================================
// Tests
// ============================================================================
