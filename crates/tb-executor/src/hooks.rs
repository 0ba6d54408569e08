//! Optional side-effect collaborators.
//!
//! Each hook is injected at construction and may be absent. The orchestrator
//! treats every hook failure as non-fatal: it is logged and counted, and the
//! trade proceeds.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tb_core::{InstrumentType, OrderResult, Position, TradeSignal};

use crate::error::ExecutorResult;
use crate::history::ClosedPosition;

/// Instrument choice for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRoute {
    pub instrument_type: InstrumentType,
    pub leverage: Decimal,
}

impl Default for InstrumentRoute {
    fn default() -> Self {
        Self {
            instrument_type: InstrumentType::Stock,
            leverage: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Adjusts a signal for the current market regime. `None` keeps it as is.
#[cfg_attr(test, mockall::automock)]
pub trait RegimeAdapter: Send + Sync {
    fn adapt(&self, signal: &TradeSignal) -> ExecutorResult<Option<TradeSignal>>;
}

/// Persists every signal that reaches risk assessment.
#[cfg_attr(test, mockall::automock)]
pub trait SignalRecorder: Send + Sync {
    fn record(&self, signal: &TradeSignal) -> ExecutorResult<()>;
}

/// Chooses stock, option or ETF for a signal.
#[cfg_attr(test, mockall::automock)]
pub trait InstrumentRouter: Send + Sync {
    fn route(&self, signal: &TradeSignal) -> ExecutorResult<InstrumentRoute>;
}

/// Trade journal.
#[cfg_attr(test, mockall::automock)]
pub trait Journal: Send + Sync {
    fn record_entry(&self, position: &Position, order: &OrderResult) -> ExecutorResult<()>;
    fn record_exit(&self, closed: &ClosedPosition) -> ExecutorResult<()>;
}

/// Operator notifications.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    fn alert(&self, level: AlertLevel, message: &str) -> ExecutorResult<()>;
}

/// Performance analytics.
#[cfg_attr(test, mockall::automock)]
pub trait AnalyticsSink: Send + Sync {
    fn on_entry(&self, position: &Position) -> ExecutorResult<()>;
    fn on_exit(&self, closed: &ClosedPosition) -> ExecutorResult<()>;
}

/// Outcome feedback to upstream signal scoring.
#[cfg_attr(test, mockall::automock)]
pub trait FeedbackSink: Send + Sync {
    /// A signal turned into (or added to) a position.
    fn on_position_opened(&self, signal: &TradeSignal, position: &Position) -> ExecutorResult<()>;
    fn on_trade_closed(&self, closed: &ClosedPosition) -> ExecutorResult<()>;
}

/// The full set of optional hooks.
#[derive(Clone, Default)]
pub struct Hooks {
    pub regime: Option<Arc<dyn RegimeAdapter>>,
    pub recorder: Option<Arc<dyn SignalRecorder>>,
    pub router: Option<Arc<dyn InstrumentRouter>>,
    pub journal: Option<Arc<dyn Journal>>,
    pub alerts: Option<Arc<dyn AlertSink>>,
    pub analytics: Option<Arc<dyn AnalyticsSink>>,
    pub feedback: Option<Arc<dyn FeedbackSink>>,
}

impl Hooks {
    #[must_use]
    pub fn with_regime(mut self, hook: Arc<dyn RegimeAdapter>) -> Self {
        self.regime = Some(hook);
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, hook: Arc<dyn SignalRecorder>) -> Self {
        self.recorder = Some(hook);
        self
    }

    #[must_use]
    pub fn with_router(mut self, hook: Arc<dyn InstrumentRouter>) -> Self {
        self.router = Some(hook);
        self
    }

    #[must_use]
    pub fn with_journal(mut self, hook: Arc<dyn Journal>) -> Self {
        self.journal = Some(hook);
        self
    }

    #[must_use]
    pub fn with_alerts(mut self, hook: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(hook);
        self
    }

    #[must_use]
    pub fn with_analytics(mut self, hook: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(hook);
        self
    }

    #[must_use]
    pub fn with_feedback(mut self, hook: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = Some(hook);
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("regime", &self.regime.is_some())
            .field("recorder", &self.recorder.is_some())
            .field("router", &self.router.is_some())
            .field("journal", &self.journal.is_some())
            .field("alerts", &self.alerts.is_some())
            .field("analytics", &self.analytics.is_some())
            .field("feedback", &self.feedback.is_some())
            .finish()
    }
}
