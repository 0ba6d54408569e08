//! Signal execution and position lifecycle.
//!
//! # Key Components
//!
//! - [`BotOrchestrator`]: serialized signal pipeline and position book
//! - [`LifecycleManager`]: price refresh, exit evaluation, emergency flatten
//! - [`OrderValidator`]: fill checks (slippage, partial fills, staleness)
//! - [`PositionSizer`]: conviction-scaled risk budget sizing
//! - [`submit_with_retry`]: bounded retry with exponential backoff
//! - [`PaperBroker`]: in-memory [`OrderSubmitter`] and [`BrokerPositionFeed`]
//! - [`Hooks`]: optional journal, alert, analytics and routing collaborators
//!
//! # Pipeline Stages (in `BotOrchestrator::process_signal`)
//!
//! 1. kill switch / circuit breaker -> `kill_switch`
//! 2. validity, freshness, dedup -> `signal_guard`
//! 3. regime hook -> `regime_adaptation` (non-fatal)
//! 4. recorder hook -> `signal_recording` (non-fatal)
//! 5. risk gate or fallback cap -> `risk_assessment`
//! 6. router hook -> `instrument_routing` (falls back to stock)
//! 7. share count -> `sizing`
//! 8. broker submission -> `order_submission`
//! 9. fill checks -> `fill_validation`
//! 10. book update -> `position_creation`
//! 11. (all passed) -> `completed`

pub mod broker;
pub mod error;
pub mod history;
pub mod hooks;
pub mod lifecycle;
pub mod orchestrator;
pub mod retry;
pub mod sizing;
pub mod validator;

// Broker seam
pub use broker::{BoxFuture, BrokerPositionFeed, OrderSubmitter, PaperBroker, PaperOutcome};

// Error types
pub use error::{ExecutorError, ExecutorResult};

// Execution history
pub use history::{ClosedPosition, ExecutionHistory, ExecutionKind, ExecutionRecord};

// Optional collaborators
pub use hooks::{
    AlertLevel, AlertSink, AnalyticsSink, FeedbackSink, Hooks, InstrumentRoute, InstrumentRouter,
    Journal, RegimeAdapter, SignalRecorder,
};

// Pipeline and lifecycle
pub use lifecycle::{LifecycleManager, PortfolioSnapshot};
pub use orchestrator::{BotOrchestrator, OrchestratorConfig, PipelineResult, PipelineStage};

pub use retry::{submit_with_retry, RetryPolicy};
pub use sizing::{PositionSizer, SizingConfig};
pub use validator::{FillValidation, OrderValidator, OrderValidatorConfig};
