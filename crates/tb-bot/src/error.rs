//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Risk error: {0}")]
    Risk(#[from] tb_risk::RiskError),

    #[error("Position error: {0}")]
    Position(#[from] tb_position::PositionError),

    #[error("Executor error: {0}")]
    Executor(#[from] tb_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tb_telemetry::TelemetryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
