//! Executor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Hook failed: {0}")]
    Hook(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
