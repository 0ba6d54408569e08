//! Trade execution bot.
//!
//! Wires the execution core into a running process:
//! - TOML configuration for every component
//! - File-based signal, price and account sources
//! - Signal pipeline on every poll, exit lifecycle on every tick
//! - Periodic broker reconciliation and metrics dumps
//! - Drain on shutdown (close everything, latch the kill switch)

pub mod app;
pub mod config;
pub mod error;
pub mod sources;

pub use app::{Application, CycleReport, ShutdownHandle};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
