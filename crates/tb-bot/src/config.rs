//! Application configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use tb_executor::{OrchestratorConfig, OrderValidatorConfig};
use tb_position::{ExitMonitorConfig, ReconcilerConfig};
use tb_risk::{RiskGateConfig, SignalGuardConfig};

use crate::error::{AppError, AppResult};

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Signals are read and logged; nothing is executed.
    Observation,
    /// Signals execute against the in-memory paper broker.
    #[default]
    Paper,
}

/// Persistent state location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding the state document.
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    /// Timezone whose calendar date drives the daily P&L rollover.
    #[serde(default = "default_day_timezone")]
    pub day_timezone: String,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data/state")
}

fn default_day_timezone() -> String {
    "America/New_York".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            day_timezone: default_day_timezone(),
        }
    }
}

/// File-based inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Newline-delimited JSON signals, appended by an upstream detector.
    #[serde(default = "default_signal_file")]
    pub signal_file: PathBuf,
    /// JSON object of ticker -> last price.
    #[serde(default = "default_price_file")]
    pub price_file: PathBuf,
    /// Optional JSON object of ticker -> bars and cloud state.
    #[serde(default)]
    pub market_file: Option<PathBuf>,
    /// Optional JSON account snapshot; without it the risk gate is bypassed.
    #[serde(default)]
    pub account_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_signal_file() -> PathBuf {
    PathBuf::from("data/signals.jsonl")
}

fn default_price_file() -> PathBuf {
    PathBuf::from("data/prices.json")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            signal_file: default_signal_file(),
            price_file: default_price_file(),
            market_file: None,
            account_file: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Periodic housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Reconcile against the broker every N seconds. Zero disables.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Prometheus text exposition written here on every stats interval.
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_stats_interval_secs() -> u64 {
    300
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            metrics_file: None,
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub signal_guard: SignalGuardConfig,
    #[serde(default)]
    pub risk: RiskGateConfig,
    #[serde(default)]
    pub validator: OrderValidatorConfig,
    #[serde(default)]
    pub exits: ExitMonitorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the bot misbehave silently.
    pub fn validate(&self) -> AppResult<()> {
        if self.sources.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "sources.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.telemetry.stats_interval_secs == 0 {
            return Err(AppError::Config(
                "telemetry.stats_interval_secs must be positive".to_string(),
            ));
        }
        if self.orchestrator.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "orchestrator.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        self.day_timezone()?;
        Ok(())
    }

    pub fn day_timezone(&self) -> AppResult<chrono_tz::Tz> {
        self.state.day_timezone.parse().map_err(|_| {
            AppError::Config(format!(
                "unknown state.day_timezone: {}",
                self.state.day_timezone
            ))
        })
    }

    pub fn is_observation_mode(&self) -> bool {
        self.mode == OperatingMode::Observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.mode, OperatingMode::Paper);
        assert_eq!(config.sources.poll_interval_ms, 1_000);
        assert_eq!(config.risk.max_open_positions, 5);
        assert_eq!(config.orchestrator.retry.max_attempts, 3);
    }

    #[test]
    fn test_sections_override() {
        let config = AppConfig::from_toml(
            r#"
            mode = "observation"

            [risk]
            daily_loss_limit_pct = 0.05
            max_open_positions = 2

            [orchestrator]
            max_consecutive_losses = 4

            [orchestrator.retry]
            max_attempts = 5

            [sources]
            signal_file = "/tmp/in.jsonl"
            "#,
        )
        .unwrap();
        assert!(config.is_observation_mode());
        assert_eq!(config.risk.daily_loss_limit_pct, dec!(0.05));
        assert_eq!(config.risk.max_open_positions, 2);
        assert_eq!(config.orchestrator.max_consecutive_losses, 4);
        assert_eq!(config.orchestrator.retry.max_attempts, 5);
        assert_eq!(config.orchestrator.retry.base_delay_ms, 500);
        assert_eq!(config.sources.signal_file, PathBuf::from("/tmp/in.jsonl"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml("[sources]\npoll_interval_ms = 0").is_err());
        assert!(AppConfig::from_toml("[state]\nday_timezone = \"Mars/Olympus\"").is_err());
        assert!(AppConfig::from_toml("mode = \"yolo\"").is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let content = include_str!("../../../config/default.toml");
        assert!(AppConfig::from_toml(content).is_ok());
    }
}
