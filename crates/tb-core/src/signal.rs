//! Inbound trade signals and the market context consumed by exit checks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use crate::order::{ClientOrderId, Direction};
use crate::position::InstrumentType;

/// Metadata key a detector may set to request an instrument.
pub const INSTRUMENT_HINT_KEY: &str = "instrument";

/// Directional trade signal produced by an upstream detector.
///
/// Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    #[serde(default)]
    pub signal_id: ClientOrderId,
    pub ticker: String,
    pub direction: Direction,
    pub signal_type: String,
    pub timeframe: String,
    /// Confidence score, 0-100.
    pub conviction: Decimal,
    pub entry_price: Price,
    pub stop_loss: Price,
    #[serde(default)]
    pub target_price: Option<Price>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TradeSignal {
    /// Create a signal timestamped now with a fresh id.
    pub fn new(
        ticker: impl Into<String>,
        direction: Direction,
        signal_type: impl Into<String>,
        timeframe: impl Into<String>,
        conviction: Decimal,
        entry_price: Price,
        stop_loss: Price,
    ) -> Self {
        Self {
            signal_id: ClientOrderId::new(),
            ticker: ticker.into(),
            direction,
            signal_type: signal_type.into(),
            timeframe: timeframe.into(),
            conviction,
            entry_price,
            stop_loss,
            target_price: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Price) -> Self {
        self.target_price = Some(target);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Dedup identity.
    pub fn key(&self) -> SignalKey {
        SignalKey {
            ticker: self.ticker.to_ascii_uppercase(),
            signal_type: self.signal_type.clone(),
            direction: self.direction,
        }
    }

    /// Distance between entry and stop (1R per share).
    pub fn risk_per_share(&self) -> Price {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Basic sanity checks on prices.
    ///
    /// The stop must sit on the losing side of the entry.
    pub fn validate(&self) -> Result<()> {
        if self.ticker.trim().is_empty() {
            return Err(CoreError::InvalidSignal("empty ticker".to_string()));
        }
        if !self.entry_price.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "entry price must be positive, got {}",
                self.entry_price
            )));
        }
        if !self.stop_loss.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "stop loss must be positive, got {}",
                self.stop_loss
            )));
        }
        let stop_ok = match self.direction {
            Direction::Long => self.stop_loss < self.entry_price,
            Direction::Short => self.stop_loss > self.entry_price,
        };
        if !stop_ok {
            return Err(CoreError::InvalidSignal(format!(
                "stop {} is on the wrong side of entry {} for {}",
                self.stop_loss, self.entry_price, self.direction
            )));
        }
        Ok(())
    }

    /// Instrument the detector asked for, stock when absent or unrecognized.
    pub fn instrument_hint(&self) -> InstrumentType {
        self.metadata
            .get(INSTRUMENT_HINT_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn trade_type(&self) -> TradeType {
        TradeType::from_timeframe(&self.timeframe)
    }

    /// True for daily-or-longer timeframes, which may be acted on outside
    /// the regular session.
    pub fn is_daily_timeframe(&self) -> bool {
        is_daily_timeframe(&self.timeframe)
    }
}

/// Dedup key: (ticker, signal type, direction).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalKey {
    pub ticker: String,
    pub signal_type: String,
    pub direction: Direction,
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ticker, self.signal_type, self.direction)
    }
}

/// Holding-period classification of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Scalp,
    Day,
    Swing,
}

impl TradeType {
    /// Classify from a timeframe label such as `5m`, `1h` or `1d`.
    pub fn from_timeframe(timeframe: &str) -> Self {
        let tf = timeframe.trim().to_ascii_lowercase();
        if is_daily_timeframe(&tf) || tf == "4h" {
            return Self::Swing;
        }
        match tf.as_str() {
            "1m" | "2m" | "3m" | "5m" => Self::Scalp,
            _ => Self::Day,
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalp => write!(f, "scalp"),
            Self::Day => write!(f, "day"),
            Self::Swing => write!(f, "swing"),
        }
    }
}

fn is_daily_timeframe(timeframe: &str) -> bool {
    matches!(
        timeframe.trim().to_ascii_lowercase().as_str(),
        "1d" | "d" | "daily" | "day" | "1w" | "w" | "weekly"
    )
}

/// OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: u64,
}

/// One EMA cloud: the band between a fast and a slow EMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudBand {
    pub upper: Price,
    pub lower: Price,
    /// Fast EMA above slow EMA.
    pub bullish: bool,
}

impl CloudBand {
    /// True when the cloud trend opposes a position in `direction`.
    pub fn opposes(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => !self.bullish,
            Direction::Short => self.bullish,
        }
    }

    /// True when `close` sits outside the band on the losing side for `direction`.
    pub fn closed_against(&self, close: Price, direction: Direction) -> bool {
        match direction {
            Direction::Long => close < self.lower,
            Direction::Short => close > self.upper,
        }
    }
}

/// Cloud state supplied by the external indicator layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudState {
    /// Fastest cloud (e.g. 5/12 EMA).
    pub fast: CloudBand,
    /// Pullback cloud used for swing trailing (e.g. 8/9 EMA).
    #[serde(default)]
    pub pullback: Option<CloudBand>,
}
