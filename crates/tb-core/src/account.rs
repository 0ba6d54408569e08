//! Account snapshot supplied by the caller per signal.

use serde::{Deserialize, Serialize};

use crate::decimal::Price;
use crate::position::Position;

/// Point-in-time account view used by pre-trade risk checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: Price,
    pub cash: Price,
    pub buying_power: Price,
    /// Equity at the start of the trading day.
    pub starting_equity: Price,
    /// Realized P&L for the current day.
    #[serde(default)]
    pub daily_pnl: Price,
    #[serde(default)]
    pub open_positions: Vec<Position>,
}

impl AccountState {
    /// Flat account where equity, cash and buying power are all `equity`.
    pub fn with_equity(equity: Price) -> Self {
        Self {
            equity,
            cash: equity,
            buying_power: equity,
            starting_equity: equity,
            daily_pnl: Price::ZERO,
            open_positions: Vec::new(),
        }
    }

    /// Open position for `ticker`, if any.
    pub fn position_for(&self, ticker: &str) -> Option<&Position> {
        self.open_positions
            .iter()
            .find(|p| p.ticker.eq_ignore_ascii_case(ticker))
    }
}
