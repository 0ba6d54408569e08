//! Open position model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use crate::order::{ClientOrderId, Direction};
use crate::signal::{TradeSignal, TradeType};

/// Instrument routed for a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    #[default]
    Stock,
    Option,
    Etf,
}

impl InstrumentType {
    /// Units of underlying per share/contract.
    pub fn multiplier(&self) -> Decimal {
        match self {
            Self::Option => Decimal::from(100),
            Self::Stock | Self::Etf => Decimal::ONE,
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stock => write!(f, "stock"),
            Self::Option => write!(f, "option"),
            Self::Etf => write!(f, "etf"),
        }
    }
}

/// An open position.
///
/// Invariant: `shares > 0` while the position is in the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub direction: Direction,
    pub entry_price: Price,
    pub current_price: Price,
    /// Shares or contracts (always positive).
    pub shares: u32,
    /// Working stop; may be moved toward breakeven.
    pub stop_loss: Price,
    /// Stop at entry, used to measure 1R.
    pub initial_stop_loss: Price,
    pub target_price: Option<Price>,
    pub entry_time: DateTime<Utc>,
    pub signal_id: ClientOrderId,
    pub trade_type: TradeType,
    pub instrument_type: InstrumentType,
    pub leverage: Decimal,
    /// Set once a scale-out partial close has happened.
    #[serde(default)]
    pub scaled_out: bool,
}

impl Position {
    /// Build a position from a validated fill.
    pub fn from_fill(
        signal: &TradeSignal,
        shares: u32,
        fill_price: Price,
        instrument_type: InstrumentType,
        leverage: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Result<Self> {
        if shares == 0 {
            return Err(CoreError::InvalidQuantity(
                "position requires at least one share".to_string(),
            ));
        }
        if !fill_price.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "fill price must be positive, got {fill_price}"
            )));
        }
        Ok(Self {
            ticker: signal.ticker.to_ascii_uppercase(),
            direction: signal.direction,
            entry_price: fill_price,
            current_price: fill_price,
            shares,
            stop_loss: signal.stop_loss,
            initial_stop_loss: signal.stop_loss,
            target_price: signal.target_price,
            entry_time,
            signal_id: signal.signal_id.clone(),
            trade_type: signal.trade_type(),
            instrument_type,
            leverage,
            scaled_out: false,
        })
    }

    /// Signed P&L of `qty` units closed at `price`.
    pub fn pnl_at(&self, price: Price, qty: u32) -> Price {
        let per_unit = (price - self.entry_price) * Decimal::from(self.direction.sign());
        per_unit.times_qty(qty) * self.instrument_type.multiplier()
    }

    /// Unrealized P&L at the current price.
    pub fn unrealized_pnl(&self) -> Price {
        self.pnl_at(self.current_price, self.shares)
    }

    /// Unrealized return as a fraction of entry (direction-adjusted).
    pub fn unrealized_frac(&self) -> Decimal {
        self.current_price
            .frac_from(self.entry_price)
            .map(|f| f * Decimal::from(self.direction.sign()))
            .unwrap_or(Decimal::ZERO)
    }

    /// Notional exposure at the current price.
    pub fn notional(&self) -> Price {
        self.current_price.times_qty(self.shares) * self.instrument_type.multiplier()
    }

    /// Initial risk per share (1R).
    pub fn risk_per_share(&self) -> Price {
        (self.entry_price - self.initial_stop_loss).abs()
    }

    /// Favorable move from entry in price terms at `price`.
    pub fn favorable_move(&self, price: Price) -> Price {
        (price - self.entry_price) * Decimal::from(self.direction.sign())
    }

    /// Profit measured in R multiples at `price`; `None` when 1R is zero.
    pub fn r_multiple(&self, price: Price) -> Option<Decimal> {
        let risk = self.risk_per_share();
        if risk.is_zero() {
            return None;
        }
        Some(self.favorable_move(price).inner() / risk.inner())
    }

    pub fn is_profitable(&self) -> bool {
        self.favorable_move(self.current_price).is_positive()
    }

    /// Add to the position at `price`, averaging the entry.
    pub fn add_shares(&mut self, qty: u32, price: Price) {
        if qty == 0 {
            return;
        }
        let total = self.shares + qty;
        let cost = self.entry_price.times_qty(self.shares) + price.times_qty(qty);
        self.entry_price = cost / Decimal::from(total);
        self.shares = total;
    }

    /// Reduce the position by `qty` and return the closed portion.
    ///
    /// `qty` must be strictly between 0 and `shares`, so the remainder is
    /// never empty.
    pub fn split_off(&mut self, qty: u32) -> Result<Position> {
        if qty == 0 || qty >= self.shares {
            return Err(CoreError::InvalidQuantity(format!(
                "partial quantity {qty} must be in 1..{}",
                self.shares
            )));
        }
        self.shares -= qty;
        let mut closed = self.clone();
        closed.shares = qty;
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position(shares: u32) -> Position {
        let signal = TradeSignal::new(
            "AAPL",
            Direction::Long,
            "breakout",
            "15m",
            dec!(80),
            Price::new(dec!(100)),
            Price::new(dec!(95)),
        );
        Position::from_fill(
            &signal,
            shares,
            Price::new(dec!(100)),
            InstrumentType::Stock,
            Decimal::ONE,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_fill_rejects_zero_shares() {
        let signal = TradeSignal::new(
            "AAPL",
            Direction::Long,
            "breakout",
            "15m",
            dec!(80),
            Price::new(dec!(100)),
            Price::new(dec!(95)),
        );
        let res = Position::from_fill(
            &signal,
            0,
            Price::new(dec!(100)),
            InstrumentType::Stock,
            Decimal::ONE,
            Utc::now(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_pnl_long_and_short() {
        let mut pos = long_position(10);
        pos.current_price = Price::new(dec!(103));
        assert_eq!(pos.unrealized_pnl().inner(), dec!(30));

        pos.direction = Direction::Short;
        assert_eq!(pos.unrealized_pnl().inner(), dec!(-30));
    }

    #[test]
    fn test_option_multiplier() {
        let mut pos = long_position(2);
        pos.instrument_type = InstrumentType::Option;
        assert_eq!(pos.pnl_at(Price::new(dec!(101)), 2).inner(), dec!(200));
    }

    #[test]
    fn test_r_multiple() {
        let pos = long_position(10);
        assert_eq!(pos.r_multiple(Price::new(dec!(105))), Some(dec!(1)));
        assert_eq!(pos.r_multiple(Price::new(dec!(110))), Some(dec!(2)));
    }

    #[test]
    fn test_add_shares_averages_entry() {
        let mut pos = long_position(10);
        pos.add_shares(10, Price::new(dec!(110)));
        assert_eq!(pos.shares, 20);
        assert_eq!(pos.entry_price.inner(), dec!(105));
    }

    #[test]
    fn test_split_off() {
        let mut pos = long_position(100);
        let closed = pos.split_off(50).unwrap();
        assert_eq!(closed.shares, 50);
        assert_eq!(pos.shares, 50);
        assert!(pos.split_off(50).is_err());
        assert!(pos.split_off(0).is_err());
    }
}
