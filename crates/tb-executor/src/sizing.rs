//! Risk-based position sizing.
//!
//! ```text
//! budget = equity * risk_per_trade_pct * clamp(conviction / 100, 0.5, 1.0)
//! shares = floor(budget / (|entry - stop| * multiplier))
//! shares = min(shares, floor(equity * max_position_pct / (entry * multiplier)))
//! ```
//!
//! A one-unit floor applies when the notional cap still allows one unit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tb_core::{InstrumentType, Price, TradeSignal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Equity fraction risked per trade at full conviction.
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: Decimal,
    /// Maximum notional per position as a fraction of equity.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Decimal,
}

fn default_risk_per_trade_pct() -> Decimal {
    Decimal::new(1, 2) // 1%
}

fn default_max_position_pct() -> Decimal {
    Decimal::new(25, 2) // 25%
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: default_risk_per_trade_pct(),
            max_position_pct: default_max_position_pct(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Conviction scaling factor in [0.5, 1.0].
    pub fn conviction_factor(conviction: Decimal) -> Decimal {
        (conviction / Decimal::ONE_HUNDRED).clamp(Decimal::new(5, 1), Decimal::ONE)
    }

    /// Units to trade; zero means the trade cannot be sized.
    pub fn size(&self, signal: &TradeSignal, equity: Price, instrument: InstrumentType) -> u32 {
        let multiplier = instrument.multiplier();
        let risk_per_unit = signal.risk_per_share().inner() * multiplier;
        let unit_notional = signal.entry_price.inner() * multiplier;
        if !equity.is_positive() || risk_per_unit <= Decimal::ZERO || unit_notional <= Decimal::ZERO
        {
            return 0;
        }

        let budget = equity.inner()
            * self.config.risk_per_trade_pct
            * Self::conviction_factor(signal.conviction);
        let by_risk = to_units(budget / risk_per_unit);
        let cap = to_units(equity.inner() * self.config.max_position_pct / unit_notional);

        let shares = by_risk.min(cap);
        let shares = if shares == 0 && cap >= 1 { 1 } else { shares };
        debug!(
            ticker = %signal.ticker,
            budget = %budget,
            by_risk,
            cap,
            shares,
            "Position sized"
        );
        shares
    }
}

fn to_units(d: Decimal) -> u32 {
    d.floor().to_u32().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tb_core::Direction;

    fn signal(conviction: Decimal, entry: Decimal, stop: Decimal) -> TradeSignal {
        TradeSignal::new(
            "AAPL",
            Direction::Long,
            "breakout",
            "15m",
            conviction,
            Price::new(entry),
            Price::new(stop),
        )
    }

    #[test]
    fn test_conviction_factor_clamped() {
        assert_eq!(PositionSizer::conviction_factor(dec!(20)), dec!(0.5));
        assert_eq!(PositionSizer::conviction_factor(dec!(82)), dec!(0.82));
        assert_eq!(PositionSizer::conviction_factor(dec!(150)), dec!(1));
    }

    #[test]
    fn test_risk_budget_sizing() {
        let sizer = PositionSizer::default();
        // 100k * 1% * 0.82 = 820; / 5 = 164; cap 25k / 185 = 135
        let s = signal(dec!(82), dec!(185), dec!(180));
        assert_eq!(sizer.size(&s, Price::new(dec!(100000)), InstrumentType::Stock), 135);

        // Wide stop: 820 / 20 = 41 < cap
        let wide = signal(dec!(82), dec!(185), dec!(165));
        assert_eq!(sizer.size(&wide, Price::new(dec!(100000)), InstrumentType::Stock), 41);
    }

    #[test]
    fn test_option_multiplier() {
        let sizer = PositionSizer::default();
        let s = signal(dec!(100), dec!(2.50), dec!(1.50));
        // budget 1000 / (1 * 100) = 10; cap 25000 / 250 = 100
        assert_eq!(sizer.size(&s, Price::new(dec!(100000)), InstrumentType::Option), 10);
    }

    #[test]
    fn test_floor_at_one_when_affordable() {
        let sizer = PositionSizer::default();
        let s = signal(dec!(50), dec!(100), dec!(50));
        // budget 5000*0.01*0.5 = 25 / 50 = 0 -> 1 (cap 12)
        assert_eq!(sizer.size(&s, Price::new(dec!(5000)), InstrumentType::Stock), 1);
    }

    #[test]
    fn test_unaffordable_is_zero() {
        let sizer = PositionSizer::default();
        let s = signal(dec!(80), dec!(5000), dec!(4900));
        assert_eq!(sizer.size(&s, Price::new(dec!(10000)), InstrumentType::Stock), 0);
        assert_eq!(sizer.size(&s, Price::ZERO, InstrumentType::Stock), 0);
    }
}
