//! Fill validation.
//!
//! The only gate between a broker result and a local position. Rejections
//! are values: a position must never be created from an unconfirmed or
//! economically nonsensical fill.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tb_core::{Clock, OrderResult, OrderStatus, Price, SystemClock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderValidatorConfig {
    /// Maximum |fill - expected| / expected.
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: Decimal,
    #[serde(default = "default_allow_partial_fills")]
    pub allow_partial_fills: bool,
    /// Fill timestamps older than this produce a warning.
    #[serde(default = "default_stale_fill_secs")]
    pub stale_fill_secs: i64,
}

fn default_max_slippage_pct() -> Decimal {
    Decimal::new(2, 2) // 2%
}

fn default_allow_partial_fills() -> bool {
    true
}

fn default_stale_fill_secs() -> i64 {
    60
}

impl Default for OrderValidatorConfig {
    fn default() -> Self {
        Self {
            max_slippage_pct: default_max_slippage_pct(),
            allow_partial_fills: default_allow_partial_fills(),
            stale_fill_secs: default_stale_fill_secs(),
        }
    }
}

/// Validation verdict for one fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FillValidation {
    pub is_valid: bool,
    /// Quantity actually filled.
    pub adjusted_qty: u32,
    pub fill_price: Price,
    pub reason: String,
    pub warnings: Vec<String>,
}

impl FillValidation {
    fn invalid(result: &OrderResult, reason: String) -> Self {
        Self {
            is_valid: false,
            adjusted_qty: 0,
            fill_price: result.filled_price,
            reason,
            warnings: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct OrderValidator {
    config: OrderValidatorConfig,
    clock: Arc<dyn Clock>,
}

impl Default for OrderValidator {
    fn default() -> Self {
        Self::new(OrderValidatorConfig::default())
    }
}

impl fmt::Debug for OrderValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrderValidator {
    pub fn new(config: OrderValidatorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Measure fill staleness against `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn validate_fill(
        &self,
        result: &OrderResult,
        expected_qty: u32,
        expected_price: Price,
    ) -> FillValidation {
        self.validate_fill_at(result, expected_qty, expected_price, self.clock.now())
    }

    pub fn validate_fill_at(
        &self,
        result: &OrderResult,
        expected_qty: u32,
        expected_price: Price,
        now: DateTime<Utc>,
    ) -> FillValidation {
        let v = self.check(result, expected_qty, expected_price, now);
        if v.is_valid {
            if !v.warnings.is_empty() {
                warn!(order_id = %result.order_id, warnings = ?v.warnings, "Fill accepted with warnings");
            }
        } else {
            debug!(order_id = %result.order_id, reason = %v.reason, "Fill rejected");
        }
        v
    }

    fn check(
        &self,
        result: &OrderResult,
        expected_qty: u32,
        expected_price: Price,
        now: DateTime<Utc>,
    ) -> FillValidation {
        if matches!(
            result.status,
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Pending
        ) {
            let detail = result.reason.as_deref().unwrap_or("no reason given");
            return FillValidation::invalid(
                result,
                format!("order {}: {detail}", result.status),
            );
        }
        if result.filled_qty == 0 {
            return FillValidation::invalid(result, "filled quantity is zero".to_string());
        }
        if !result.filled_price.is_positive() {
            return FillValidation::invalid(
                result,
                format!("invalid fill price {}", result.filled_price),
            );
        }
        if let Some(frac) = result.filled_price.frac_from(expected_price) {
            let slippage = frac.abs();
            if slippage > self.config.max_slippage_pct {
                return FillValidation::invalid(
                    result,
                    format!(
                        "slippage {:.4} exceeds max {} (fill {} vs expected {})",
                        slippage, self.config.max_slippage_pct, result.filled_price, expected_price
                    ),
                );
            }
        }

        let mut warnings = Vec::new();
        let is_partial = result.status == OrderStatus::Partial || result.filled_qty < expected_qty;
        if is_partial {
            if !self.config.allow_partial_fills {
                return FillValidation::invalid(
                    result,
                    format!(
                        "partial fill {}/{} not allowed",
                        result.filled_qty, expected_qty
                    ),
                );
            }
            if expected_qty > 0 && u64::from(result.filled_qty) * 2 < u64::from(expected_qty) {
                warnings.push(format!(
                    "low fill ratio: {}/{}",
                    result.filled_qty, expected_qty
                ));
            }
        }
        if result.filled_qty > expected_qty {
            warnings.push(format!(
                "over-fill: {} filled for {} requested",
                result.filled_qty, expected_qty
            ));
        }
        let age = now - result.timestamp;
        if age > chrono::Duration::seconds(self.config.stale_fill_secs) {
            warnings.push(format!("stale fill: {}s old", age.num_seconds()));
        }

        FillValidation {
            is_valid: true,
            adjusted_qty: result.filled_qty,
            fill_price: result.filled_price,
            reason: if is_partial {
                "partial fill accepted".to_string()
            } else {
                "fill validated".to_string()
            },
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filled(qty: u32, price: Decimal) -> OrderResult {
        OrderResult {
            order_id: "o-1".to_string(),
            status: OrderStatus::Filled,
            filled_qty: qty,
            filled_price: Price::new(price),
            broker: "paper".to_string(),
            timestamp: Utc::now(),
            reason: None,
        }
    }

    fn validator() -> OrderValidator {
        OrderValidator::default()
    }

    #[test]
    fn test_clean_fill() {
        let v = validator().validate_fill(&filled(100, dec!(185.10)), 100, Price::new(dec!(185)));
        assert!(v.is_valid);
        assert_eq!(v.adjusted_qty, 100);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn test_rejects_unconfirmed_statuses() {
        for status in [OrderStatus::Rejected, OrderStatus::Cancelled, OrderStatus::Pending] {
            let mut r = filled(100, dec!(185));
            r.status = status;
            let v = validator().validate_fill(&r, 100, Price::new(dec!(185)));
            assert!(!v.is_valid, "{status} should be rejected");
            assert_eq!(v.adjusted_qty, 0);
        }
    }

    #[test]
    fn test_rejects_zero_qty_and_price() {
        let v = validator().validate_fill(&filled(0, dec!(185)), 100, Price::new(dec!(185)));
        assert!(!v.is_valid);

        let v = validator().validate_fill(&filled(100, dec!(0)), 100, Price::new(dec!(185)));
        assert!(!v.is_valid);
        assert!(v.reason.starts_with("invalid fill price"));
    }

    #[test]
    fn test_rejects_excess_slippage() {
        let v = validator().validate_fill(&filled(100, dec!(190)), 100, Price::new(dec!(185)));
        assert!(!v.is_valid);
        assert!(v.reason.starts_with("slippage"));
    }

    #[test]
    fn test_partial_fill_warning() {
        let mut r = filled(40, dec!(185));
        r.status = OrderStatus::Partial;
        let v = validator().validate_fill(&r, 100, Price::new(dec!(185)));
        assert!(v.is_valid);
        assert_eq!(v.adjusted_qty, 40);
        assert!(v.warnings.iter().any(|w| w.starts_with("low fill ratio")));

        let strict = OrderValidator::new(OrderValidatorConfig {
            allow_partial_fills: false,
            ..Default::default()
        });
        assert!(!strict.validate_fill(&r, 100, Price::new(dec!(185))).is_valid);
    }

    #[test]
    fn test_stale_and_overfill_warnings() {
        let mut r = filled(120, dec!(185));
        r.timestamp = Utc::now() - chrono::Duration::seconds(600);
        let v = validator().validate_fill(&r, 100, Price::new(dec!(185)));
        assert!(v.is_valid);
        assert!(v.warnings.iter().any(|w| w.starts_with("stale fill")));
        assert!(v.warnings.iter().any(|w| w.starts_with("over-fill")));
    }

    #[test]
    fn test_staleness_follows_injected_clock() {
        use chrono::TimeZone;
        use tb_core::ManualClock;

        let filled_at = Utc.with_ymd_and_hms(2024, 7, 10, 15, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(filled_at));
        let v = validator().with_clock(clock.clone());
        let mut r = filled(100, dec!(185));
        r.timestamp = filled_at;

        assert!(v.validate_fill(&r, 100, Price::new(dec!(185))).warnings.is_empty());

        clock.set_wall(filled_at + chrono::Duration::seconds(600));
        let late = v.validate_fill(&r, 100, Price::new(dec!(185)));
        assert!(late.is_valid);
        assert_eq!(late.warnings, vec!["stale fill: 600s old".to_string()]);
    }
}
