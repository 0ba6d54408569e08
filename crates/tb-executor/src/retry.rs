//! Order submission with retry and exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tb_core::{Order, OrderResult};
use tb_telemetry::Metrics;

use crate::broker::OrderSubmitter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base * 2^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Submit `order`, retrying transport errors and broker rejections.
///
/// Returns the first non-rejected result. When every attempt fails the
/// result is a synthetic `rejected` carrying the last error; the raw error
/// never reaches the caller.
pub async fn submit_with_retry(
    submitter: &dyn OrderSubmitter,
    order: &Order,
    policy: &RetryPolicy,
) -> OrderResult {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=attempts {
        if attempt > 1 {
            Metrics::order_retry();
        }
        match submitter.submit_order(order.clone()).await {
            Ok(result) if !result.is_rejected() => {
                debug!(
                    ticker = %order.ticker,
                    attempt,
                    status = %result.status,
                    "Order accepted"
                );
                return result;
            }
            Ok(result) => {
                last_error = result
                    .reason
                    .unwrap_or_else(|| "rejected without reason".to_string());
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        warn!(
            ticker = %order.ticker,
            signal_id = %order.signal_id,
            attempt,
            max_attempts = attempts,
            error = %last_error,
            "Order attempt failed"
        );
        if attempt < attempts {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }

    OrderResult::rejected(
        submitter.name(),
        format!("all {attempts} attempts failed: {last_error}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{PaperBroker, PaperOutcome};
    use rust_decimal_macros::dec;
    use tb_core::{ClientOrderId, OrderSide, OrderStatus, Price};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn order() -> Order {
        Order::limit(
            "AAPL",
            OrderSide::Buy,
            10,
            Price::new(dec!(185)),
            ClientOrderId::from("sig-1"),
        )
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let broker = PaperBroker::new();
        broker.push_outcome(PaperOutcome::TransportError("reset".into()));
        broker.push_outcome(PaperOutcome::Reject("busy".into()));

        let r = submit_with_retry(&broker, &order(), &fast_policy()).await;
        assert_eq!(r.status, OrderStatus::Filled);
        assert_eq!(broker.orders().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_synthetic_rejection() {
        let broker = PaperBroker::new();
        for _ in 0..3 {
            broker.push_outcome(PaperOutcome::TransportError("timeout".into()));
        }
        let r = submit_with_retry(&broker, &order(), &fast_policy()).await;
        assert!(r.is_rejected());
        assert_eq!(r.broker, "paper");
        let reason = r.reason.unwrap();
        assert!(reason.starts_with("all 3 attempts failed"));
        assert!(reason.contains("timeout"));
        assert_eq!(broker.orders().len(), 3);
    }
}
