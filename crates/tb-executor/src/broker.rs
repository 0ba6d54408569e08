//! Broker seam: order submission and position feed traits.
//!
//! The core never speaks a broker wire protocol. It depends on
//! [`OrderSubmitter`] for orders and [`BrokerPositionFeed`] for
//! reconciliation; [`PaperBroker`] implements both in memory.

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use tb_core::{Clock, Direction, Order, OrderResult, OrderSide, OrderStatus, Price, SystemClock};
use tb_position::BrokerPosition;

use crate::error::{ExecutorError, ExecutorResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Submits orders to a broker.
///
/// `Err` is a transport failure (retryable); a broker rejection is an `Ok`
/// result with status `rejected`.
pub trait OrderSubmitter: Send + Sync {
    /// Broker name stamped on synthetic results.
    fn name(&self) -> &str;

    fn submit_order(&self, order: Order) -> BoxFuture<'_, ExecutorResult<OrderResult>>;
}

/// Supplies the broker's view of open positions.
pub trait BrokerPositionFeed: Send + Sync {
    fn broker_positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<BrokerPosition>>>;
}

/// Last-resort fill price when an order carries no price at all.
pub const PAPER_FALLBACK_PRICE: u32 = 100;

/// Scripted outcome consumed by the next [`PaperBroker`] submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperOutcome {
    /// Transport failure.
    TransportError(String),
    /// Broker rejection.
    Reject(String),
    /// Fill only part of the requested quantity.
    PartialFill(u32),
    /// Fill at a specific price.
    FillAt(Price),
}

/// In-memory broker that fills immediately.
///
/// Fill price: limit price, else stop price, else the order's reference
/// price, else [`PAPER_FALLBACK_PRICE`]. Net positions are tracked per
/// symbol so the paper broker can drive reconciliation.
pub struct PaperBroker {
    name: String,
    next_id: AtomicU64,
    script: Mutex<VecDeque<PaperOutcome>>,
    orders: Mutex<Vec<Order>>,
    /// Symbol -> (signed qty, last fill price).
    net: Mutex<BTreeMap<String, (i64, Price)>>,
    clock: Arc<dyn Clock>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            name: "paper".to_string(),
            next_id: AtomicU64::new(1),
            script: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            net: Mutex::new(BTreeMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp fills with `clock` instead of the system time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Queue an outcome for an upcoming submission (FIFO).
    pub fn push_outcome(&self, outcome: PaperOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Every order received, including failed attempts.
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }

    /// Forget a symbol, as if it had been closed outside the bot.
    pub fn drop_position(&self, symbol: &str) {
        self.net.lock().remove(&symbol.to_ascii_uppercase());
    }

    fn fill_price(order: &Order) -> Price {
        order
            .limit_price
            .or(order.stop_price)
            .or(order.reference_price)
            .unwrap_or_else(|| Price::from(PAPER_FALLBACK_PRICE))
    }

    fn apply_fill(&self, order: &Order, qty: u32, price: Price) {
        let signed = match order.side {
            OrderSide::Buy => i64::from(qty),
            OrderSide::Sell => -i64::from(qty),
        };
        let mut net = self.net.lock();
        let key = order.ticker.to_ascii_uppercase();
        let entry = net.entry(key.clone()).or_insert((0, price));
        entry.0 += signed;
        entry.1 = price;
        if entry.0 == 0 {
            net.remove(&key);
        }
    }

    fn execute(&self, order: Order) -> ExecutorResult<OrderResult> {
        self.orders.lock().push(order.clone());
        let outcome = self.script.lock().pop_front();

        let mut qty = order.quantity;
        let mut price = Self::fill_price(&order);
        match outcome {
            Some(PaperOutcome::TransportError(msg)) => {
                return Err(ExecutorError::ConnectionError(msg));
            }
            Some(PaperOutcome::Reject(reason)) => {
                return Ok(OrderResult::rejected(self.name.clone(), reason));
            }
            Some(PaperOutcome::PartialFill(n)) => qty = n.min(order.quantity),
            Some(PaperOutcome::FillAt(p)) => price = p,
            None => {}
        }

        let status = if qty < order.quantity {
            OrderStatus::Partial
        } else {
            OrderStatus::Filled
        };
        if qty > 0 {
            self.apply_fill(&order, qty, price);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            ticker = %order.ticker,
            side = %order.side,
            qty,
            price = %price,
            "Paper fill"
        );
        Ok(OrderResult {
            order_id: format!("paper-{id}"),
            status,
            filled_qty: qty,
            filled_price: price,
            broker: self.name.clone(),
            timestamp: self.clock.now(),
            reason: None,
        })
    }
}

impl OrderSubmitter for PaperBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit_order(&self, order: Order) -> BoxFuture<'_, ExecutorResult<OrderResult>> {
        Box::pin(async move { self.execute(order) })
    }
}

impl BrokerPositionFeed for PaperBroker {
    fn broker_positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<BrokerPosition>>> {
        Box::pin(async move {
            let net = self.net.lock();
            Ok(net
                .iter()
                .map(|(symbol, (qty, price))| BrokerPosition {
                    symbol: symbol.clone(),
                    qty: u32::try_from(qty.unsigned_abs()).unwrap_or(u32::MAX),
                    side: if *qty > 0 {
                        Direction::Long
                    } else {
                        Direction::Short
                    },
                    current_price: *price,
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tb_core::ClientOrderId;

    fn buy(qty: u32) -> Order {
        Order::limit(
            "AAPL",
            OrderSide::Buy,
            qty,
            Price::new(dec!(185)),
            ClientOrderId::from("sig-1"),
        )
    }

    #[tokio::test]
    async fn test_fills_at_limit_price() {
        let broker = PaperBroker::new();
        let r = broker.submit_order(buy(10)).await.unwrap();
        assert_eq!(r.status, OrderStatus::Filled);
        assert_eq!(r.filled_qty, 10);
        assert_eq!(r.filled_price, Price::new(dec!(185)));
        assert_eq!(r.broker, "paper");
    }

    #[tokio::test]
    async fn test_fill_price_fallbacks() {
        let broker = PaperBroker::new();
        let with_ref = Order::market(
            "MSFT",
            OrderSide::Sell,
            1,
            Some(Price::new(dec!(410))),
            ClientOrderId::new(),
        );
        let r = broker.submit_order(with_ref).await.unwrap();
        assert_eq!(r.filled_price, Price::new(dec!(410)));

        let bare = Order::market("MSFT", OrderSide::Buy, 1, None, ClientOrderId::new());
        let r = broker.submit_order(bare).await.unwrap();
        assert_eq!(r.filled_price, Price::from(PAPER_FALLBACK_PRICE));
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let broker = PaperBroker::new();
        broker.push_outcome(PaperOutcome::TransportError("timeout".into()));
        broker.push_outcome(PaperOutcome::Reject("halted".into()));
        broker.push_outcome(PaperOutcome::PartialFill(4));

        assert!(broker.submit_order(buy(10)).await.is_err());
        assert!(broker.submit_order(buy(10)).await.unwrap().is_rejected());
        let partial = broker.submit_order(buy(10)).await.unwrap();
        assert_eq!(partial.status, OrderStatus::Partial);
        assert_eq!(partial.filled_qty, 4);
        assert_eq!(broker.orders().len(), 3);
    }

    #[tokio::test]
    async fn test_tracks_net_positions() {
        let broker = PaperBroker::new();
        broker.submit_order(buy(10)).await.unwrap();
        let sell = Order::market(
            "AAPL",
            OrderSide::Sell,
            4,
            Some(Price::new(dec!(190))),
            ClientOrderId::new(),
        );
        broker.submit_order(sell).await.unwrap();

        let feed = broker.broker_positions().await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].qty, 6);
        assert_eq!(feed[0].side, Direction::Long);
        assert_eq!(feed[0].current_price, Price::new(dec!(190)));

        broker.drop_position("aapl");
        assert!(broker.broker_positions().await.unwrap().is_empty());
    }
}
