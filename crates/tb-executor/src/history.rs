//! Execution records and the bounded execution history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tb_core::{ClientOrderId, Direction, OrderResult, Position, Price};

/// Result of a full or partial close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPosition {
    /// The closed portion only; `shares` is the closed quantity.
    pub position: Position,
    pub exit_price: Price,
    pub realized_pnl: Price,
    pub reason: String,
    pub exit_time: DateTime<Utc>,
    /// True when part of the position remains open.
    pub partial: bool,
    /// Exit order result, when exit orders are submitted.
    pub order_result: Option<OrderResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub kind: ExecutionKind,
    pub ticker: String,
    pub direction: Direction,
    pub quantity: u32,
    pub price: Price,
    pub signal_id: ClientOrderId,
    pub order_id: Option<String>,
    /// Exits only.
    pub realized_pnl: Option<Price>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn entry(position: &Position, qty: u32, price: Price, order: &OrderResult) -> Self {
        Self {
            kind: ExecutionKind::Entry,
            ticker: position.ticker.clone(),
            direction: position.direction,
            quantity: qty,
            price,
            signal_id: position.signal_id.clone(),
            order_id: Some(order.order_id.clone()),
            realized_pnl: None,
            reason: "entry".to_string(),
            timestamp: order.timestamp,
        }
    }

    pub fn exit(closed: &ClosedPosition) -> Self {
        Self {
            kind: ExecutionKind::Exit,
            ticker: closed.position.ticker.clone(),
            direction: closed.position.direction,
            quantity: closed.position.shares,
            price: closed.exit_price,
            signal_id: closed.position.signal_id.clone(),
            order_id: closed.order_result.as_ref().map(|r| r.order_id.clone()),
            realized_pnl: Some(closed.realized_pnl),
            reason: closed.reason.clone(),
            timestamp: closed.exit_time,
        }
    }
}

/// Fixed-capacity ring buffer; the oldest record is evicted first.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    capacity: usize,
    records: VecDeque<ExecutionRecord>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: ExecutionRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<ExecutionRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(n: u32) -> ExecutionRecord {
        ExecutionRecord {
            kind: ExecutionKind::Entry,
            ticker: format!("T{n}"),
            direction: Direction::Long,
            quantity: n,
            price: Price::new(dec!(10)),
            signal_id: ClientOrderId::from(format!("sig-{n}")),
            order_id: None,
            realized_pnl: None,
            reason: "entry".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut h = ExecutionHistory::new(3);
        for n in 1..=5 {
            h.push(record(n));
        }
        assert_eq!(h.len(), 3);
        let tickers: Vec<_> = h.to_vec().into_iter().map(|r| r.ticker).collect();
        assert_eq!(tickers, vec!["T3", "T4", "T5"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut h = ExecutionHistory::new(0);
        h.push(record(1));
        h.push(record(2));
        assert_eq!(h.capacity(), 1);
        assert_eq!(h.to_vec()[0].ticker, "T2");
    }
}
