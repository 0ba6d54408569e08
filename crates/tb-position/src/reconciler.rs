//! Local book vs broker position reconciliation.
//!
//! Report-only: inputs are borrowed immutably and nothing is corrected.
//! Every ticker in the union of both sides lands in exactly one bucket:
//!
//! | bucket      | condition                          | severity   |
//! |-------------|------------------------------------|------------|
//! | matched     | same qty, direction, price in band | -          |
//! | ghosts      | local only                         | critical   |
//! | orphaned    | broker only                        | high       |
//! | mismatched  | qty or direction disagree          | high       |
//! | mismatched  | price drift above threshold        | medium     |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use tb_core::{Direction, Position, Price};

/// One position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: u32,
    pub side: Direction,
    pub current_price: Price,
}

/// Mismatch classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    Ghost,
    Orphaned,
    QtyMismatch,
    PriceDrift,
}

impl MismatchKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Ghost => Severity::Critical,
            Self::Orphaned | Self::QtyMismatch => Severity::High,
            Self::PriceDrift => Severity::Medium,
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ghost => write!(f, "ghost"),
            Self::Orphaned => write!(f, "orphaned"),
            Self::QtyMismatch => write!(f, "qty_mismatch"),
            Self::PriceDrift => write!(f, "price_drift"),
        }
    }
}

/// Ordered so that `max()` yields the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionMismatch {
    pub ticker: String,
    pub kind: MismatchKind,
    pub severity: Severity,
    pub local_qty: Option<u32>,
    pub broker_qty: Option<u32>,
    pub local_direction: Option<Direction>,
    pub broker_direction: Option<Direction>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub matched: Vec<String>,
    pub ghosts: Vec<PositionMismatch>,
    pub orphaned: Vec<PositionMismatch>,
    pub mismatched: Vec<PositionMismatch>,
    pub timestamp: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.ghosts.is_empty() && self.orphaned.is_empty() && self.mismatched.is_empty()
    }

    /// All mismatches, ghosts first.
    pub fn mismatches(&self) -> impl Iterator<Item = &PositionMismatch> {
        self.ghosts
            .iter()
            .chain(self.orphaned.iter())
            .chain(self.mismatched.iter())
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.mismatches().map(|m| m.severity).max()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Relative price difference tolerated before flagging drift.
    #[serde(default = "default_price_drift_pct")]
    pub price_drift_pct: Decimal,
}

fn default_price_drift_pct() -> Decimal {
    Decimal::new(5, 2) // 5%
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            price_drift_pct: default_price_drift_pct(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionReconciler {
    config: ReconcilerConfig,
}

impl PositionReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn reconcile(&self, local: &[Position], broker: &[BrokerPosition]) -> ReconciliationReport {
        let local_map: BTreeMap<String, &Position> = local
            .iter()
            .map(|p| (p.ticker.to_ascii_uppercase(), p))
            .collect();
        let broker_map: BTreeMap<String, &BrokerPosition> = broker
            .iter()
            .map(|b| (b.symbol.to_ascii_uppercase(), b))
            .collect();
        let tickers: BTreeSet<&String> = local_map.keys().chain(broker_map.keys()).collect();

        let mut report = ReconciliationReport {
            matched: Vec::new(),
            ghosts: Vec::new(),
            orphaned: Vec::new(),
            mismatched: Vec::new(),
            timestamp: Utc::now(),
        };

        for ticker in tickers {
            match (local_map.get(ticker).copied(), broker_map.get(ticker).copied()) {
                (Some(l), None) => report.ghosts.push(mismatch(
                    ticker,
                    MismatchKind::Ghost,
                    Some(l),
                    None,
                    format!("local {} {} not confirmed by broker", l.direction, l.shares),
                )),
                (None, Some(b)) => report.orphaned.push(mismatch(
                    ticker,
                    MismatchKind::Orphaned,
                    None,
                    Some(b),
                    format!("broker {} {} not tracked locally", b.side, b.qty),
                )),
                (Some(l), Some(b)) => {
                    if l.shares != b.qty || l.direction != b.side {
                        report.mismatched.push(mismatch(
                            ticker,
                            MismatchKind::QtyMismatch,
                            Some(l),
                            Some(b),
                            format!(
                                "local {} {} vs broker {} {}",
                                l.direction, l.shares, b.side, b.qty
                            ),
                        ));
                    } else if let Some(drift) = self.drift(l.current_price, b.current_price) {
                        report.mismatched.push(mismatch(
                            ticker,
                            MismatchKind::PriceDrift,
                            Some(l),
                            Some(b),
                            format!(
                                "local price {} vs broker {} (drift {:.4})",
                                l.current_price, b.current_price, drift
                            ),
                        ));
                    } else {
                        report.matched.push(ticker.clone());
                    }
                }
                (None, None) => {}
            }
        }

        log_report(&report);
        report
    }

    /// Relative drift when it exceeds the threshold.
    fn drift(&self, local: Price, broker: Price) -> Option<Decimal> {
        let drift = broker.frac_from(local)?.abs();
        (drift > self.config.price_drift_pct).then_some(drift)
    }
}

fn mismatch(
    ticker: &str,
    kind: MismatchKind,
    local: Option<&Position>,
    broker: Option<&BrokerPosition>,
    detail: String,
) -> PositionMismatch {
    PositionMismatch {
        ticker: ticker.to_string(),
        kind,
        severity: kind.severity(),
        local_qty: local.map(|p| p.shares),
        broker_qty: broker.map(|b| b.qty),
        local_direction: local.map(|p| p.direction),
        broker_direction: broker.map(|b| b.side),
        detail,
    }
}

fn log_report(report: &ReconciliationReport) {
    for m in report.mismatches() {
        if m.severity == Severity::Critical {
            error!(ticker = %m.ticker, kind = %m.kind, detail = %m.detail, "Reconciliation mismatch");
        } else {
            warn!(ticker = %m.ticker, kind = %m.kind, detail = %m.detail, "Reconciliation mismatch");
        }
    }
    info!(
        matched = report.matched.len(),
        ghosts = report.ghosts.len(),
        orphaned = report.orphaned.len(),
        mismatched = report.mismatched.len(),
        clean = report.is_clean(),
        "Reconciliation complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tb_core::{InstrumentType, TradeSignal};

    fn local(ticker: &str, direction: Direction, shares: u32, price: Decimal) -> Position {
        let stop = match direction {
            Direction::Long => price - dec!(5),
            Direction::Short => price + dec!(5),
        };
        let signal = TradeSignal::new(
            ticker,
            direction,
            "breakout",
            "15m",
            dec!(80),
            Price::new(price),
            Price::new(stop),
        );
        Position::from_fill(
            &signal,
            shares,
            Price::new(price),
            InstrumentType::Stock,
            Decimal::ONE,
            Utc::now(),
        )
        .unwrap()
    }

    fn broker(symbol: &str, side: Direction, qty: u32, price: Decimal) -> BrokerPosition {
        BrokerPosition {
            symbol: symbol.to_string(),
            qty,
            side,
            current_price: Price::new(price),
        }
    }

    #[test]
    fn test_clean_match() {
        let r = PositionReconciler::default().reconcile(
            &[local("AAPL", Direction::Long, 10, dec!(185))],
            &[broker("aapl", Direction::Long, 10, dec!(186))],
        );
        assert!(r.is_clean());
        assert_eq!(r.matched, vec!["AAPL".to_string()]);
        assert_eq!(r.max_severity(), None);
    }

    #[test]
    fn test_partition_covers_every_ticker_once() {
        let locals = vec![
            local("AAPL", Direction::Long, 10, dec!(185)),
            local("MSFT", Direction::Long, 5, dec!(400)),
            local("TSLA", Direction::Short, 3, dec!(250)),
            local("NVDA", Direction::Long, 2, dec!(100)),
        ];
        let brokers = vec![
            broker("AAPL", Direction::Long, 10, dec!(185)),
            broker("TSLA", Direction::Short, 4, dec!(250)),
            broker("NVDA", Direction::Long, 2, dec!(120)),
            broker("AMD", Direction::Long, 7, dec!(160)),
        ];
        let r = PositionReconciler::default().reconcile(&locals, &brokers);

        assert_eq!(r.matched, vec!["AAPL".to_string()]);
        assert_eq!(r.ghosts.len(), 1);
        assert_eq!(r.ghosts[0].ticker, "MSFT");
        assert_eq!(r.ghosts[0].severity, Severity::Critical);
        assert_eq!(r.orphaned.len(), 1);
        assert_eq!(r.orphaned[0].ticker, "AMD");
        assert_eq!(r.orphaned[0].severity, Severity::High);

        let kinds: Vec<_> = r.mismatched.iter().map(|m| (m.ticker.as_str(), m.kind)).collect();
        assert_eq!(
            kinds,
            vec![("NVDA", MismatchKind::PriceDrift), ("TSLA", MismatchKind::QtyMismatch)]
        );

        let mut seen: Vec<String> = r.matched.clone();
        seen.extend(r.mismatches().map(|m| m.ticker.clone()));
        seen.sort();
        assert_eq!(seen, vec!["AAPL", "AMD", "MSFT", "NVDA", "TSLA"]);
        assert!(!r.is_clean());
        assert_eq!(r.max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_direction_disagreement_is_qty_mismatch() {
        let r = PositionReconciler::default().reconcile(
            &[local("AAPL", Direction::Long, 10, dec!(185))],
            &[broker("AAPL", Direction::Short, 10, dec!(185))],
        );
        assert_eq!(r.mismatched[0].kind, MismatchKind::QtyMismatch);
        assert_eq!(r.mismatched[0].severity, Severity::High);
    }

    #[test]
    fn test_drift_threshold_configurable() {
        let locals = [local("AAPL", Direction::Long, 10, dec!(100))];
        let brokers = [broker("AAPL", Direction::Long, 10, dec!(103))];
        assert!(PositionReconciler::default()
            .reconcile(&locals, &brokers)
            .is_clean());

        let tight = PositionReconciler::new(ReconcilerConfig {
            price_drift_pct: dec!(0.02),
        });
        let r = tight.reconcile(&locals, &brokers);
        assert_eq!(r.mismatched[0].kind, MismatchKind::PriceDrift);
        assert_eq!(r.mismatched[0].severity, Severity::Medium);
    }

    #[test]
    fn test_empty_sides() {
        let r = PositionReconciler::default().reconcile(&[], &[]);
        assert!(r.is_clean());
        assert!(r.matched.is_empty());
    }

    #[test]
    fn test_broker_record_deserializes() {
        let json = r#"[{"symbol":"SPY","qty":3,"side":"short","current_price":"512.25"}]"#;
        let feed: Vec<BrokerPosition> = serde_json::from_str(json).unwrap();
        assert_eq!(feed[0].side, Direction::Short);
        assert_eq!(feed[0].current_price, Price::new(dec!(512.25)));
    }
}
