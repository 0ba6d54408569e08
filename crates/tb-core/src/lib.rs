//! Core domain types for the trade execution core.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`: Precision-safe decimal price
//! - `TradeSignal`, `SignalKey`: Inbound signals and their dedup identity
//! - `Position`: Open position owned by the orchestrator's book
//! - `Order`, `OrderResult`: Broker-facing order types
//! - `AccountState`: Caller-supplied account snapshot
//! - `Clock`: Injectable time source
//! - `SessionHours`: Regular-session checks in exchange time

pub mod account;
pub mod clock;
pub mod decimal;
pub mod error;
pub mod order;
pub mod position;
pub mod signal;
pub mod trading_session;

pub use account::AccountState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::Price;
pub use error::{CoreError, Result};
pub use order::{
    ClientOrderId, Direction, Order, OrderResult, OrderSide, OrderStatus, OrderType, TimeInForce,
};
pub use position::{InstrumentType, Position};
pub use signal::{
    Bar, CloudBand, CloudState, SignalKey, TradeSignal, TradeType, INSTRUMENT_HINT_KEY,
};
pub use trading_session::{parse_hhmm, SessionHours};
