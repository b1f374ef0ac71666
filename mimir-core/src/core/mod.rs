//! Core order grammar and shared types.
//!
//! Everything that crosses a subsystem boundary lives here: sides, order
//! types, statuses, venues, symbols, order requests, execution reports
//! and the enumerated rejection reasons.

pub mod errors;
pub mod types;

pub use errors::{CoreError, RejectReason, WalError};
pub use types::{
    CancelOrderRequest, ExecutionReport, Fill, Instrument, OrderStatus, OrderType,
    PlaceOrderRequest, Side, Symbol, TimeInForce, Venue, QTY_EPSILON,
};
