//! Order & Position Core.
//!
//! The authoritative in-memory state for open orders, fills, reserved
//! balances and per-venue positions, journaled through a write-ahead log
//! so that a crash loses nothing committed.
//!
//! Layering, leaves first: the WAL has no upward dependencies; the order
//! store, balance ledger and position book depend only on core types;
//! [`OrderCore`] composes all of them behind one atomic operation set.

pub mod core;
pub mod ledger;
pub mod positions;
pub mod store;
pub mod wal;

pub use self::core::{CancelDecision, OrderCore, PendingReservation, PlaceDecision};
pub use ledger::{Balance, BalanceLedger};
pub use positions::{
    AggregatedPosition, CostBasis, DiscrepancyCallback, PositionBook, PositionDiscrepancy,
    VenuePosition,
};
pub use store::{Order, OrderStore};
pub use wal::{OrderWal, WalEntryType, WalStats, WAL_HEADER_LEN, WAL_MAGIC, WAL_VERSION};
