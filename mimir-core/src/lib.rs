//! Mimir Core - Multi-Venue Trading Engine
//!
//! Mimir accepts client order intents, enforces pre- and post-trade risk
//! controls, routes orders across venues with a scoring-based smart
//! router, tracks positions and cash, reconciles local state against
//! each venue, and journals every state change to a write-ahead log so
//! that a crash loses nothing committed.
//!
//! ## Core Modules
//! - `core`: order grammar and shared types (sides, statuses, venues,
//!   requests, reports, rejection reasons)
//! - `oms`: order & position core - order store, balance ledger,
//!   position book and the binary WAL behind them
//! - `exec`: exchange adapters, aggregated books, latency tracking,
//!   coordinator and smart order router
//! - `recon`: the reconciliation loop and strategy-freeze interlock
//! - `risk`: admission checks, VaR, stress scenarios, dynamic thresholds
//! - `engine`: risk -> core -> event-stream wiring and the simulator
//!   fill pump
//! - `config`: serde configuration types
//!
//! ## Layering
//! The WAL sits at the bottom with no upward dependencies; the order
//! store, ledger and position book build on it; the coordinator uses
//! adapters, books and latency; the router uses the coordinator; risk
//! uses positions; reconciliation uses the store plus the adapter query
//! interface and the freeze hook.

pub mod config;
pub mod core;
pub mod engine;
pub mod exec;
pub mod oms;
pub mod recon;
pub mod risk;
pub mod testing;
pub mod utils;

// Re-export the working set
pub use crate::core::{
    CancelOrderRequest, CoreError, ExecutionReport, Fill, Instrument, OrderStatus, OrderType,
    PlaceOrderRequest, RejectReason, Side, Symbol, TimeInForce, Venue, WalError,
};
pub use engine::{Engine, EventEmitter};
pub use exec::{ExchangeAdapter, ExchangeCoordinator, SmartOrderRouter};
pub use oms::{OrderCore, OrderStore, OrderWal};
pub use recon::Reconciler;
pub use risk::RiskEngine;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, ReconciliationConfig, RiskConfig, WalConfig};
    pub use crate::core::{
        CancelOrderRequest, Instrument, OrderStatus, PlaceOrderRequest, RejectReason, Side,
        Symbol, Venue,
    };
    pub use crate::engine::{Engine, EventEmitter};
    pub use crate::exec::{ExchangeAdapter, ExchangeCoordinator, RoutingDecision, SmartOrderRouter};
    pub use crate::oms::{CancelDecision, OrderCore, PlaceDecision};
    pub use crate::recon::Reconciler;
    pub use crate::risk::RiskEngine;
    pub use crate::utils::{init_logger, now_ns};
}
