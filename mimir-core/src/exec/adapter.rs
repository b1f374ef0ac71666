//! Venue adapter interfaces.
//!
//! Network I/O, signing and venue rate-limit handling live behind these
//! traits; the core never performs venue I/O itself. Adapters are shared
//! across threads and expected to serialize access to their underlying
//! connection. A timed-out call surfaces as `None` and is logged by the
//! caller; it is a failure, not a silent drop.

use crate::core::{CancelOrderRequest, ExecutionReport, PlaceOrderRequest, Symbol};
use async_trait::async_trait;

/// Synchronous order-entry interface presented by every venue adapter.
pub trait ExchangeAdapter: Send + Sync {
    /// Place an order. `None` means no report was obtained (timeout or
    /// transport failure after the adapter's own retries).
    fn place_order(&self, request: &PlaceOrderRequest) -> Option<ExecutionReport>;

    /// Cancel an order.
    fn cancel_order(&self, request: &CancelOrderRequest) -> Option<ExecutionReport>;

    fn is_connected(&self) -> bool;
    fn connect(&self);
    fn disconnect(&self);

    /// Stable adapter name (e.g. "binance").
    fn name(&self) -> &str;
    /// Stable adapter version string.
    fn version(&self) -> &str;
}

/// Asynchronous query interface used by the reconciliation loop.
#[async_trait]
pub trait ReconciliationQuery: Send + Sync {
    /// Open orders currently reported by the venue for a symbol.
    async fn query_open_orders(&self, symbol: &Symbol) -> Vec<ExecutionReport>;

    /// A single order looked up by client order id.
    async fn query_order(&self, symbol: &Symbol, client_order_id: &str)
        -> Option<ExecutionReport>;

    /// Orders within a wall-clock window (milliseconds).
    async fn query_orders(
        &self,
        symbol: &Symbol,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Vec<ExecutionReport>;

    /// Cancel an order on the venue (orphan cleanup).
    async fn cancel_order(&self, symbol: &Symbol, client_order_id: &str)
        -> Option<ExecutionReport>;
}
