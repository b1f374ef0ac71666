//! Authoritative order record store.
//!
//! One record per client order id. Updates pass a strict monotonic
//! timestamp guard, terminal statuses are sticky, and fills maintain the
//! cumulative quantity / VWAP pair. Readers always receive snapshots.

use crate::core::{
    CoreError, OrderStatus, PlaceOrderRequest, Side, Symbol, QTY_EPSILON,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Point-in-time state of one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Option<Side>,
    pub order_qty: Option<f64>,
    pub limit_price: Option<f64>,
    pub executed_qty: f64,
    pub avg_price: f64,
    pub venue_order_id: String,
    pub status: OrderStatus,
    pub reason: String,
    pub last_ts_ns: i64,
    pub created_ts_ns: i64,
}

impl Order {
    fn blank(client_order_id: &str) -> Self {
        Self {
            client_order_id: client_order_id.to_string(),
            symbol: Symbol::new(""),
            side: None,
            order_qty: None,
            limit_price: None,
            executed_qty: 0.0,
            avg_price: 0.0,
            venue_order_id: String::new(),
            status: OrderStatus::New,
            reason: String::new(),
            last_ts_ns: 0,
            created_ts_ns: 0,
        }
    }

    pub fn remaining_qty(&self) -> f64 {
        self.order_qty.map_or(0.0, |q| q - self.executed_qty)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Thread-safe order record store keyed by client order id
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the static parameters of an order. Creation timestamp is
    /// set once and kept on re-notes (replay).
    pub fn note_order_params(&self, request: &PlaceOrderRequest, now_ns: i64) {
        if request.client_order_id.is_empty() {
            return;
        }
        let mut orders = self.orders.write();
        let order = orders
            .entry(request.client_order_id.clone())
            .or_insert_with(|| Order::blank(&request.client_order_id));
        if !request.symbol.is_empty() {
            order.symbol = request.symbol.clone();
        }
        order.side = Some(request.side);
        if request.qty > 0.0 {
            order.order_qty = Some(request.qty);
        }
        if let Some(price) = request.price {
            if price > 0.0 {
                order.limit_price = Some(price);
            }
        }
        if order.created_ts_ns == 0 {
            order.created_ts_ns = now_ns;
        }
    }

    /// Apply a status update. Returns true when the update was applied.
    ///
    /// Updates with `ts_ns <= last_ts_ns` are discarded. A terminal order
    /// only accepts later updates carrying the same terminal status;
    /// every other transition is a no-op.
    pub fn apply_order_update(
        &self,
        client_order_id: &str,
        venue_order_id: &str,
        status: OrderStatus,
        reason: &str,
        ts_ns: i64,
    ) -> bool {
        if client_order_id.is_empty() {
            return false;
        }
        let mut orders = self.orders.write();
        let order = orders
            .entry(client_order_id.to_string())
            .or_insert_with(|| Order::blank(client_order_id));

        if ts_ns <= order.last_ts_ns {
            warn!(
                client_order_id,
                ts_ns,
                last_ts_ns = order.last_ts_ns,
                "discarding stale order update"
            );
            return false;
        }
        if order.status.is_terminal() && status != order.status {
            return false;
        }

        if !venue_order_id.is_empty() {
            order.venue_order_id = venue_order_id.to_string();
        }
        order.status = status;
        if !reason.is_empty() {
            order.reason = reason.to_string();
        }
        order.last_ts_ns = ts_ns;
        true
    }

    /// Apply a fill of `qty` at `price`. Returns Ok(true) when applied,
    /// Ok(false) when discarded (terminal order, stale timestamp or
    /// non-positive quantity). A fill that would push the cumulative
    /// quantity past the order quantity is an accounting violation and
    /// fatal.
    pub fn apply_fill(
        &self,
        client_order_id: &str,
        symbol: &Symbol,
        qty: f64,
        price: f64,
        ts_ns: i64,
    ) -> Result<bool, CoreError> {
        if client_order_id.is_empty() || qty <= 0.0 {
            return Ok(false);
        }
        let mut orders = self.orders.write();
        let order = orders
            .entry(client_order_id.to_string())
            .or_insert_with(|| Order::blank(client_order_id));

        if ts_ns <= order.last_ts_ns {
            warn!(client_order_id, ts_ns, "discarding stale fill");
            return Ok(false);
        }
        if order.status.is_terminal() {
            warn!(
                client_order_id,
                status = %order.status,
                "discarding fill on terminal order"
            );
            return Ok(false);
        }

        if !symbol.is_empty() {
            order.symbol = symbol.clone();
        }

        let new_cum = order.executed_qty + qty;
        if let Some(order_qty) = order.order_qty {
            if new_cum > order_qty + QTY_EPSILON {
                return Err(CoreError::InvariantViolation(format!(
                    "fill of {} on {} exceeds order qty {} (cum {})",
                    qty, client_order_id, order_qty, order.executed_qty
                )));
            }
        }

        let notional = order.avg_price * order.executed_qty + price * qty;
        order.executed_qty = new_cum;
        order.avg_price = if new_cum > 0.0 { notional / new_cum } else { 0.0 };
        order.last_ts_ns = ts_ns;

        if let Some(order_qty) = order.order_qty {
            if order.executed_qty + QTY_EPSILON >= order_qty {
                order.status = OrderStatus::Filled;
            } else {
                order.status = OrderStatus::PartiallyFilled;
            }
        } else if order.executed_qty > 0.0 {
            order.status = OrderStatus::PartiallyFilled;
        }
        Ok(true)
    }

    /// Directly restore a full record (checkpoint replay).
    pub(crate) fn restore(&self, order: Order) {
        if order.client_order_id.is_empty() {
            return;
        }
        let mut orders = self.orders.write();
        orders.insert(order.client_order_id.clone(), order);
    }

    pub fn get(&self, client_order_id: &str) -> Option<Order> {
        self.orders.read().get(client_order_id).cloned()
    }

    pub fn contains(&self, client_order_id: &str) -> bool {
        self.orders.read().contains_key(client_order_id)
    }

    pub fn list(&self) -> Vec<Order> {
        self.orders.read().values().cloned().collect()
    }

    pub fn list_pending(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect()
    }

    pub fn list_terminal(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.is_terminal())
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.orders.read().len()
    }

    pub fn count_pending(&self) -> usize {
        self.orders.read().values().filter(|o| !o.is_terminal()).count()
    }

    pub fn count_terminal(&self) -> usize {
        self.orders.read().values().filter(|o| o.is_terminal()).count()
    }

    pub fn clear(&self) {
        self.orders.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;
    use approx::assert_relative_eq;

    fn note(store: &OrderStore, id: &str, qty: f64, price: f64) {
        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, qty, price, id);
        store.note_order_params(&req, 1);
    }

    #[test]
    fn test_note_sets_params_once() {
        let store = OrderStore::new();
        note(&store, "o1", 1.0, 50_000.0);
        let order = store.get("o1").unwrap();
        assert_eq!(order.order_qty, Some(1.0));
        assert_eq!(order.limit_price, Some(50_000.0));
        assert_eq!(order.created_ts_ns, 1);
        assert_eq!(order.status, OrderStatus::New);

        // Re-noting keeps the original creation timestamp
        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "o1");
        store.note_order_params(&req, 99);
        assert_eq!(store.get("o1").unwrap().created_ts_ns, 1);
    }

    #[test]
    fn test_update_monotonic_guard() {
        let store = OrderStore::new();
        note(&store, "o1", 1.0, 50_000.0);
        assert!(store.apply_order_update("o1", "v1", OrderStatus::Accepted, "", 100));
        // Same timestamp is a no-op
        assert!(!store.apply_order_update("o1", "", OrderStatus::Canceled, "", 100));
        // Older timestamp is a no-op
        assert!(!store.apply_order_update("o1", "", OrderStatus::Canceled, "", 50));
        assert_eq!(store.get("o1").unwrap().status, OrderStatus::Accepted);
    }

    #[test]
    fn test_terminal_status_sticky() {
        let store = OrderStore::new();
        note(&store, "o1", 1.0, 50_000.0);
        assert!(store.apply_order_update("o1", "", OrderStatus::Canceled, "user", 100));
        // A later non-terminal transition does not resurrect the order
        assert!(!store.apply_order_update("o1", "", OrderStatus::Accepted, "", 200));
        assert_eq!(store.get("o1").unwrap().status, OrderStatus::Canceled);
        // A later update in the same terminal category is accepted
        assert!(store.apply_order_update("o1", "v9", OrderStatus::Canceled, "late", 300));
        assert_eq!(store.get("o1").unwrap().venue_order_id, "v9");
    }

    #[test]
    fn test_fill_vwap_arithmetic() {
        let store = OrderStore::new();
        note(&store, "o1", 1.0, 50_000.0);
        let sym = Symbol::from("BTCUSDT");

        assert!(store.apply_fill("o1", &sym, 0.4, 50_000.0, 100).unwrap());
        let order = store.get("o1").unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_relative_eq!(order.executed_qty, 0.4);
        assert_relative_eq!(order.avg_price, 50_000.0);

        assert!(store.apply_fill("o1", &sym, 0.6, 51_000.0, 200).unwrap());
        let order = store.get("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_relative_eq!(order.executed_qty, 1.0);
        // (0.4*50000 + 0.6*51000) / 1.0
        assert_relative_eq!(order.avg_price, 50_600.0);
    }

    #[test]
    fn test_fill_on_filled_order_discarded() {
        let store = OrderStore::new();
        note(&store, "o1", 1.0, 50_000.0);
        let sym = Symbol::from("BTCUSDT");
        assert!(store.apply_fill("o1", &sym, 1.0, 50_000.0, 100).unwrap());
        assert_eq!(store.get("o1").unwrap().status, OrderStatus::Filled);

        assert!(!store.apply_fill("o1", &sym, 0.1, 50_000.0, 200).unwrap());
        assert_relative_eq!(store.get("o1").unwrap().executed_qty, 1.0);
    }

    #[test]
    fn test_overfill_is_fatal() {
        let store = OrderStore::new();
        note(&store, "o1", 1.0, 50_000.0);
        let sym = Symbol::from("BTCUSDT");
        assert!(store.apply_fill("o1", &sym, 0.9, 50_000.0, 100).unwrap());
        let err = store.apply_fill("o1", &sym, 0.5, 50_000.0, 200);
        assert!(err.is_err());
    }

    #[test]
    fn test_pending_terminal_partition() {
        let store = OrderStore::new();
        note(&store, "a", 1.0, 50_000.0);
        note(&store, "b", 1.0, 50_000.0);
        store.apply_order_update("a", "", OrderStatus::Accepted, "", 10);
        store.apply_order_update("b", "", OrderStatus::Rejected, "size_limit", 10);

        let pending = store.list_pending();
        let terminal = store.list_terminal();
        assert_eq!(pending.len(), 1);
        assert_eq!(terminal.len(), 1);
        assert_eq!(pending.len() + terminal.len(), store.list().len());
        assert_eq!(store.count_pending(), 1);
        assert_eq!(store.count_terminal(), 1);
    }

    #[test]
    fn test_duplicate_ids_share_one_record() {
        let store = OrderStore::new();
        note(&store, "dup", 1.0, 50_000.0);
        note(&store, "dup", 2.0, 51_000.0);
        assert_eq!(store.count(), 1);
    }
}
