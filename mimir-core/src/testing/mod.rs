//! Test doubles shared across module tests.
//!
//! `MockAdapter` is a scripted venue: order entry responds according to
//! its configured mode, and the reconciliation-query side serves a
//! programmable list of venue-truth reports.

use crate::core::{
    CancelOrderRequest, ExecutionReport, OrderStatus, PlaceOrderRequest, Symbol, Venue,
};
use crate::exec::adapter::{ExchangeAdapter, ReconciliationQuery};
use crate::utils::now_ns;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
enum ReplyMode {
    /// Fill the full quantity at the given price (or the request price)
    Fill(Option<f64>),
    /// Report Rejected
    Reject,
    /// Return no report at all (transport failure / timeout)
    Silent,
}

/// Scripted exchange adapter for tests
pub struct MockAdapter {
    venue: Venue,
    name: String,
    connected: AtomicBool,
    mode: Mutex<ReplyMode>,
    venue_order_counter: AtomicU64,
    place_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    open_orders: Mutex<Vec<ExecutionReport>>,
    cancelled_ids: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            name: venue.as_str().to_string(),
            connected: AtomicBool::new(true),
            mode: Mutex::new(ReplyMode::Fill(None)),
            venue_order_counter: AtomicU64::new(0),
            place_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            open_orders: Mutex::new(Vec::new()),
            cancelled_ids: Mutex::new(Vec::new()),
        }
    }

    /// Fill everything at a fixed price.
    pub fn fill_at(self, price: f64) -> Self {
        *self.mode.lock() = ReplyMode::Fill(Some(price));
        self
    }

    /// Reject every order.
    pub fn reject_all(self) -> Self {
        *self.mode.lock() = ReplyMode::Reject;
        self
    }

    /// Return no execution report at all.
    pub fn no_reports(self) -> Self {
        *self.mode.lock() = ReplyMode::Silent;
        self
    }

    /// Script an open order served by the reconciliation query side.
    pub fn script_open_order(&self, report: ExecutionReport) {
        self.open_orders.lock().push(report);
    }

    pub fn clear_open_orders(&self) {
        self.open_orders.lock().clear();
    }

    pub fn place_count(&self) -> usize {
        self.place_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Ids cancelled through the reconciliation-query interface.
    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled_ids.lock().clone()
    }

    fn next_venue_order_id(&self) -> String {
        let n = self.venue_order_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", self.name, n)
    }
}

impl ExchangeAdapter for MockAdapter {
    fn place_order(&self, request: &PlaceOrderRequest) -> Option<ExecutionReport> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        let ts = now_ns();
        match mode {
            ReplyMode::Fill(price) => Some(ExecutionReport {
                symbol: request.symbol.clone(),
                client_order_id: request.client_order_id.clone(),
                venue_order_id: self.next_venue_order_id(),
                status: OrderStatus::Filled,
                last_fill_qty: request.qty,
                last_fill_price: price.or(request.price).unwrap_or(0.0),
                ts_exchange_ns: ts,
                ts_recv_ns: ts,
            }),
            ReplyMode::Reject => Some(ExecutionReport {
                symbol: request.symbol.clone(),
                client_order_id: request.client_order_id.clone(),
                venue_order_id: String::new(),
                status: OrderStatus::Rejected,
                last_fill_qty: 0.0,
                last_fill_price: 0.0,
                ts_exchange_ns: ts,
                ts_recv_ns: ts,
            }),
            ReplyMode::Silent => None,
        }
    }

    fn cancel_order(&self, request: &CancelOrderRequest) -> Option<ExecutionReport> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let ts = now_ns();
        Some(ExecutionReport {
            symbol: request.symbol.clone(),
            client_order_id: request.client_order_id.clone(),
            venue_order_id: String::new(),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: ts,
            ts_recv_ns: ts,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "mock-1.0"
    }
}

#[async_trait]
impl ReconciliationQuery for MockAdapter {
    async fn query_open_orders(&self, symbol: &Symbol) -> Vec<ExecutionReport> {
        self.open_orders
            .lock()
            .iter()
            .filter(|r| &r.symbol == symbol)
            .cloned()
            .collect()
    }

    async fn query_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> Option<ExecutionReport> {
        self.open_orders
            .lock()
            .iter()
            .find(|r| &r.symbol == symbol && r.client_order_id == client_order_id)
            .cloned()
    }

    async fn query_orders(
        &self,
        symbol: &Symbol,
        _start_time_ms: i64,
        _end_time_ms: i64,
    ) -> Vec<ExecutionReport> {
        self.open_orders
            .lock()
            .iter()
            .filter(|r| &r.symbol == symbol)
            .cloned()
            .collect()
    }

    async fn cancel_order(
        &self,
        symbol: &Symbol,
        client_order_id: &str,
    ) -> Option<ExecutionReport> {
        self.cancelled_ids.lock().push(client_order_id.to_string());
        let ts = now_ns();
        Some(ExecutionReport {
            symbol: symbol.clone(),
            client_order_id: client_order_id.to_string(),
            venue_order_id: String::new(),
            status: OrderStatus::Canceled,
            last_fill_qty: 0.0,
            last_fill_price: 0.0,
            ts_exchange_ns: ts,
            ts_recv_ns: ts,
        })
    }
}

/// Execution report builder used by reconciliation tests.
pub fn venue_report(
    symbol: &str,
    client_order_id: &str,
    status: OrderStatus,
    fill_qty: f64,
    fill_price: f64,
    ts_ns: i64,
) -> ExecutionReport {
    ExecutionReport {
        symbol: Symbol::from(symbol),
        client_order_id: client_order_id.to_string(),
        venue_order_id: format!("venue-{}", client_order_id),
        status,
        last_fill_qty: fill_qty,
        last_fill_price: fill_price,
        ts_exchange_ns: ts_ns,
        ts_recv_ns: ts_ns,
    }
}
