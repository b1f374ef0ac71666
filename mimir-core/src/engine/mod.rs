//! Engine facade: risk admission in front of the order core, with every
//! outcome mirrored to the JSON event stream.
//!
//! Flow per intent: risk admission first; on accept the core reserves,
//! journals and records the order; every response emits exactly one
//! order_update event. The simulator fill pump drains due reservations,
//! fills at the limit price (or the last observed market price) and
//! emits fill, order_state and account events.

pub mod events;

pub use events::EventEmitter;

use crate::core::{
    CancelOrderRequest, CoreError, Fill, PlaceOrderRequest, RejectReason, Symbol, Venue,
};
use crate::oms::core::{CancelDecision, OrderCore, PlaceDecision};
use crate::risk::engine::{RiskDecision, RiskEngine, RiskSignal};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Order engine wiring risk, core state and event output together
pub struct Engine {
    core: Arc<OrderCore>,
    risk: Arc<RiskEngine>,
    emitter: Arc<EventEmitter>,
    last_prices: RwLock<HashMap<String, f64>>,
}

impl Engine {
    pub fn new(core: Arc<OrderCore>, risk: Arc<RiskEngine>, emitter: Arc<EventEmitter>) -> Self {
        Self {
            core,
            risk,
            emitter,
            last_prices: RwLock::new(HashMap::new()),
        }
    }

    pub fn core(&self) -> &Arc<OrderCore> {
        &self.core
    }

    pub fn risk(&self) -> &Arc<RiskEngine> {
        &self.risk
    }

    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    /// Handle a place intent: risk admission, then the core's atomic
    /// place; exactly one order_update event either way.
    pub fn handle_place(
        &self,
        request: &PlaceOrderRequest,
        now_ns: i64,
    ) -> Result<PlaceDecision, CoreError> {
        let decision = match self.risk.check_pre_trade(request) {
            RiskDecision::Allowed => self.core.place(request, now_ns)?,
            RiskDecision::Rejected(reason) => {
                info!(
                    client_order_id = %request.client_order_id,
                    reason = %reason,
                    "risk rejected order"
                );
                self.core.reject_order(request, reason, now_ns)?
            }
        };

        match &decision {
            PlaceDecision::Accepted { venue_order_id, .. } => {
                self.emitter.emit_order_update(
                    now_ns,
                    &request.client_order_id,
                    venue_order_id,
                    "ACCEPTED",
                    request.symbol.as_str(),
                    request.side.as_str(),
                    Some(request.qty),
                    request.price,
                    "",
                );
            }
            PlaceDecision::Rejected { reason } => {
                self.emitter.emit_order_update(
                    now_ns,
                    &request.client_order_id,
                    "",
                    "REJECTED",
                    request.symbol.as_str(),
                    request.side.as_str(),
                    Some(request.qty),
                    request.price,
                    reason.as_str(),
                );
            }
        }
        Ok(decision)
    }

    /// Handle a cancel intent. Unknown ids still emit an order_update
    /// carrying `unknown_order`.
    pub fn handle_cancel(
        &self,
        request: &CancelOrderRequest,
        now_ns: i64,
    ) -> Result<CancelDecision, CoreError> {
        let decision = self.core.cancel(&request.client_order_id, now_ns)?;
        match &decision {
            CancelDecision::Found { reservation } => {
                self.emitter.emit_order_update(
                    now_ns,
                    &request.client_order_id,
                    "",
                    "CANCELED",
                    reservation.request.symbol.as_str(),
                    reservation.request.side.as_str(),
                    Some(reservation.request.qty),
                    reservation.request.price,
                    "",
                );
            }
            CancelDecision::Missing => {
                self.emitter.emit_order_update(
                    now_ns,
                    &request.client_order_id,
                    "",
                    "REJECTED",
                    request.symbol.as_str(),
                    "",
                    None,
                    None,
                    RejectReason::UnknownOrder.as_str(),
                );
            }
        }
        Ok(decision)
    }

    /// Market tick: updates the risk reference price, marks positions
    /// and emits a market event.
    pub fn on_market(&self, symbol: &Symbol, price: f64, ts_ns: i64) {
        self.last_prices
            .write()
            .insert(symbol.as_str().to_string(), price);
        self.risk.set_reference_price(price);
        self.core.positions().update_mark_price(symbol, price);
        self.emitter.emit_market(symbol.as_str(), price, ts_ns);
    }

    /// Simulator pump: fill every due reservation at its limit price
    /// (market orders at the last observed price). Returns the number
    /// of fills applied.
    pub fn pump_due_fills(&self, now_ns: i64) -> Result<usize, CoreError> {
        let due = self.core.collect_due(now_ns);
        let mut filled = 0;

        for reservation in due {
            let request = &reservation.request;
            let fill_price = request.price.unwrap_or_else(|| {
                self.last_prices
                    .read()
                    .get(request.symbol.as_str())
                    .copied()
                    .unwrap_or(0.0)
            });

            if fill_price <= 0.0 {
                warn!(
                    client_order_id = %request.client_order_id,
                    "no price available for due order, expiring"
                );
                self.core.expire(&reservation, now_ns)?;
                self.emitter.emit_order_update(
                    now_ns,
                    &request.client_order_id,
                    "",
                    "EXPIRED",
                    request.symbol.as_str(),
                    request.side.as_str(),
                    Some(request.qty),
                    None,
                    "",
                );
                continue;
            }

            self.core.apply_fill(&reservation, fill_price, now_ns)?;
            filled += 1;

            self.emitter.emit_fill(&Fill {
                client_order_id: request.client_order_id.clone(),
                symbol: request.symbol.clone(),
                qty: request.qty,
                price: fill_price,
                ts_exchange_ns: now_ns,
                ts_recv_ns: now_ns,
            });
            if let Some(order) = self.core.order(&request.client_order_id) {
                self.emitter.emit_order_state(&order);
            }
            self.emitter.emit_account(now_ns, &self.core.balances());

            self.after_fill(reservation.venue, &request.symbol);
        }
        Ok(filled)
    }

    /// Post-fill bookkeeping: exposure update and post-trade checks.
    fn after_fill(&self, venue: Venue, symbol: &Symbol) {
        if let Some(aggregated) = self.core.positions().aggregated(symbol) {
            self.risk
                .update_position(symbol.as_str(), aggregated.total_size);
        }
        if let Some(position) = self.core.positions().position(venue, symbol) {
            match self.risk.check_post_trade(&position) {
                Some(RiskSignal::StopLoss { symbol, pnl_pct }) => {
                    warn!(symbol = %symbol, pnl_pct, "stop-loss signal");
                }
                Some(RiskSignal::TakeProfit { symbol, pnl_pct }) => {
                    info!(symbol = %symbol, pnl_pct, "take-profit signal");
                }
                None => {}
            }
        }
    }

    /// Emit a full account snapshot.
    pub fn emit_account_snapshot(&self, ts_ns: i64) {
        self.emitter.emit_account(ts_ns, &self.core.balances());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, RiskConfig, WalConfig};
    use crate::core::{Instrument, OrderStatus, Side};
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::io::Write;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn lines(&self) -> Vec<Value> {
            let data = self.0.lock();
            String::from_utf8_lossy(&data)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn engine(dir: &TempDir, usdt: f64, risk_balance: f64) -> (Engine, SharedBuf) {
        let config = EngineConfig {
            wal: WalConfig {
                directory: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let core = Arc::new(OrderCore::new(config).unwrap());
        core.register_instrument(Instrument::new("BTCUSDT", "BTC", "USDT"));
        if usdt > 0.0 {
            core.deposit("USDT", usdt);
        }
        let risk = Arc::new(RiskEngine::new(RiskConfig {
            account_balance: risk_balance,
            max_order_size: 100.0,
            ..Default::default()
        }));
        let buf = SharedBuf::default();
        let emitter = Arc::new(EventEmitter::new(Box::new(buf.clone())));
        (Engine::new(core, risk, emitter), buf)
    }

    #[test]
    fn test_reject_insufficient_funds_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (engine, buf) = engine(&dir, 1000.0, 1000.0);

        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 0.1, 50_000.0, "o1");
        let decision = engine.handle_place(&req, 100).unwrap();
        assert!(matches!(
            decision,
            PlaceDecision::Rejected {
                reason: RejectReason::InsufficientFunds
            }
        ));

        // Balance unchanged
        let usdt = engine.core().balance("USDT");
        assert_relative_eq!(usdt.free, 1000.0);
        assert_relative_eq!(usdt.locked, 0.0);

        // One REJECTED order_update event
        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "order_update");
        assert_eq!(lines[0]["status"], "REJECTED");
        assert_eq!(lines[0]["reason"], "insufficient_funds");

        // One OrderUpdate WAL entry
        assert_eq!(engine.core().wal_stats().entries_written, 1);
    }

    #[test]
    fn test_accept_reserve_fill_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (engine, buf) = engine(&dir, 100_000.0, 100_000.0);

        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "o1");
        let decision = engine.handle_place(&req, 0).unwrap();
        assert!(decision.is_accepted());

        let usdt = engine.core().balance("USDT");
        assert_relative_eq!(usdt.free, 50_000.0);
        assert_relative_eq!(usdt.locked, 50_000.0);

        // Pump past the due-fill deadline; simulator fills at the limit
        let fill_delay = EngineConfig::default().fill_delay_ns;
        let filled = engine.pump_due_fills(fill_delay).unwrap();
        assert_eq!(filled, 1);

        let usdt = engine.core().balance("USDT");
        assert_relative_eq!(usdt.free, 50_000.0);
        assert_relative_eq!(usdt.locked, 0.0);
        let btc = engine.core().balance("BTC");
        assert_relative_eq!(btc.free, 1.0);

        let order = engine.core().order("o1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_relative_eq!(order.executed_qty, 1.0);
        assert_relative_eq!(order.avg_price, 50_000.0);

        // Event stream: accept, fill, order_state, account
        let lines = buf.lines();
        let types: Vec<&str> = lines.iter().map(|l| l["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["order_update", "fill", "order_state", "account"]);
        assert_eq!(lines[1]["price"], 50_000.0);
        assert_eq!(lines[2]["status"], "FILLED");
    }

    #[test]
    fn test_cancel_emits_update() {
        let dir = TempDir::new().unwrap();
        let (engine, buf) = engine(&dir, 100_000.0, 100_000.0);

        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "o1");
        engine.handle_place(&req, 0).unwrap();

        let cancel = CancelOrderRequest {
            symbol: Symbol::from("BTCUSDT"),
            client_order_id: "o1".to_string(),
        };
        let decision = engine.handle_cancel(&cancel, 100).unwrap();
        assert!(matches!(decision, CancelDecision::Found { .. }));

        let lines = buf.lines();
        assert_eq!(lines[1]["status"], "CANCELED");
        assert_relative_eq!(engine.core().balance("USDT").free, 100_000.0);
    }

    #[test]
    fn test_cancel_unknown_emits_reason() {
        let dir = TempDir::new().unwrap();
        let (engine, buf) = engine(&dir, 1000.0, 1000.0);

        let cancel = CancelOrderRequest {
            symbol: Symbol::from("BTCUSDT"),
            client_order_id: "ghost".to_string(),
        };
        let decision = engine.handle_cancel(&cancel, 100).unwrap();
        assert!(matches!(decision, CancelDecision::Missing));

        let lines = buf.lines();
        assert_eq!(lines[0]["status"], "REJECTED");
        assert_eq!(lines[0]["reason"], "unknown_order");
    }

    #[test]
    fn test_frozen_engine_rejects() {
        let dir = TempDir::new().unwrap();
        let (engine, buf) = engine(&dir, 100_000.0, 100_000.0);
        engine.risk().set_frozen(true);

        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "o1");
        let decision = engine.handle_place(&req, 0).unwrap();
        assert!(matches!(
            decision,
            PlaceDecision::Rejected {
                reason: RejectReason::StrategyFrozen
            }
        ));
        assert_eq!(buf.lines()[0]["reason"], "strategy_frozen");

        // Resume and the same flow succeeds
        engine.risk().set_frozen(false);
        let req2 = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "o2");
        assert!(engine.handle_place(&req2, 1).unwrap().is_accepted());
    }

    #[test]
    fn test_market_tick_updates_reference() {
        let dir = TempDir::new().unwrap();
        let (engine, buf) = engine(&dir, 100_000.0, 100_000.0);
        engine.on_market(&Symbol::from("BTCUSDT"), 50_000.0, 5);

        let lines = buf.lines();
        assert_eq!(lines[0]["type"], "market");
        assert_eq!(lines[0]["price"], 50_000.0);

        // Price band now applies around the reference
        engine.risk().set_max_price_deviation(0.01);
        let req = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 0.1, 60_000.0, "far");
        let decision = engine.handle_place(&req, 10).unwrap();
        assert!(matches!(
            decision,
            PlaceDecision::Rejected {
                reason: RejectReason::PriceBand
            }
        ));
    }
}
