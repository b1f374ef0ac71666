//! Line-delimited JSON event output.
//!
//! One object per line, UTF-8, flushed after every write. Emission is
//! serialized behind a mutex so lines never interleave. Optional fields
//! are omitted rather than emitted as null.

use crate::core::Fill;
use crate::oms::ledger::Balance;
use crate::oms::store::Order;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::io::Write;
use tracing::error;

/// Serialized JSON event stream over any writer
pub struct EventEmitter {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl EventEmitter {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Emitter over stdout (the engine's normal event channel).
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn emit(&self, value: Value) {
        let mut sink = self.sink.lock();
        if let Err(e) = writeln!(sink, "{}", value) {
            error!(error = %e, "failed to write event");
            return;
        }
        if let Err(e) = sink.flush() {
            error!(error = %e, "failed to flush event stream");
        }
    }

    pub fn emit_market(&self, symbol: &str, price: f64, ts_ns: i64) {
        self.emit(json!({
            "type": "market",
            "symbol": symbol,
            "ts_ns": ts_ns,
            "price": price,
        }));
    }

    pub fn emit_fill(&self, fill: &Fill) {
        self.emit(json!({
            "type": "fill",
            "ts_ns": fill.ts_recv_ns,
            "client_order_id": fill.client_order_id,
            "symbol": fill.symbol.as_str(),
            "qty": fill.qty,
            "price": fill.price,
        }));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit_order_update(
        &self,
        ts_ns: i64,
        client_order_id: &str,
        venue_order_id: &str,
        status: &str,
        symbol: &str,
        side: &str,
        qty: Option<f64>,
        price: Option<f64>,
        reason: &str,
    ) {
        let mut object = Map::new();
        object.insert("type".to_string(), json!("order_update"));
        object.insert("ts_ns".to_string(), json!(ts_ns));
        object.insert("client_order_id".to_string(), json!(client_order_id));
        if !venue_order_id.is_empty() {
            object.insert("venue_order_id".to_string(), json!(venue_order_id));
        }
        if !status.is_empty() {
            object.insert("status".to_string(), json!(status));
        }
        if !symbol.is_empty() {
            object.insert("symbol".to_string(), json!(symbol));
        }
        if !side.is_empty() {
            object.insert("side".to_string(), json!(side));
        }
        if let Some(qty) = qty {
            object.insert("qty".to_string(), json!(qty));
        }
        if let Some(price) = price {
            object.insert("price".to_string(), json!(price));
        }
        if !reason.is_empty() {
            object.insert("reason".to_string(), json!(reason));
        }
        self.emit(Value::Object(object));
    }

    /// Full order snapshot.
    pub fn emit_order_state(&self, order: &Order) {
        let mut object = Map::new();
        object.insert("type".to_string(), json!("order_state"));
        object.insert(
            "client_order_id".to_string(),
            json!(order.client_order_id),
        );
        object.insert("status".to_string(), json!(order.status.as_str()));
        if !order.symbol.is_empty() {
            object.insert("symbol".to_string(), json!(order.symbol.as_str()));
        }
        if let Some(side) = order.side {
            object.insert("side".to_string(), json!(side.as_str()));
        }
        if let Some(qty) = order.order_qty {
            object.insert("order_qty".to_string(), json!(qty));
        }
        if let Some(price) = order.limit_price {
            object.insert("limit_price".to_string(), json!(price));
        }
        object.insert("executed_qty".to_string(), json!(order.executed_qty));
        object.insert("avg_price".to_string(), json!(order.avg_price));
        if !order.venue_order_id.is_empty() {
            object.insert("venue_order_id".to_string(), json!(order.venue_order_id));
        }
        if !order.reason.is_empty() {
            object.insert("reason".to_string(), json!(order.reason));
        }
        if order.last_ts_ns > 0 {
            object.insert("last_ts_ns".to_string(), json!(order.last_ts_ns));
        }
        self.emit(Value::Object(object));
    }

    pub fn emit_account(&self, ts_ns: i64, balances: &[Balance]) {
        let entries: Vec<Value> = balances
            .iter()
            .map(|b| {
                json!({
                    "asset": b.asset,
                    "free": b.free,
                    "locked": b.locked,
                })
            })
            .collect();
        self.emit(json!({
            "type": "account",
            "ts_ns": ts_ns,
            "balances": entries,
        }));
    }

    pub fn emit_error(&self, message: &str, ts_ns: i64) {
        self.emit(json!({
            "type": "error",
            "ts_ns": ts_ns,
            "message": message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, Side, Symbol};
    use std::sync::Arc;

    /// A Write sink tests can read back.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn lines(&self) -> Vec<Value> {
            let data = self.0.lock();
            String::from_utf8_lossy(&data)
                .lines()
                .map(|l| serde_json::from_str(l).expect("valid JSON line"))
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

    fn emitter() -> (EventEmitter, SharedBuf) {
        let buf = SharedBuf::default();
        (EventEmitter::new(Box::new(buf.clone())), buf)
    }

    #[test]
    fn test_market_event_shape() {
        let (emitter, buf) = emitter();
        emitter.emit_market("BTCUSDT", 50_000.0, 123);

        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "market");
        assert_eq!(lines[0]["symbol"], "BTCUSDT");
        assert_eq!(lines[0]["ts_ns"], 123);
        assert_eq!(lines[0]["price"], 50_000.0);
    }

    #[test]
    fn test_fill_event_shape() {
        let (emitter, buf) = emitter();
        emitter.emit_fill(&Fill {
            client_order_id: "o1".into(),
            symbol: Symbol::from("BTCUSDT"),
            qty: 1.0,
            price: 50_000.0,
            ts_exchange_ns: 456,
            ts_recv_ns: 456,
        });

        let lines = buf.lines();
        assert_eq!(lines[0]["type"], "fill");
        assert_eq!(lines[0]["client_order_id"], "o1");
        assert_eq!(lines[0]["ts_ns"], 456);
        assert_eq!(lines[0]["qty"], 1.0);
    }

    #[test]
    fn test_order_update_omits_empty_fields() {
        let (emitter, buf) = emitter();
        emitter.emit_order_update(1, "o1", "", "REJECTED", "", "", None, None, "insufficient_funds");

        let lines = buf.lines();
        let object = lines[0].as_object().unwrap();
        assert_eq!(object["status"], "REJECTED");
        assert_eq!(object["reason"], "insufficient_funds");
        assert!(!object.contains_key("venue_order_id"));
        assert!(!object.contains_key("qty"));
        assert!(!object.contains_key("side"));
    }

    #[test]
    fn test_order_state_snapshot() {
        let (emitter, buf) = emitter();
        let order = Order {
            client_order_id: "o1".into(),
            symbol: Symbol::from("BTCUSDT"),
            side: Some(Side::Buy),
            order_qty: Some(1.0),
            limit_price: Some(50_000.0),
            executed_qty: 0.5,
            avg_price: 50_000.0,
            venue_order_id: "v1".into(),
            status: OrderStatus::PartiallyFilled,
            reason: String::new(),
            last_ts_ns: 999,
            created_ts_ns: 1,
        };
        emitter.emit_order_state(&order);

        let lines = buf.lines();
        assert_eq!(lines[0]["type"], "order_state");
        assert_eq!(lines[0]["status"], "PARTIALLY_FILLED");
        assert_eq!(lines[0]["executed_qty"], 0.5);
        assert_eq!(lines[0]["venue_order_id"], "v1");
        assert_eq!(lines[0]["last_ts_ns"], 999);
    }

    #[test]
    fn test_account_event() {
        let (emitter, buf) = emitter();
        emitter.emit_account(
            7,
            &[
                Balance {
                    asset: "BTC".into(),
                    free: 1.0,
                    locked: 0.0,
                },
                Balance {
                    asset: "USDT".into(),
                    free: 50_000.0,
                    locked: 1_000.0,
                },
            ],
        );

        let lines = buf.lines();
        let balances = lines[0]["balances"].as_array().unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[1]["asset"], "USDT");
        assert_eq!(balances[1]["locked"], 1_000.0);
    }

    #[test]
    fn test_strings_are_escaped() {
        let (emitter, buf) = emitter();
        emitter.emit_error("bad \"quote\" and\nnewline", 1);

        let lines = buf.lines();
        assert_eq!(lines.len(), 1, "escaped content must stay on one line");
        assert_eq!(lines[0]["message"], "bad \"quote\" and\nnewline");
    }

    #[test]
    fn test_each_event_is_one_line() {
        let (emitter, buf) = emitter();
        emitter.emit_market("BTCUSDT", 1.0, 1);
        emitter.emit_error("x", 2);
        emitter.emit_market("BTCUSDT", 2.0, 3);
        assert_eq!(buf.lines().len(), 3);
    }
}
