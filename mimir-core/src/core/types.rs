use serde::{Deserialize, Serialize};
use std::fmt;

/// Quantity comparison tolerance used across the engine.
pub const QTY_EPSILON: f64 = 1e-8;

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order (execute at best available price)
    Market,
    /// Limit order with specified price
    Limit,
}

impl OrderType {
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderType::Market => 0,
            OrderType::Limit => 1,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => OrderType::Market,
            _ => OrderType::Limit,
        }
    }
}

/// Time-in-force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled (default)
    Gtc,
    /// Immediate-or-cancel
    Ioc,
    /// Fill-or-kill
    Fok,
    /// Good-til-crossing (post-only)
    Gtx,
}

impl TimeInForce {
    pub fn as_u8(&self) -> u8 {
        match self {
            TimeInForce::Gtc => 0,
            TimeInForce::Ioc => 1,
            TimeInForce::Fok => 2,
            TimeInForce::Gtx => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => TimeInForce::Ioc,
            2 => TimeInForce::Fok,
            3 => TimeInForce::Gtx,
            _ => TimeInForce::Gtc,
        }
    }
}

/// Order status over the full lifecycle.
///
/// Exactly one terminal state is reached: Filled, Canceled, Rejected or
/// Expired. Terminal states are sticky in the order store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => Some(OrderStatus::New),
            "ACCEPTED" => Some(OrderStatus::Accepted),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELED" | "CANCELLED" => Some(OrderStatus::Canceled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "EXPIRED" => Some(OrderStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Venue {
    Binance,
    Okx,
    Bybit,
    Kraken,
    /// Local simulator venue
    Sim,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Okx => "okx",
            Venue::Bybit => "bybit",
            Venue::Kraken => "kraken",
            Venue::Sim => "sim",
        }
    }

    /// Venue-specific symbol spelling. OKX separates base and quote with
    /// a hyphen; the others use the compact form.
    pub fn normalize_symbol(&self, symbol: &Symbol) -> String {
        match self {
            Venue::Okx => {
                let s = symbol.as_str();
                if s.len() > 4 && !s.contains('-') {
                    let (base, quote) = s.split_at(s.len() - 4);
                    format!("{}-{}", base, quote)
                } else {
                    s.to_string()
                }
            }
            _ => symbol.as_str().to_string(),
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trading symbol identifier (e.g. "BTCUSDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tradable instrument: symbol plus its base and quote assets.
///
/// Buys reserve quote, sells reserve base, so the core needs both legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub base_asset: String,
    pub quote_asset: String,
}

impl Instrument {
    pub fn new(
        symbol: impl Into<Symbol>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
        }
    }
}

/// An order intent submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub qty: f64,
    pub price: Option<f64>,
    pub client_order_id: String,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub post_only: bool,
}

impl PlaceOrderRequest {
    /// Build a limit order request
    pub fn limit(
        symbol: impl Into<Symbol>,
        side: Side,
        qty: f64,
        price: f64,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            tif: TimeInForce::Gtc,
            qty,
            price: Some(price),
            client_order_id: client_order_id.into(),
            reduce_only: false,
            post_only: false,
        }
    }

    /// Build a market order request
    pub fn market(
        symbol: impl Into<Symbol>,
        side: Side,
        qty: f64,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            tif: TimeInForce::Ioc,
            qty,
            price: None,
            client_order_id: client_order_id.into(),
            reduce_only: false,
            post_only: false,
        }
    }

    /// Notional value at the limit price (0 for market orders)
    pub fn notional(&self) -> f64 {
        self.qty * self.price.unwrap_or(0.0)
    }
}

/// A cancel intent submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub symbol: Symbol,
    pub client_order_id: String,
}

/// Execution report returned by a venue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub symbol: Symbol,
    pub client_order_id: String,
    pub venue_order_id: String,
    pub status: OrderStatus,
    pub last_fill_qty: f64,
    pub last_fill_price: f64,
    pub ts_exchange_ns: i64,
    pub ts_recv_ns: i64,
}

impl ExecutionReport {
    pub fn has_fill(&self) -> bool {
        self.last_fill_qty > 0.0
    }
}

/// An immutable trade execution against a parent order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub client_order_id: String,
    pub symbol: Symbol,
    pub qty: f64,
    pub price: f64,
    pub ts_exchange_ns: i64,
    pub ts_recv_ns: i64,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.qty * self.price
    }
}
