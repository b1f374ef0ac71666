//! Pre- and post-trade risk admission.
//!
//! Pre-trade checks run in a fixed order and the first failure
//! short-circuits: freeze interlock, circuit breaker, order rate, size,
//! funds, max position, price band. A rate violation trips a 30 second
//! breaker. Post-trade checks watch each position for stop-loss and
//! take-profit triggers.

use crate::config::RiskConfig;
use crate::core::{OrderType, PlaceOrderRequest, RejectReason, QTY_EPSILON};
use crate::oms::positions::VenuePosition;
use crate::utils::now_ns;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker hold-off after a rate violation
const BREAKER_RESET_DELAY: Duration = Duration::from_secs(30);
/// Sliding window for the order-rate check
const RATE_WINDOW: Duration = Duration::from_secs(1);
/// Bounded alert retention
const MAX_ALERTS: usize = 1000;

/// Admission outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Rejected(RejectReason),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            RiskDecision::Allowed => None,
            RiskDecision::Rejected(reason) => Some(*reason),
        }
    }
}

/// Post-trade signal raised against a position
#[derive(Debug, Clone, PartialEq)]
pub enum RiskSignal {
    StopLoss { symbol: String, pnl_pct: f64 },
    TakeProfit { symbol: String, pnl_pct: f64 },
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Advisory alert kept in a bounded list
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAlert {
    pub level: RiskLevel,
    pub message: String,
    pub symbol: String,
    pub ts_ns: i64,
}

/// Pre/post-trade risk engine
pub struct RiskEngine {
    config: RwLock<RiskConfig>,
    reference_price: RwLock<f64>,
    /// Signed position size per symbol, fed from fills
    position_sizes: RwLock<HashMap<String, f64>>,
    order_timestamps: Mutex<VecDeque<Instant>>,
    breaker_reset_at: Mutex<Option<Instant>>,
    frozen: AtomicBool,
    alerts: Mutex<Vec<RiskAlert>>,
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config: RwLock::new(config),
            reference_price: RwLock::new(0.0),
            position_sizes: RwLock::new(HashMap::new()),
            order_timestamps: Mutex::new(VecDeque::new()),
            breaker_reset_at: Mutex::new(None),
            frozen: AtomicBool::new(false),
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Run every pre-trade check in order; the first failure wins.
    pub fn check_pre_trade(&self, request: &PlaceOrderRequest) -> RiskDecision {
        self.check_pre_trade_at(request, Instant::now())
    }

    fn check_pre_trade_at(&self, request: &PlaceOrderRequest, now: Instant) -> RiskDecision {
        if self.frozen.load(Ordering::SeqCst) {
            return RiskDecision::Rejected(RejectReason::StrategyFrozen);
        }

        {
            let mut breaker = self.breaker_reset_at.lock();
            if let Some(reset_at) = *breaker {
                if now < reset_at {
                    return RiskDecision::Rejected(RejectReason::CircuitBreaker);
                }
                *breaker = None;
            }
        }

        let config = self.config.read().clone();

        // Rate: order submissions within the trailing one-second window.
        {
            let mut timestamps = self.order_timestamps.lock();
            while let Some(&front) = timestamps.front() {
                if now.duration_since(front) > RATE_WINDOW {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
            if timestamps.len() >= config.max_order_rate {
                warn!(
                    count = timestamps.len(),
                    max = config.max_order_rate,
                    "order rate exceeded, tripping breaker"
                );
                *self.breaker_reset_at.lock() = Some(now + BREAKER_RESET_DELAY);
                return RiskDecision::Rejected(RejectReason::RateLimit);
            }
        }

        if request.qty > config.max_order_size {
            return RiskDecision::Rejected(RejectReason::SizeLimit);
        }

        // Funds: margin requirement for limit orders. Market orders are
        // priced at the venue and checked by the balance reservation.
        if request.order_type == OrderType::Limit {
            if let Some(price) = request.price {
                let required = request.qty * price / config.max_leverage.max(1e-12);
                if required > config.account_balance {
                    return RiskDecision::Rejected(RejectReason::InsufficientFunds);
                }
            }
        }

        if config.max_position_size > 0.0 {
            let current = self
                .position_sizes
                .read()
                .get(request.symbol.as_str())
                .copied()
                .unwrap_or(0.0);
            if current.abs() + request.qty > config.max_position_size {
                return RiskDecision::Rejected(RejectReason::RiskRejected);
            }
        }

        let reference = *self.reference_price.read();
        if reference > 0.0 {
            if let Some(price) = request.price {
                let deviation = ((price - reference) / reference).abs();
                if deviation > config.max_price_deviation {
                    return RiskDecision::Rejected(RejectReason::PriceBand);
                }
            }
        }

        self.order_timestamps.lock().push_back(now);
        debug!(client_order_id = %request.client_order_id, "pre-trade checks passed");
        RiskDecision::Allowed
    }

    /// Post-trade check against a position's unrealized return.
    pub fn check_post_trade(&self, position: &VenuePosition) -> Option<RiskSignal> {
        if position.size.abs() < QTY_EPSILON || position.avg_entry_price <= 0.0 {
            return None;
        }
        let config = self.config.read().clone();
        let entry_notional = position.size.abs() * position.avg_entry_price;
        let pnl_pct = position.unrealized_pnl / entry_notional;

        if config.stop_loss_enabled && pnl_pct <= -config.stop_loss_pct {
            let signal = RiskSignal::StopLoss {
                symbol: position.symbol.as_str().to_string(),
                pnl_pct,
            };
            self.add_alert(
                RiskLevel::High,
                format!("stop-loss triggered at {:.2}%", pnl_pct * 100.0),
                position.symbol.as_str(),
            );
            return Some(signal);
        }

        if config.take_profit_enabled && pnl_pct >= config.take_profit_pct {
            return Some(RiskSignal::TakeProfit {
                symbol: position.symbol.as_str().to_string(),
                pnl_pct,
            });
        }
        None
    }

    /// Record a fill so the max-position check tracks exposure.
    pub fn update_position(&self, symbol: &str, signed_size: f64) {
        self.position_sizes
            .write()
            .insert(symbol.to_string(), signed_size);
    }

    pub fn clear_positions(&self) {
        self.position_sizes.write().clear();
    }

    // ---------------------------------------------------------------
    // Freeze interlock & breaker
    // ---------------------------------------------------------------

    /// Reconciliation freeze hook: while set, every admission rejects
    /// with `strategy_frozen`.
    pub fn set_frozen(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn is_circuit_breaker_tripped(&self) -> bool {
        self.breaker_reset_at.lock().is_some()
    }

    pub fn reset_circuit_breaker(&self) {
        *self.breaker_reset_at.lock() = None;
    }

    // ---------------------------------------------------------------
    // Limits
    // ---------------------------------------------------------------

    pub fn set_account_balance(&self, balance: f64) {
        self.config.write().account_balance = balance;
    }

    pub fn set_max_position_size(&self, size: f64) {
        self.config.write().max_position_size = size;
    }

    pub fn set_max_leverage(&self, leverage: f64) {
        self.config.write().max_leverage = leverage;
    }

    pub fn set_reference_price(&self, price: f64) {
        *self.reference_price.write() = price;
    }

    pub fn set_max_price_deviation(&self, deviation: f64) {
        self.config.write().max_price_deviation = deviation;
    }

    pub fn set_max_order_rate(&self, rate: usize) {
        self.config.write().max_order_rate = rate;
    }

    pub fn set_max_order_size(&self, size: f64) {
        self.config.write().max_order_size = size;
    }

    pub fn set_stop_loss(&self, enabled: bool, pct: f64) {
        let mut config = self.config.write();
        config.stop_loss_enabled = enabled;
        config.stop_loss_pct = pct;
    }

    pub fn set_take_profit(&self, enabled: bool, pct: f64) {
        let mut config = self.config.write();
        config.take_profit_enabled = enabled;
        config.take_profit_pct = pct;
    }

    // ---------------------------------------------------------------
    // Alerts
    // ---------------------------------------------------------------

    pub fn add_alert(&self, level: RiskLevel, message: impl Into<String>, symbol: &str) {
        let mut alerts = self.alerts.lock();
        alerts.push(RiskAlert {
            level,
            message: message.into(),
            symbol: symbol.to_string(),
            ts_ns: now_ns(),
        });
        if alerts.len() > MAX_ALERTS {
            let excess = alerts.len() - MAX_ALERTS;
            alerts.drain(..excess);
        }
    }

    pub fn alerts(&self) -> Vec<RiskAlert> {
        self.alerts.lock().clone()
    }

    pub fn clear_alerts(&self) {
        self.alerts.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Side, Symbol, Venue};

    fn engine_with(config: RiskConfig) -> RiskEngine {
        RiskEngine::new(config)
    }

    fn buy(qty: f64, price: f64) -> PlaceOrderRequest {
        PlaceOrderRequest::limit("BTCUSDT", Side::Buy, qty, price, "r1")
    }

    #[test]
    fn test_allows_within_limits() {
        let engine = engine_with(RiskConfig {
            account_balance: 100_000.0,
            max_order_size: 10.0,
            ..Default::default()
        });
        assert!(engine.check_pre_trade(&buy(1.0, 50_000.0)).is_allowed());
    }

    #[test]
    fn test_size_limit() {
        let engine = engine_with(RiskConfig {
            account_balance: 1e9,
            max_order_size: 0.5,
            ..Default::default()
        });
        assert_eq!(
            engine.check_pre_trade(&buy(1.0, 50_000.0)),
            RiskDecision::Rejected(RejectReason::SizeLimit)
        );
    }

    #[test]
    fn test_funds_check_respects_leverage() {
        let engine = engine_with(RiskConfig {
            account_balance: 10_000.0,
            max_leverage: 1.0,
            ..Default::default()
        });
        // 50k notional against 10k balance
        assert_eq!(
            engine.check_pre_trade(&buy(1.0, 50_000.0)),
            RiskDecision::Rejected(RejectReason::InsufficientFunds)
        );

        // 5x leverage brings the margin requirement to 10k
        engine.set_max_leverage(5.0);
        assert!(engine.check_pre_trade(&buy(1.0, 50_000.0)).is_allowed());
    }

    #[test]
    fn test_market_order_skips_funds_check() {
        let engine = engine_with(RiskConfig {
            account_balance: 10.0,
            ..Default::default()
        });
        let req = PlaceOrderRequest::market("BTCUSDT", Side::Buy, 1.0, "m1");
        assert!(engine.check_pre_trade(&req).is_allowed());
    }

    #[test]
    fn test_max_position_bound() {
        let engine = engine_with(RiskConfig {
            account_balance: 1e9,
            max_position_size: 2.0,
            ..Default::default()
        });
        engine.update_position("BTCUSDT", 1.5);
        assert_eq!(
            engine.check_pre_trade(&buy(1.0, 50_000.0)),
            RiskDecision::Rejected(RejectReason::RiskRejected)
        );
        assert!(engine.check_pre_trade(&buy(0.5, 50_000.0)).is_allowed());
    }

    #[test]
    fn test_price_band() {
        let engine = engine_with(RiskConfig {
            account_balance: 1e9,
            max_price_deviation: 0.1,
            ..Default::default()
        });
        engine.set_reference_price(50_000.0);
        // 20% above reference
        assert_eq!(
            engine.check_pre_trade(&buy(1.0, 60_000.0)),
            RiskDecision::Rejected(RejectReason::PriceBand)
        );
        assert!(engine.check_pre_trade(&buy(1.0, 54_000.0)).is_allowed());
    }

    #[test]
    fn test_rate_limit_blocks_next_and_trips_breaker() {
        let engine = engine_with(RiskConfig {
            account_balance: 1e9,
            max_order_rate: 3,
            ..Default::default()
        });
        let now = Instant::now();
        for _ in 0..3 {
            assert!(engine
                .check_pre_trade_at(&buy(0.1, 50_000.0), now)
                .is_allowed());
        }
        // The (max+1)-th submission inside the window is blocked
        assert_eq!(
            engine.check_pre_trade_at(&buy(0.1, 50_000.0), now),
            RiskDecision::Rejected(RejectReason::RateLimit)
        );
        assert!(engine.is_circuit_breaker_tripped());

        // Still tripped shortly after
        assert_eq!(
            engine.check_pre_trade_at(&buy(0.1, 50_000.0), now + Duration::from_secs(5)),
            RiskDecision::Rejected(RejectReason::CircuitBreaker)
        );

        // Breaker expires after its 30s hold-off (the rate window has
        // long since drained)
        assert!(engine
            .check_pre_trade_at(&buy(0.1, 50_000.0), now + Duration::from_secs(31))
            .is_allowed());
    }

    #[test]
    fn test_frozen_rejects_everything() {
        let engine = engine_with(RiskConfig {
            account_balance: 1e9,
            ..Default::default()
        });
        engine.set_frozen(true);
        assert_eq!(
            engine.check_pre_trade(&buy(0.1, 50_000.0)),
            RiskDecision::Rejected(RejectReason::StrategyFrozen)
        );
        engine.set_frozen(false);
        assert!(engine.check_pre_trade(&buy(0.1, 50_000.0)).is_allowed());
    }

    #[test]
    fn test_stop_loss_signal() {
        let engine = engine_with(RiskConfig {
            stop_loss_enabled: true,
            stop_loss_pct: 0.05,
            ..Default::default()
        });

        let mut position = VenuePosition {
            venue: Venue::Binance,
            symbol: Symbol::from("BTCUSDT"),
            size: 1.0,
            avg_entry_price: 50_000.0,
            realized_pnl: 0.0,
            unrealized_pnl: -1_000.0, // -2%
            last_update_ns: 0,
        };
        assert!(engine.check_post_trade(&position).is_none());

        position.unrealized_pnl = -3_000.0; // -6%
        match engine.check_post_trade(&position) {
            Some(RiskSignal::StopLoss { pnl_pct, .. }) => {
                assert!((pnl_pct + 0.06).abs() < 1e-12);
            }
            other => panic!("expected stop-loss, got {:?}", other),
        }
        assert!(!engine.alerts().is_empty());
    }

    #[test]
    fn test_take_profit_signal() {
        let engine = engine_with(RiskConfig {
            take_profit_enabled: true,
            take_profit_pct: 0.1,
            ..Default::default()
        });
        let position = VenuePosition {
            venue: Venue::Binance,
            symbol: Symbol::from("BTCUSDT"),
            size: 1.0,
            avg_entry_price: 50_000.0,
            realized_pnl: 0.0,
            unrealized_pnl: 6_000.0, // +12%
            last_update_ns: 0,
        };
        assert!(matches!(
            engine.check_post_trade(&position),
            Some(RiskSignal::TakeProfit { .. })
        ));
    }

    #[test]
    fn test_flat_position_no_signal() {
        let engine = engine_with(RiskConfig {
            stop_loss_enabled: true,
            ..Default::default()
        });
        let position = VenuePosition {
            venue: Venue::Binance,
            symbol: Symbol::from("BTCUSDT"),
            size: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            last_update_ns: 0,
        };
        assert!(engine.check_post_trade(&position).is_none());
    }
}
