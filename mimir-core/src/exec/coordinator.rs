//! Exchange coordinator: adapter registry, per-symbol aggregated books,
//! latency tracking and strategy-based venue selection.
//!
//! Adapter calls are made with the registry lock released; only the
//! adapter's own internal serialization guards the wire. Round-trip
//! latency is recorded for every call and feeds the LowestLatency and
//! Balanced strategies.

use crate::config::{LatencyWindowConfig, StalenessConfig};
use crate::core::{
    CancelOrderRequest, ExecutionReport, OrderStatus, PlaceOrderRequest, Side, Symbol, Venue,
};
use crate::exec::adapter::ExchangeAdapter;
use crate::exec::book::{AggregatedBook, BookSnapshot};
use crate::exec::latency::{LatencyStats, LatencyTracker};
use crate::exec::RoutingDecision;
use crate::oms::positions::PositionBook;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Venue selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingStrategy {
    #[default]
    BestPrice,
    LowestLatency,
    Balanced,
    RoundRobin,
    WeightedRandom,
}

/// Connection and latency health for one venue
#[derive(Debug, Clone)]
pub struct ExchangeStatus {
    pub venue: Venue,
    pub is_connected: bool,
    pub is_healthy: bool,
    pub latency: Option<LatencyStats>,
    pub status_message: String,
}

pub type ExecutionCallback = Box<dyn Fn(Venue, &ExecutionReport) + Send + Sync>;
pub type StatusCallback = Box<dyn Fn(&ExchangeStatus) + Send + Sync>;

/// p95 bound used by the venue health gate
const HEALTHY_MAX_LATENCY: Duration = Duration::from_secs(1);

#[derive(Default)]
struct RoutingState {
    strategy: RoutingStrategy,
    default_venue: Option<Venue>,
    latency_weight: f64,
    venue_weights: HashMap<Venue, f64>,
    round_robin_index: usize,
}

/// Multi-venue execution coordinator
pub struct ExchangeCoordinator {
    adapters: RwLock<HashMap<Venue, Arc<dyn ExchangeAdapter>>>,
    books: DashMap<String, Arc<AggregatedBook>>,
    latency: LatencyTracker,
    positions: PositionBook,
    routing: Mutex<RoutingState>,
    staleness: StalenessConfig,
    execution_callback: RwLock<Option<ExecutionCallback>>,
    status_callback: RwLock<Option<StatusCallback>>,
}

impl Default for ExchangeCoordinator {
    fn default() -> Self {
        Self::new(StalenessConfig::default(), LatencyWindowConfig::default())
    }
}

impl ExchangeCoordinator {
    pub fn new(staleness: StalenessConfig, latency_window: LatencyWindowConfig) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            books: DashMap::new(),
            latency: LatencyTracker::new(latency_window),
            positions: PositionBook::default(),
            routing: Mutex::new(RoutingState {
                latency_weight: 0.5,
                ..RoutingState::default()
            }),
            staleness,
            execution_callback: RwLock::new(None),
            status_callback: RwLock::new(None),
        }
    }

    // ---------------------------------------------------------------
    // Adapter registry
    // ---------------------------------------------------------------

    pub fn register_adapter(&self, venue: Venue, adapter: Arc<dyn ExchangeAdapter>) {
        info!(venue = %venue, name = adapter.name(), version = adapter.version(), "adapter registered");
        self.adapters.write().insert(venue, adapter);
    }

    pub fn unregister_adapter(&self, venue: Venue) {
        self.adapters.write().remove(&venue);
    }

    pub fn has_adapter(&self, venue: Venue) -> bool {
        self.adapters.read().contains_key(&venue)
    }

    pub fn adapter(&self, venue: Venue) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.read().get(&venue).cloned()
    }

    pub fn registered_venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.adapters.read().keys().copied().collect();
        venues.sort();
        venues
    }

    // ---------------------------------------------------------------
    // Order flow
    // ---------------------------------------------------------------

    /// Route and place in one step.
    pub fn place_order_routed(&self, request: &PlaceOrderRequest) -> Option<ExecutionReport> {
        let decision = self.select_venue(&request.symbol, request.side, request.qty)?;
        self.place_order(decision.selected_venue, request)
    }

    /// Place on a specific venue. The adapter call runs without any
    /// coordinator lock held; its round trip is recorded and fills flow
    /// into the cross-venue position book and the execution callback.
    pub fn place_order(&self, venue: Venue, request: &PlaceOrderRequest) -> Option<ExecutionReport> {
        let adapter = self.adapter(venue)?;

        let start = Instant::now();
        let result = adapter.place_order(request);
        let end = Instant::now();
        self.latency.record(venue, end - start, end);

        match &result {
            Some(report) => {
                if matches!(
                    report.status,
                    OrderStatus::Filled | OrderStatus::PartiallyFilled
                ) && report.has_fill()
                {
                    self.positions.on_fill(
                        venue,
                        &report.symbol,
                        request.side,
                        report.last_fill_qty,
                        report.last_fill_price,
                        report.ts_recv_ns,
                    );
                }
                if let Some(callback) = self.execution_callback.read().as_ref() {
                    callback(venue, report);
                }
            }
            None => {
                warn!(
                    venue = %venue,
                    client_order_id = %request.client_order_id,
                    "no execution report from adapter"
                );
            }
        }
        result
    }

    /// Cancel on a specific venue.
    pub fn cancel_order(&self, venue: Venue, request: &CancelOrderRequest) -> Option<ExecutionReport> {
        let adapter = self.adapter(venue)?;

        let start = Instant::now();
        let result = adapter.cancel_order(request);
        let end = Instant::now();
        self.latency.record(venue, end - start, end);

        if let Some(report) = &result {
            if let Some(callback) = self.execution_callback.read().as_ref() {
                callback(venue, report);
            }
        } else {
            warn!(
                venue = %venue,
                client_order_id = %request.client_order_id,
                "no cancel report from adapter"
            );
        }
        result
    }

    // ---------------------------------------------------------------
    // Books
    // ---------------------------------------------------------------

    fn book_or_create(&self, symbol: &Symbol) -> Arc<AggregatedBook> {
        self.books
            .entry(symbol.as_str().to_string())
            .or_insert_with(|| {
                let book = Arc::new(AggregatedBook::new(self.staleness));
                let routing = self.routing.lock();
                for (venue, weight) in &routing.venue_weights {
                    book.set_venue_weight(*venue, *weight);
                }
                book
            })
            .clone()
    }

    pub fn update_order_book(
        &self,
        venue: Venue,
        symbol: &Symbol,
        snapshot: &BookSnapshot,
        timestamp_ns: i64,
    ) {
        self.book_or_create(symbol)
            .update_venue(venue, snapshot, timestamp_ns);
    }

    pub fn update_bbo(
        &self,
        venue: Venue,
        symbol: &Symbol,
        bid_price: f64,
        bid_qty: f64,
        ask_price: f64,
        ask_qty: f64,
        timestamp_ns: i64,
    ) {
        self.book_or_create(symbol)
            .update_venue_bbo(venue, bid_price, bid_qty, ask_price, ask_qty, timestamp_ns);
    }

    pub fn book(&self, symbol: &Symbol) -> Option<Arc<AggregatedBook>> {
        self.books.get(symbol.as_str()).map(|b| b.clone())
    }

    pub fn aggregated_bbo(&self, symbol: &Symbol) -> Option<crate::exec::book::AggregatedBbo> {
        self.book(symbol).map(|b| b.aggregated_bbo())
    }

    // ---------------------------------------------------------------
    // Latency & positions
    // ---------------------------------------------------------------

    pub fn record_latency(&self, venue: Venue, latency: Duration, timestamp: Instant) {
        self.latency.record(venue, latency, timestamp);
    }

    pub fn latency_stats(&self, venue: Venue) -> Option<LatencyStats> {
        self.latency.stats(venue)
    }

    pub fn venues_by_latency(&self) -> Vec<Venue> {
        self.latency.venues_by_latency()
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    // ---------------------------------------------------------------
    // Routing configuration
    // ---------------------------------------------------------------

    pub fn set_routing_strategy(&self, strategy: RoutingStrategy) {
        self.routing.lock().strategy = strategy;
    }

    pub fn routing_strategy(&self) -> RoutingStrategy {
        self.routing.lock().strategy
    }

    pub fn set_default_venue(&self, venue: Venue) {
        self.routing.lock().default_venue = Some(venue);
    }

    /// Weight of the latency component in Balanced scoring, clamped to
    /// [0, 1].
    pub fn set_latency_weight(&self, weight: f64) {
        self.routing.lock().latency_weight = weight.clamp(0.0, 1.0);
    }

    pub fn set_venue_weight(&self, venue: Venue, weight: f64) {
        self.routing.lock().venue_weights.insert(venue, weight);
        for book in self.books.iter() {
            book.set_venue_weight(venue, weight);
        }
    }

    pub fn venue_weight(&self, venue: Venue) -> f64 {
        self.routing
            .lock()
            .venue_weights
            .get(&venue)
            .copied()
            .unwrap_or(1.0)
    }

    pub fn set_execution_callback(&self, callback: ExecutionCallback) {
        *self.execution_callback.write() = Some(callback);
    }

    pub fn set_status_callback(&self, callback: StatusCallback) {
        *self.status_callback.write() = Some(callback);
    }

    // ---------------------------------------------------------------
    // Venue selection
    // ---------------------------------------------------------------

    /// Select a venue for `(symbol, side, qty)` according to the
    /// configured strategy.
    pub fn select_venue(&self, symbol: &Symbol, side: Side, _qty: f64) -> Option<RoutingDecision> {
        let strategy = self.routing.lock().strategy;
        let decision = match strategy {
            RoutingStrategy::BestPrice => self.select_by_best_price(symbol, side),
            RoutingStrategy::LowestLatency => self.select_by_lowest_latency(),
            RoutingStrategy::Balanced => self.select_balanced(symbol, side),
            RoutingStrategy::RoundRobin => self.select_round_robin(),
            RoutingStrategy::WeightedRandom => self.select_weighted_random(),
        };
        if let Some(decision) = &decision {
            debug!(
                symbol = %symbol,
                venue = %decision.selected_venue,
                rationale = %decision.rationale,
                "venue selected"
            );
        }
        decision
    }

    fn default_decision(&self, rationale: &str) -> Option<RoutingDecision> {
        let default = self.routing.lock().default_venue?;
        Some(RoutingDecision::new(default, rationale))
    }

    fn select_by_best_price(&self, symbol: &Symbol, side: Side) -> Option<RoutingDecision> {
        let Some(book) = self.book(symbol) else {
            return self.default_decision("default venue (no book data)");
        };
        let bbo = book.aggregated_bbo();

        let (selected, expected_price) = match side {
            Side::Buy => (bbo.best_ask_venue, bbo.best_ask_price),
            Side::Sell => (bbo.best_bid_venue, bbo.best_bid_price),
        };

        match selected {
            Some(venue) => {
                let mut decision = RoutingDecision::new(venue, "best price routing");
                decision.expected_price = expected_price;
                decision.fallback_venues = bbo
                    .venues
                    .iter()
                    .filter(|v| !v.is_stale && v.venue != venue)
                    .map(|v| v.venue)
                    .collect();
                Some(decision)
            }
            None => self.default_decision("default venue (no book data)"),
        }
    }

    fn select_by_lowest_latency(&self) -> Option<RoutingDecision> {
        let adapters = self.adapters.read();
        let mut selected: Option<RoutingDecision> = None;

        for venue in self.latency.venues_by_latency() {
            let Some(adapter) = adapters.get(&venue) else {
                continue;
            };
            if !adapter.is_connected() {
                continue;
            }
            if let Some(decision) = selected.as_mut() {
                decision.fallback_venues.push(venue);
            } else {
                let mut decision = RoutingDecision::new(venue, "lowest latency routing");
                decision.expected_latency = self.latency.expected_latency(venue);
                selected = Some(decision);
            }
        }
        drop(adapters);

        selected.or_else(|| self.default_decision("default venue (no latency data)"))
    }

    fn select_balanced(&self, symbol: &Symbol, side: Side) -> Option<RoutingDecision> {
        let latency_weight = self.routing.lock().latency_weight;
        let Some(book) = self.book(symbol) else {
            return self.default_decision("default venue (no scoring data)");
        };
        let bbo = book.aggregated_bbo();

        let best_price = match side {
            Side::Buy => bbo.best_ask_price,
            Side::Sell => bbo.best_bid_price,
        };

        let best_latency = bbo
            .venues
            .iter()
            .filter_map(|v| self.latency.expected_latency(v.venue))
            .min();

        let mut scored: Vec<(Venue, f64, f64)> = Vec::new();
        for venue_bbo in bbo.venues.iter().filter(|v| !v.is_stale) {
            let price = match side {
                Side::Buy => venue_bbo.ask_price,
                Side::Sell => venue_bbo.bid_price,
            };
            if price <= 0.0 {
                continue;
            }

            let price_score = if best_price > 0.0 {
                match side {
                    Side::Buy => best_price / price,
                    Side::Sell => price / best_price,
                }
            } else {
                0.0
            };

            let latency_score = match (best_latency, self.latency.expected_latency(venue_bbo.venue))
            {
                (Some(best), Some(mine)) if mine.as_nanos() > 0 => {
                    best.as_nanos() as f64 / mine.as_nanos() as f64
                }
                _ => 0.0,
            };

            let combined = (1.0 - latency_weight) * price_score + latency_weight * latency_score;
            scored.push((venue_bbo.venue, combined, price));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        match scored.first() {
            Some(&(venue, _, price)) => {
                let mut decision = RoutingDecision::new(venue, "balanced routing (price + latency)");
                decision.expected_price = price;
                decision.expected_latency = self.latency.expected_latency(venue);
                decision.fallback_venues = scored.iter().skip(1).map(|&(v, _, _)| v).collect();
                Some(decision)
            }
            None => self.default_decision("default venue (no scoring data)"),
        }
    }

    fn connected_venues(&self) -> Vec<Venue> {
        let adapters = self.adapters.read();
        let mut venues: Vec<Venue> = adapters
            .iter()
            .filter(|(_, a)| a.is_connected())
            .map(|(v, _)| *v)
            .collect();
        venues.sort();
        venues
    }

    fn select_round_robin(&self) -> Option<RoutingDecision> {
        let venues = self.connected_venues();
        if venues.is_empty() {
            return None;
        }
        let mut routing = self.routing.lock();
        routing.round_robin_index = (routing.round_robin_index + 1) % venues.len();
        let idx = routing.round_robin_index;
        drop(routing);

        let mut decision = RoutingDecision::new(venues[idx], "round-robin routing");
        decision.fallback_venues = venues
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != idx)
            .map(|(_, &v)| v)
            .collect();
        Some(decision)
    }

    fn select_weighted_random(&self) -> Option<RoutingDecision> {
        let venues = self.connected_venues();
        if venues.is_empty() {
            return None;
        }

        let weights: Vec<f64> = {
            let routing = self.routing.lock();
            venues
                .iter()
                .map(|v| routing.venue_weights.get(v).copied().unwrap_or(1.0))
                .collect()
        };
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }

        let draw = rand::thread_rng().gen_range(0.0..total);
        let mut cumulative = 0.0;
        let mut selected = venues[venues.len() - 1];
        for (venue, weight) in venues.iter().zip(&weights) {
            cumulative += weight;
            if draw <= cumulative {
                selected = *venue;
                break;
            }
        }

        let mut decision = RoutingDecision::new(selected, "weighted random routing");
        decision.fallback_venues = venues.into_iter().filter(|&v| v != selected).collect();
        Some(decision)
    }

    // ---------------------------------------------------------------
    // Health
    // ---------------------------------------------------------------

    pub fn exchange_status(&self, venue: Venue) -> ExchangeStatus {
        let adapter = self.adapter(venue);
        match adapter {
            Some(adapter) => {
                let is_healthy = self.latency.is_healthy(venue, HEALTHY_MAX_LATENCY);
                ExchangeStatus {
                    venue,
                    is_connected: adapter.is_connected(),
                    is_healthy,
                    latency: self.latency.stats(venue),
                    status_message: if is_healthy { "OK" } else { "Degraded" }.to_string(),
                }
            }
            None => ExchangeStatus {
                venue,
                is_connected: false,
                is_healthy: false,
                latency: None,
                status_message: "Not registered".to_string(),
            },
        }
    }

    pub fn all_exchange_status(&self) -> Vec<ExchangeStatus> {
        self.registered_venues()
            .into_iter()
            .map(|venue| self.exchange_status(venue))
            .collect()
    }

    /// Sweep book staleness and report per-venue status through the
    /// status callback.
    pub fn check_health(&self, now_ns: i64) {
        for book in self.books.iter() {
            book.check_staleness(now_ns);
        }
        if let Some(callback) = self.status_callback.read().as_ref() {
            for status in self.all_exchange_status() {
                callback(&status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;
    use approx::assert_relative_eq;

    fn coordinator_with(venues: &[Venue]) -> ExchangeCoordinator {
        let coordinator = ExchangeCoordinator::default();
        for &venue in venues {
            coordinator.register_adapter(venue, Arc::new(MockAdapter::new(venue)));
        }
        coordinator
    }

    fn sym() -> Symbol {
        Symbol::from("BTCUSDT")
    }

    #[test]
    fn test_register_and_list() {
        let coordinator = coordinator_with(&[Venue::Binance, Venue::Okx]);
        assert!(coordinator.has_adapter(Venue::Binance));
        assert!(!coordinator.has_adapter(Venue::Kraken));
        assert_eq!(
            coordinator.registered_venues(),
            vec![Venue::Binance, Venue::Okx]
        );
    }

    #[test]
    fn test_best_price_buy_picks_lowest_ask() {
        let coordinator = coordinator_with(&[Venue::Binance, Venue::Okx]);
        coordinator.update_bbo(Venue::Binance, &sym(), 50_000.0, 1.0, 50_100.0, 1.0, 1);
        coordinator.update_bbo(Venue::Okx, &sym(), 50_050.0, 1.0, 50_080.0, 1.0, 1);

        let decision = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_eq!(decision.selected_venue, Venue::Okx);
        assert_relative_eq!(decision.expected_price, 50_080.0);
        assert_eq!(decision.fallback_venues, vec![Venue::Binance]);
    }

    #[test]
    fn test_best_price_sell_picks_highest_bid() {
        let coordinator = coordinator_with(&[Venue::Binance, Venue::Okx]);
        coordinator.update_bbo(Venue::Binance, &sym(), 50_000.0, 1.0, 50_100.0, 1.0, 1);
        coordinator.update_bbo(Venue::Okx, &sym(), 50_050.0, 1.0, 50_080.0, 1.0, 1);

        let decision = coordinator.select_venue(&sym(), Side::Sell, 1.0).unwrap();
        assert_eq!(decision.selected_venue, Venue::Okx);
        assert_relative_eq!(decision.expected_price, 50_050.0);
    }

    #[test]
    fn test_no_book_falls_back_to_default() {
        let coordinator = coordinator_with(&[Venue::Binance]);
        assert!(coordinator.select_venue(&sym(), Side::Buy, 1.0).is_none());

        coordinator.set_default_venue(Venue::Binance);
        let decision = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_eq!(decision.selected_venue, Venue::Binance);
        assert!(decision.rationale.contains("no book data"));
    }

    #[test]
    fn test_lowest_latency_prefers_fast_connected() {
        let coordinator = coordinator_with(&[Venue::Binance, Venue::Okx]);
        coordinator.set_routing_strategy(RoutingStrategy::LowestLatency);
        let now = Instant::now();
        for _ in 0..5 {
            coordinator.record_latency(Venue::Binance, Duration::from_millis(50), now);
            coordinator.record_latency(Venue::Okx, Duration::from_millis(5), now);
        }

        let decision = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_eq!(decision.selected_venue, Venue::Okx);
        assert_eq!(decision.fallback_venues, vec![Venue::Binance]);
    }

    #[test]
    fn test_balanced_weighs_price_and_latency() {
        let coordinator = coordinator_with(&[Venue::Binance, Venue::Okx]);
        coordinator.set_routing_strategy(RoutingStrategy::Balanced);
        // Pure price weighting: cheaper ask wins regardless of latency
        coordinator.set_latency_weight(0.0);
        coordinator.update_bbo(Venue::Binance, &sym(), 50_000.0, 1.0, 50_090.0, 1.0, 1);
        coordinator.update_bbo(Venue::Okx, &sym(), 50_050.0, 1.0, 50_080.0, 1.0, 1);
        let now = Instant::now();
        for _ in 0..5 {
            coordinator.record_latency(Venue::Binance, Duration::from_millis(1), now);
            coordinator.record_latency(Venue::Okx, Duration::from_millis(100), now);
        }

        let decision = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_eq!(decision.selected_venue, Venue::Okx);

        // Pure latency weighting flips the choice
        coordinator.set_latency_weight(1.0);
        let decision = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_eq!(decision.selected_venue, Venue::Binance);
    }

    #[test]
    fn test_round_robin_rotates() {
        let coordinator = coordinator_with(&[Venue::Binance, Venue::Okx]);
        coordinator.set_routing_strategy(RoutingStrategy::RoundRobin);

        let first = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        let second = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_ne!(first.selected_venue, second.selected_venue);
        let third = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
        assert_eq!(first.selected_venue, third.selected_venue);
    }

    #[test]
    fn test_weighted_random_respects_connection() {
        let coordinator = ExchangeCoordinator::default();
        let binance = Arc::new(MockAdapter::new(Venue::Binance));
        let okx = Arc::new(MockAdapter::new(Venue::Okx));
        okx.disconnect();
        coordinator.register_adapter(Venue::Binance, binance);
        coordinator.register_adapter(Venue::Okx, okx);
        coordinator.set_routing_strategy(RoutingStrategy::WeightedRandom);

        for _ in 0..20 {
            let decision = coordinator.select_venue(&sym(), Side::Buy, 1.0).unwrap();
            assert_eq!(decision.selected_venue, Venue::Binance);
        }
    }

    #[test]
    fn test_place_records_latency_and_position() {
        let coordinator = ExchangeCoordinator::default();
        let adapter = Arc::new(MockAdapter::new(Venue::Binance).fill_at(50_000.0));
        coordinator.register_adapter(Venue::Binance, adapter);

        let request = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "c1");
        let report = coordinator.place_order(Venue::Binance, &request).unwrap();
        assert_eq!(report.status, OrderStatus::Filled);

        assert!(coordinator.latency_stats(Venue::Binance).is_some());
        let pos = coordinator
            .positions()
            .position(Venue::Binance, &sym())
            .unwrap();
        assert_relative_eq!(pos.size, 1.0);
    }

    #[test]
    fn test_place_on_unknown_venue() {
        let coordinator = ExchangeCoordinator::default();
        let request = PlaceOrderRequest::limit("BTCUSDT", Side::Buy, 1.0, 50_000.0, "c1");
        assert!(coordinator.place_order(Venue::Kraken, &request).is_none());
    }

    #[test]
    fn test_exchange_status() {
        let coordinator = coordinator_with(&[Venue::Binance]);
        let status = coordinator.exchange_status(Venue::Binance);
        assert!(status.is_connected);
        // No samples yet: not healthy
        assert!(!status.is_healthy);
        assert_eq!(status.status_message, "Degraded");

        let status = coordinator.exchange_status(Venue::Kraken);
        assert!(!status.is_connected);
        assert_eq!(status.status_message, "Not registered");
    }

    #[test]
    fn test_check_health_flags_stale_books() {
        let coordinator = coordinator_with(&[Venue::Binance]);
        coordinator.update_bbo(Venue::Binance, &sym(), 50_000.0, 1.0, 50_100.0, 1.0, 0);
        coordinator.check_health(60_000_000_000);

        let bbo = coordinator.aggregated_bbo(&sym()).unwrap();
        assert!(bbo.venues.is_empty(), "stale venue still aggregated");
    }
}
