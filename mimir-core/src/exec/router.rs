//! Smart order router.
//!
//! Wraps the coordinator with a five-factor venue score (price, fee,
//! latency, liquidity, reliability), order splitting across venues,
//! batch execution and merged cancels, and keeps per-venue execution
//! quality plus aggregate analytics.
//!
//! Lock discipline: router state is snapshotted before any coordinator
//! call; the router never calls into the coordinator while holding its
//! own lock.

use crate::config::RouterConfig;
use crate::core::{
    CancelOrderRequest, ExecutionReport, OrderStatus, OrderType, PlaceOrderRequest, RejectReason,
    Side, Symbol, TimeInForce, Venue,
};
use crate::exec::coordinator::ExchangeCoordinator;
use crate::exec::RoutingDecision;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-venue fee schedule (fractions, e.g. 0.001 = 0.1 %)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExchangeFees {
    pub maker_fee: f64,
    pub taker_fee: f64,
}

/// Score breakdown for one venue, components in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingScore {
    pub venue: Venue,
    pub price_score: f64,
    pub fee_score: f64,
    pub latency_score: f64,
    pub liquidity_score: f64,
    pub reliability_score: f64,
    pub total_score: f64,
    pub explanation: String,
}

/// One slice of a split order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSplit {
    pub venue: Venue,
    pub quantity: f64,
    pub expected_price: f64,
    pub expected_fee: f64,
}

/// A batch of order intents, executed sequentially
#[derive(Debug, Clone)]
pub struct BatchOrderRequest {
    pub orders: Vec<PlaceOrderRequest>,
    /// Stop at the first failure. The caller owns any remedial cancels;
    /// no multi-venue rollback is attempted here.
    pub atomic: bool,
}

/// Outcome of a batch execution
#[derive(Debug, Default)]
pub struct BatchOrderResult {
    pub reports: Vec<Option<ExecutionReport>>,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Per-venue, per-symbol bulk cancel
#[derive(Debug, Clone)]
pub struct CancelMergeRequest {
    pub venue: Venue,
    pub symbol: Symbol,
    pub client_order_ids: Vec<String>,
}

/// Averaged execution quality for one venue
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionQuality {
    pub slippage: f64,
    pub fill_rate: f64,
    pub execution_time: Duration,
}

/// Aggregate router analytics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionAnalytics {
    pub total_orders: u64,
    pub filled_orders: u64,
    pub partial_fills: u64,
    pub rejected_orders: u64,
    pub total_volume: f64,
    pub total_fees: f64,
    pub average_slippage: f64,
    pub average_fill_rate: f64,
    pub average_execution_time: Duration,
}

#[derive(Debug, Clone, Default)]
struct VenueQuality {
    sample_count: u64,
    success_count: u64,
    failure_count: u64,
    total_slippage: f64,
    total_fill_rate: f64,
    total_execution_time_ns: u64,
}

struct RouterState {
    weights: RouterConfig,
    fees: HashMap<Venue, ExchangeFees>,
    min_order_sizes: HashMap<Venue, f64>,
    quality: HashMap<Venue, VenueQuality>,
    analytics: ExecutionAnalytics,
}

/// Scoring-based order router over an [`ExchangeCoordinator`]
pub struct SmartOrderRouter {
    coordinator: Arc<ExchangeCoordinator>,
    state: RwLock<RouterState>,
}

impl SmartOrderRouter {
    pub fn new(coordinator: Arc<ExchangeCoordinator>) -> Self {
        Self::with_config(coordinator, RouterConfig::default())
    }

    pub fn with_config(coordinator: Arc<ExchangeCoordinator>, weights: RouterConfig) -> Self {
        Self {
            coordinator,
            state: RwLock::new(RouterState {
                weights,
                fees: HashMap::new(),
                min_order_sizes: HashMap::new(),
                quality: HashMap::new(),
                analytics: ExecutionAnalytics::default(),
            }),
        }
    }

    pub fn coordinator(&self) -> &Arc<ExchangeCoordinator> {
        &self.coordinator
    }

    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------

    pub fn set_fees(&self, venue: Venue, fees: ExchangeFees) {
        self.state.write().fees.insert(venue, fees);
    }

    pub fn fees(&self, venue: Venue) -> Option<ExchangeFees> {
        self.state.read().fees.get(&venue).copied()
    }

    pub fn set_min_order_size(&self, venue: Venue, size: f64) {
        self.state.write().min_order_sizes.insert(venue, size);
    }

    pub fn min_order_size(&self, venue: Venue) -> f64 {
        self.state
            .read()
            .min_order_sizes
            .get(&venue)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set_price_weight(&self, weight: f64) {
        self.state.write().weights.price_weight = weight.clamp(0.0, 1.0);
    }

    pub fn set_fee_weight(&self, weight: f64) {
        self.state.write().weights.fee_weight = weight.clamp(0.0, 1.0);
    }

    pub fn set_latency_weight(&self, weight: f64) {
        self.state.write().weights.latency_weight = weight.clamp(0.0, 1.0);
    }

    pub fn set_liquidity_weight(&self, weight: f64) {
        self.state.write().weights.liquidity_weight = weight.clamp(0.0, 1.0);
    }

    pub fn set_reliability_weight(&self, weight: f64) {
        self.state.write().weights.reliability_weight = weight.clamp(0.0, 1.0);
    }

    // ---------------------------------------------------------------
    // Scoring
    // ---------------------------------------------------------------

    /// Score every registered venue for `(symbol, side, qty)`, sorted by
    /// total score descending. Venues without a usable price are left
    /// out.
    pub fn score_venues(&self, symbol: &Symbol, side: Side, qty: f64) -> Vec<RoutingScore> {
        // Snapshot router state before touching the coordinator.
        let (weights, fees, quality) = {
            let state = self.state.read();
            (
                state.weights.clone(),
                state.fees.clone(),
                state.quality.clone(),
            )
        };

        let venues = self.coordinator.registered_venues();
        if venues.is_empty() {
            return Vec::new();
        }
        let Some(bbo) = self.coordinator.aggregated_bbo(symbol) else {
            return Vec::new();
        };

        let reference_price = match side {
            Side::Buy => bbo.best_ask_price,
            Side::Sell => bbo.best_bid_price,
        };
        if reference_price <= 0.0 {
            return Vec::new();
        }

        let mut scores = Vec::new();
        for venue in venues {
            let venue_bbo = bbo.venues.iter().find(|v| v.venue == venue && !v.is_stale);
            let Some(venue_bbo) = venue_bbo else { continue };

            let (venue_price, available) = match side {
                Side::Buy => (venue_bbo.ask_price, venue_bbo.ask_qty),
                Side::Sell => (venue_bbo.bid_price, venue_bbo.bid_qty),
            };
            if venue_price <= 0.0 {
                continue;
            }

            let price_score = match side {
                Side::Buy => reference_price / venue_price,
                Side::Sell => venue_price / reference_price,
            }
            .clamp(0.0, 1.0);

            // Heuristic mapping: 0.1 % fee scores 0.9, anything >= 1 %
            // scores zero.
            let taker_fee = fees
                .get(&venue)
                .map(|f| f.taker_fee)
                .unwrap_or(weights.default_taker_fee);
            let fee_score = (1.0 - taker_fee * 100.0).max(0.0);

            let latency_score = match self.coordinator.latency_stats(venue) {
                Some(stats) => (1.0 - stats.p50.as_secs_f64() * 1000.0 / 100.0).max(0.0),
                None => 0.5,
            };

            let liquidity_score = if available <= 0.0 {
                0.0
            } else {
                (available / qty).min(1.0)
            };

            let reliability_score = match quality.get(&venue) {
                Some(q) if q.success_count + q.failure_count > 0 => {
                    q.success_count as f64 / (q.success_count + q.failure_count) as f64
                }
                _ => 0.5,
            };

            let total_score = weights.price_weight * price_score
                + weights.fee_weight * fee_score
                + weights.latency_weight * latency_score
                + weights.liquidity_weight * liquidity_score
                + weights.reliability_weight * reliability_score;

            let explanation = format!(
                "Price: {}%, Fee: {}%, Latency: {}%, Liquidity: {}%, Reliability: {}%",
                (price_score * 100.0) as i32,
                (fee_score * 100.0) as i32,
                (latency_score * 100.0) as i32,
                (liquidity_score * 100.0) as i32,
                (reliability_score * 100.0) as i32,
            );

            scores.push(RoutingScore {
                venue,
                price_score,
                fee_score,
                latency_score,
                liquidity_score,
                reliability_score,
                total_score,
                explanation,
            });
        }

        scores.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores
    }

    /// Routing decision from the top-scored venue.
    pub fn route(&self, request: &PlaceOrderRequest) -> Option<RoutingDecision> {
        let scores = self.score_venues(&request.symbol, request.side, request.qty);
        let top = scores.first()?;

        let mut decision = RoutingDecision::new(
            top.venue,
            format!("Smart routing: {}", top.explanation),
        );
        if let Some(bbo) = self.coordinator.aggregated_bbo(&request.symbol) {
            if let Some(v) = bbo.venues.iter().find(|v| v.venue == top.venue) {
                decision.expected_price = match request.side {
                    Side::Buy => v.ask_price,
                    Side::Sell => v.bid_price,
                };
            }
        }
        decision.expected_latency = self.coordinator.latency_stats(top.venue).map(|s| s.p50);
        decision.fallback_venues = scores.iter().skip(1).map(|s| s.venue).collect();
        Some(decision)
    }

    // ---------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------

    /// Execute on the top-scored venue, falling back through the rest
    /// when an adapter yields no report. Business rejections are final.
    pub fn execute(&self, request: &PlaceOrderRequest) -> Result<ExecutionReport, RejectReason> {
        let Some(decision) = self.route(request) else {
            return Err(RejectReason::NoExecutionReportFromRouter);
        };

        let expected_prices = self.expected_prices(&request.symbol, request.side);
        let mut venues = vec![decision.selected_venue];
        venues.extend(decision.fallback_venues.iter().copied());

        for venue in venues {
            let expected = expected_prices
                .get(&venue)
                .copied()
                .unwrap_or(decision.expected_price);

            let start = Instant::now();
            let result = self.coordinator.place_order(venue, request);
            let elapsed = start.elapsed();

            match result {
                Some(report) => {
                    self.record_execution(venue, &report, request.qty, expected, elapsed);
                    return Ok(report);
                }
                None => {
                    warn!(venue = %venue, "no execution report, trying fallback");
                    self.record_failure(venue);
                }
            }
        }

        Err(RejectReason::NoExecutionReportFromRouter)
    }

    /// Split a quantity over the score list. Each venue receives at most
    /// `qty * max_single_venue_pct` and at most 80 % of its visible
    /// top-of-book liquidity; allocations under the venue's minimum
    /// order size are skipped.
    pub fn split_order(
        &self,
        symbol: &Symbol,
        side: Side,
        qty: f64,
        max_single_venue_pct: f64,
    ) -> Vec<OrderSplit> {
        let scores = self.score_venues(symbol, side, qty);
        if scores.is_empty() {
            return Vec::new();
        }

        let (fees, min_sizes, default_taker_fee) = {
            let state = self.state.read();
            (
                state.fees.clone(),
                state.min_order_sizes.clone(),
                state.weights.default_taker_fee,
            )
        };
        let Some(bbo) = self.coordinator.aggregated_bbo(symbol) else {
            return Vec::new();
        };

        let mut splits = Vec::new();
        let mut remaining = qty;
        let max_per_venue = qty * max_single_venue_pct;

        for score in &scores {
            if remaining <= 0.0 {
                break;
            }
            let Some(venue_bbo) = bbo
                .venues
                .iter()
                .find(|v| v.venue == score.venue && !v.is_stale)
            else {
                continue;
            };

            let (price, available) = match side {
                Side::Buy => (venue_bbo.ask_price, venue_bbo.ask_qty),
                Side::Sell => (venue_bbo.bid_price, venue_bbo.bid_qty),
            };

            // Leave some visible liquidity on the book.
            let allocation = remaining.min(max_per_venue).min(available * 0.8);
            let min_size = min_sizes.get(&score.venue).copied().unwrap_or(0.0);
            if allocation < min_size || allocation <= 0.0 {
                continue;
            }

            let taker_fee = fees
                .get(&score.venue)
                .map(|f| f.taker_fee)
                .unwrap_or(default_taker_fee);

            splits.push(OrderSplit {
                venue: score.venue,
                quantity: allocation,
                expected_price: price,
                expected_fee: allocation * price * taker_fee,
            });
            remaining -= allocation;
        }

        debug!(
            symbol = %symbol,
            requested = qty,
            allocated = qty - remaining,
            venues = splits.len(),
            "order split"
        );
        splits
    }

    /// Execute a split: one child limit order per slice, client ids
    /// suffixed `-0`, `-1`, ...
    pub fn execute_split(
        &self,
        symbol: &Symbol,
        side: Side,
        qty: f64,
        max_single_venue_pct: f64,
        client_order_id_prefix: &str,
    ) -> Vec<Option<ExecutionReport>> {
        let splits = self.split_order(symbol, side, qty, max_single_venue_pct);
        let mut results = Vec::with_capacity(splits.len());

        for (index, split) in splits.iter().enumerate() {
            let request = PlaceOrderRequest {
                symbol: symbol.clone(),
                side,
                order_type: OrderType::Limit,
                tif: TimeInForce::Gtc,
                qty: split.quantity,
                price: Some(split.expected_price),
                client_order_id: format!("{}-{}", client_order_id_prefix, index),
                reduce_only: false,
                post_only: false,
            };

            let start = Instant::now();
            let result = self.coordinator.place_order(split.venue, &request);
            let elapsed = start.elapsed();

            match &result {
                Some(report) => self.record_execution(
                    split.venue,
                    report,
                    split.quantity,
                    split.expected_price,
                    elapsed,
                ),
                None => self.record_failure(split.venue),
            }
            results.push(result);
        }
        results
    }

    /// Execute a batch sequentially. With `atomic` set, the sequence
    /// stops at the first failure; remedial cancels are the caller's
    /// responsibility.
    pub fn execute_batch(&self, batch: &BatchOrderRequest) -> BatchOrderResult {
        let mut result = BatchOrderResult::default();

        for request in &batch.orders {
            let outcome = self.execute(request);
            match outcome {
                Ok(report) => {
                    let ok = matches!(
                        report.status,
                        OrderStatus::New
                            | OrderStatus::Accepted
                            | OrderStatus::PartiallyFilled
                            | OrderStatus::Filled
                    );
                    if ok {
                        result.success_count += 1;
                    } else {
                        result.failure_count += 1;
                    }
                    result.reports.push(Some(report));
                    if !ok && batch.atomic {
                        break;
                    }
                }
                Err(reason) => {
                    info!(reason = %reason, "batch order failed");
                    result.failure_count += 1;
                    result.reports.push(None);
                    if batch.atomic {
                        break;
                    }
                }
            }
        }
        result
    }

    /// Bulk-cancel expressed per venue and symbol. Without a native bulk
    /// API on the adapter this degrades to one cancel per id.
    pub fn cancel_merged(&self, request: &CancelMergeRequest) -> Vec<Option<ExecutionReport>> {
        request
            .client_order_ids
            .iter()
            .map(|client_order_id| {
                let cancel = CancelOrderRequest {
                    symbol: request.symbol.clone(),
                    client_order_id: client_order_id.clone(),
                };
                self.coordinator.cancel_order(request.venue, &cancel)
            })
            .collect()
    }

    /// Fee-inclusive effective price for a venue.
    pub fn effective_price(&self, venue: Venue, price: f64, side: Side) -> f64 {
        let state = self.state.read();
        let fee = state
            .fees
            .get(&venue)
            .map(|f| f.taker_fee)
            .unwrap_or(state.weights.default_taker_fee);
        match side {
            Side::Buy => price * (1.0 + fee),
            Side::Sell => price * (1.0 - fee),
        }
    }

    // ---------------------------------------------------------------
    // Quality & analytics
    // ---------------------------------------------------------------

    fn record_execution(
        &self,
        venue: Venue,
        report: &ExecutionReport,
        requested_qty: f64,
        expected_price: f64,
        execution_time: Duration,
    ) {
        let taker_fee = {
            let state = self.state.read();
            state
                .fees
                .get(&venue)
                .map(|f| f.taker_fee)
                .unwrap_or(state.weights.default_taker_fee)
        };

        let mut state = self.state.write();
        let quality = state.quality.entry(venue).or_default();
        quality.sample_count += 1;
        quality.total_execution_time_ns += execution_time.as_nanos() as u64;

        match report.status {
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                quality.success_count += 1;
                if expected_price > 0.0 && report.last_fill_price > 0.0 {
                    quality.total_slippage +=
                        (report.last_fill_price - expected_price).abs() / expected_price;
                }
                let fill_rate = if report.status == OrderStatus::Filled {
                    1.0
                } else if requested_qty > 0.0 {
                    (report.last_fill_qty / requested_qty).min(1.0)
                } else {
                    0.0
                };
                quality.total_fill_rate += fill_rate;
            }
            OrderStatus::Rejected => {
                quality.failure_count += 1;
            }
            _ => {}
        }

        state.analytics.total_orders += 1;
        match report.status {
            OrderStatus::Filled => {
                state.analytics.filled_orders += 1;
                let volume = report.last_fill_qty * report.last_fill_price;
                state.analytics.total_volume += volume;
                state.analytics.total_fees += volume * taker_fee;
            }
            OrderStatus::PartiallyFilled => {
                state.analytics.partial_fills += 1;
                let volume = report.last_fill_qty * report.last_fill_price;
                state.analytics.total_volume += volume;
                state.analytics.total_fees += volume * taker_fee;
            }
            OrderStatus::Rejected => {
                state.analytics.rejected_orders += 1;
            }
            _ => {}
        }
    }

    fn record_failure(&self, venue: Venue) {
        let mut state = self.state.write();
        let quality = state.quality.entry(venue).or_default();
        quality.sample_count += 1;
        quality.failure_count += 1;
        state.analytics.total_orders += 1;
        state.analytics.rejected_orders += 1;
    }

    /// Averaged quality for one venue, if any samples exist.
    pub fn venue_quality(&self, venue: Venue) -> Option<ExecutionQuality> {
        let state = self.state.read();
        let quality = state.quality.get(&venue)?;
        if quality.sample_count == 0 {
            return None;
        }
        let n = quality.sample_count as f64;
        Some(ExecutionQuality {
            slippage: quality.total_slippage / n,
            fill_rate: quality.total_fill_rate / n,
            execution_time: Duration::from_nanos(
                quality.total_execution_time_ns / quality.sample_count,
            ),
        })
    }

    pub fn analytics(&self) -> ExecutionAnalytics {
        let state = self.state.read();
        let mut analytics = state.analytics.clone();

        let mut total_slippage = 0.0;
        let mut total_fill_rate = 0.0;
        let mut total_time_ns = 0u64;
        let mut samples = 0u64;
        for quality in state.quality.values() {
            if quality.sample_count > 0 {
                total_slippage += quality.total_slippage;
                total_fill_rate += quality.total_fill_rate;
                total_time_ns += quality.total_execution_time_ns;
                samples += quality.sample_count;
            }
        }
        if samples > 0 {
            analytics.average_slippage = total_slippage / samples as f64;
            analytics.average_fill_rate = total_fill_rate / samples as f64;
            analytics.average_execution_time = Duration::from_nanos(total_time_ns / samples);
        }
        analytics
    }

    pub fn reset_analytics(&self) {
        let mut state = self.state.write();
        state.analytics = ExecutionAnalytics::default();
        state.quality.clear();
    }

    fn expected_prices(&self, symbol: &Symbol, side: Side) -> HashMap<Venue, f64> {
        let mut prices = HashMap::new();
        if let Some(bbo) = self.coordinator.aggregated_bbo(symbol) {
            for v in &bbo.venues {
                let price = match side {
                    Side::Buy => v.ask_price,
                    Side::Sell => v.bid_price,
                };
                prices.insert(v.venue, price);
            }
        }
        prices
    }
}
