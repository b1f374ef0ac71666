//! Multi-venue execution: adapter interface, aggregated order book,
//! latency tracking, exchange coordination and smart order routing.

pub mod adapter;
pub mod book;
pub mod coordinator;
pub mod latency;
pub mod router;

pub use adapter::{ExchangeAdapter, ReconciliationQuery};
pub use book::{AggregatedBbo, AggregatedBook, AggregatedLevel, BookSnapshot, PriceLevel, VenueBbo};
pub use coordinator::{ExchangeCoordinator, ExchangeStatus, RoutingStrategy};
pub use latency::{LatencyStats, LatencyTracker};
pub use router::{
    BatchOrderRequest, BatchOrderResult, CancelMergeRequest, ExchangeFees, ExecutionAnalytics,
    ExecutionQuality, OrderSplit, RoutingScore, SmartOrderRouter,
};

use crate::core::Venue;
use std::time::Duration;

/// Outcome of venue selection
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub selected_venue: Venue,
    pub expected_price: f64,
    pub expected_latency: Option<Duration>,
    pub rationale: String,
    pub fallback_venues: Vec<Venue>,
}

impl RoutingDecision {
    pub fn new(selected_venue: Venue, rationale: impl Into<String>) -> Self {
        Self {
            selected_venue,
            expected_price: 0.0,
            expected_latency: None,
            rationale: rationale.into(),
            fallback_venues: Vec::new(),
        }
    }
}
