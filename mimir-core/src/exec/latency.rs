//! Per-venue round-trip latency tracking.
//!
//! Samples live in a window bounded both by count and by age; both
//! bounds are enforced on every insert, and the summary statistics are
//! recomputed afterwards so readers never see stale percentiles.

use crate::config::LatencyWindowConfig;
use crate::core::Venue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Summary statistics over the current sample window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub sample_count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub last_update: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    latency: Duration,
    timestamp: Instant,
}

#[derive(Debug, Default)]
struct VenueWindow {
    samples: Vec<Sample>,
    stats: Option<LatencyStats>,
}

/// Bounded-window latency tracker for every registered venue
pub struct LatencyTracker {
    config: LatencyWindowConfig,
    venues: RwLock<HashMap<Venue, VenueWindow>>,
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(LatencyWindowConfig::default())
    }
}

impl LatencyTracker {
    pub fn new(config: LatencyWindowConfig) -> Self {
        Self {
            config,
            venues: RwLock::new(HashMap::new()),
        }
    }

    /// Record one round-trip sample and refresh the venue's statistics.
    pub fn record(&self, venue: Venue, latency: Duration, timestamp: Instant) {
        let mut venues = self.venues.write();
        let window = venues.entry(venue).or_default();

        window.samples.push(Sample { latency, timestamp });

        // Count bound
        if window.samples.len() > self.config.window_size {
            let excess = window.samples.len() - self.config.window_size;
            window.samples.drain(..excess);
        }
        // Age bound
        if let Some(cutoff) = timestamp.checked_sub(self.config.window_duration) {
            window.samples.retain(|s| s.timestamp >= cutoff);
        }

        window.stats = compute_stats(&window.samples, timestamp);
    }

    pub fn stats(&self, venue: Venue) -> Option<LatencyStats> {
        let venues = self.venues.read();
        venues.get(&venue).and_then(|w| w.stats.clone())
    }

    /// Expected latency is the p50 of the current window.
    pub fn expected_latency(&self, venue: Venue) -> Option<Duration> {
        self.stats(venue).map(|s| s.p50)
    }

    /// Venues ordered by ascending p50.
    pub fn venues_by_latency(&self) -> Vec<Venue> {
        let venues = self.venues.read();
        let mut with_latency: Vec<(Venue, Duration)> = venues
            .iter()
            .filter_map(|(venue, w)| w.stats.as_ref().map(|s| (*venue, s.p50)))
            .collect();
        with_latency.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        with_latency.into_iter().map(|(v, _)| v).collect()
    }

    /// Healthy requires at least 5 samples in the window and p95 within
    /// the given bound. The window's age bound handles staleness: old
    /// samples fall out of the window on insert.
    pub fn is_healthy(&self, venue: Venue, max_latency: Duration) -> bool {
        match self.stats(venue) {
            Some(stats) => stats.sample_count >= 5 && stats.p95 <= max_latency,
            None => false,
        }
    }

    pub fn clear(&self, venue: Venue) {
        self.venues.write().remove(&venue);
    }

    pub fn clear_all(&self) {
        self.venues.write().clear();
    }
}

fn compute_stats(samples: &[Sample], now: Instant) -> Option<LatencyStats> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted: Vec<Duration> = samples.iter().map(|s| s.latency).collect();
    sorted.sort();

    let total: Duration = sorted.iter().sum();
    let percentile = |p: f64| -> Duration {
        let idx = (p * (sorted.len() - 1) as f64) as usize;
        sorted[idx]
    };

    Some(LatencyStats {
        sample_count: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: total / sorted.len() as u32,
        p50: percentile(0.50),
        p95: percentile(0.95),
        p99: percentile(0.99),
        last_update: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_stats_after_inserts() {
        let tracker = LatencyTracker::default();
        let now = Instant::now();
        for v in [10, 20, 30, 40, 50] {
            tracker.record(Venue::Binance, ms(v), now);
        }

        let stats = tracker.stats(Venue::Binance).unwrap();
        assert_eq!(stats.sample_count, 5);
        assert_eq!(stats.min, ms(10));
        assert_eq!(stats.max, ms(50));
        assert_eq!(stats.mean, ms(30));
        assert_eq!(stats.p50, ms(30));
        assert_eq!(stats.p95, ms(40));
        assert_eq!(stats.p99, ms(40));
    }

    #[test]
    fn test_count_bound_enforced() {
        let config = LatencyWindowConfig {
            window_size: 3,
            window_duration: Duration::from_secs(3600),
        };
        let tracker = LatencyTracker::new(config);
        let now = Instant::now();
        for v in [10, 20, 30, 40, 50] {
            tracker.record(Venue::Binance, ms(v), now);
        }
        let stats = tracker.stats(Venue::Binance).unwrap();
        assert_eq!(stats.sample_count, 3);
        assert_eq!(stats.min, ms(30));
    }

    #[test]
    fn test_age_bound_enforced() {
        let config = LatencyWindowConfig {
            window_size: 100,
            window_duration: Duration::from_secs(10),
        };
        let tracker = LatencyTracker::new(config);
        let start = Instant::now();
        tracker.record(Venue::Binance, ms(10), start);
        // 20 seconds later, the first sample ages out on insert.
        tracker.record(Venue::Binance, ms(30), start + Duration::from_secs(20));
        let stats = tracker.stats(Venue::Binance).unwrap();
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.min, ms(30));
    }

    #[test]
    fn test_venues_by_latency() {
        let tracker = LatencyTracker::default();
        let now = Instant::now();
        for _ in 0..5 {
            tracker.record(Venue::Binance, ms(50), now);
            tracker.record(Venue::Okx, ms(10), now);
            tracker.record(Venue::Bybit, ms(30), now);
        }
        assert_eq!(
            tracker.venues_by_latency(),
            vec![Venue::Okx, Venue::Bybit, Venue::Binance]
        );
    }

    #[test]
    fn test_health_requires_five_samples() {
        let tracker = LatencyTracker::default();
        let now = Instant::now();
        for _ in 0..4 {
            tracker.record(Venue::Binance, ms(10), now);
        }
        assert!(!tracker.is_healthy(Venue::Binance, ms(100)));
        tracker.record(Venue::Binance, ms(10), now);
        assert!(tracker.is_healthy(Venue::Binance, ms(100)));
    }

    #[test]
    fn test_health_requires_p95_bound() {
        let tracker = LatencyTracker::default();
        let now = Instant::now();
        for _ in 0..20 {
            tracker.record(Venue::Binance, ms(500), now);
        }
        assert!(!tracker.is_healthy(Venue::Binance, ms(100)));
        assert!(tracker.is_healthy(Venue::Binance, ms(1000)));
    }

    #[test]
    fn test_unknown_venue() {
        let tracker = LatencyTracker::default();
        assert!(tracker.stats(Venue::Kraken).is_none());
        assert!(tracker.expected_latency(Venue::Kraken).is_none());
        assert!(!tracker.is_healthy(Venue::Kraken, ms(100)));
    }
}
