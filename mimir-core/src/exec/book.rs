//! Aggregated order book across venues for one symbol.
//!
//! Each venue contributes a slice (depth plus top-of-book) stamped with
//! its last update time; slices older than the staleness window are
//! flagged and excluded from aggregation. Merged depth uses an 8-decimal
//! scaled integer price key so equal prices from different venues land
//! on the same level regardless of float representation.

use crate::config::StalenessConfig;
use crate::core::Venue;
use parking_lot::RwLock;
use std::collections::HashMap;

/// One (price, qty) level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

impl PriceLevel {
    pub fn new(price: f64, qty: f64) -> Self {
        Self { price, qty }
    }
}

/// A venue's book contribution: bids descending, asks ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Top-of-book for one venue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VenueBbo {
    pub venue: Venue,
    pub bid_price: f64,
    pub bid_qty: f64,
    pub ask_price: f64,
    pub ask_qty: f64,
    pub timestamp_ns: i64,
    pub is_stale: bool,
}

/// Best bid/offer across all non-stale venues
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBbo {
    pub best_bid_price: f64,
    pub best_bid_qty: f64,
    pub best_bid_venue: Option<Venue>,
    pub best_ask_price: f64,
    pub best_ask_qty: f64,
    pub best_ask_venue: Option<Venue>,
    pub spread: f64,
    pub mid_price: f64,
    pub venues: Vec<VenueBbo>,
}

/// One merged price level with per-venue attribution
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedLevel {
    pub price: f64,
    pub total_qty: f64,
    pub venue_breakdown: Vec<(Venue, f64)>,
}

struct VenueSlice {
    venue: Venue,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    bbo: VenueBbo,
    last_update_ns: i64,
}

#[derive(Default)]
struct BookState {
    // Vec keeps venue insertion order for the BBO tie-break
    venues: Vec<VenueSlice>,
    weights: HashMap<Venue, f64>,
}

/// Aggregated order book for a single symbol
pub struct AggregatedBook {
    staleness: RwLock<StalenessConfig>,
    state: RwLock<BookState>,
}

impl Default for AggregatedBook {
    fn default() -> Self {
        Self::new(StalenessConfig::default())
    }
}

fn price_key(price: f64) -> i64 {
    (price * 1e8).round() as i64
}

impl AggregatedBook {
    pub fn new(staleness: StalenessConfig) -> Self {
        Self {
            staleness: RwLock::new(staleness),
            state: RwLock::new(BookState::default()),
        }
    }

    /// Replace a venue's full slice.
    pub fn update_venue(&self, venue: Venue, snapshot: &BookSnapshot, timestamp_ns: i64) {
        let mut state = self.state.write();
        let slice = entry(&mut state.venues, venue);

        slice.bids = snapshot.bids.clone();
        slice.asks = snapshot.asks.clone();
        slice.bbo = VenueBbo {
            venue,
            bid_price: snapshot.bids.first().map_or(0.0, |l| l.price),
            bid_qty: snapshot.bids.first().map_or(0.0, |l| l.qty),
            ask_price: snapshot.asks.first().map_or(0.0, |l| l.price),
            ask_qty: snapshot.asks.first().map_or(0.0, |l| l.qty),
            timestamp_ns,
            is_stale: false,
        };
        slice.last_update_ns = timestamp_ns;
    }

    /// Update only a venue's top-of-book.
    pub fn update_venue_bbo(
        &self,
        venue: Venue,
        bid_price: f64,
        bid_qty: f64,
        ask_price: f64,
        ask_qty: f64,
        timestamp_ns: i64,
    ) {
        let mut state = self.state.write();
        let slice = entry(&mut state.venues, venue);
        slice.bbo = VenueBbo {
            venue,
            bid_price,
            bid_qty,
            ask_price,
            ask_qty,
            timestamp_ns,
            is_stale: false,
        };
        slice.last_update_ns = timestamp_ns;
    }

    /// Flag a venue's slice stale immediately.
    pub fn mark_stale(&self, venue: Venue) {
        let mut state = self.state.write();
        if let Some(slice) = state.venues.iter_mut().find(|s| s.venue == venue) {
            slice.bbo.is_stale = true;
        }
    }

    /// Flag every venue whose last update is older than the staleness
    /// window.
    pub fn check_staleness(&self, now_ns: i64) {
        let max_age_ns = self.staleness.read().max_age.as_nanos() as i64;
        let mut state = self.state.write();
        for slice in &mut state.venues {
            if now_ns - slice.last_update_ns > max_age_ns {
                slice.bbo.is_stale = true;
            }
        }
    }

    pub fn remove_venue(&self, venue: Venue) {
        let mut state = self.state.write();
        state.venues.retain(|s| s.venue != venue);
    }

    /// Venue weight used for BBO tie-breaks (default 1.0).
    pub fn set_venue_weight(&self, venue: Venue, weight: f64) {
        self.state.write().weights.insert(venue, weight);
    }

    pub fn set_staleness_config(&self, config: StalenessConfig) {
        *self.staleness.write() = config;
    }

    /// Best bid is the maximum bid across non-stale venues; best ask the
    /// minimum ask. Ties break by venue weight, then insertion order.
    pub fn aggregated_bbo(&self) -> AggregatedBbo {
        let state = self.state.read();

        let mut result = AggregatedBbo {
            best_bid_price: 0.0,
            best_bid_qty: 0.0,
            best_bid_venue: None,
            best_ask_price: 0.0,
            best_ask_qty: 0.0,
            best_ask_venue: None,
            spread: 0.0,
            mid_price: 0.0,
            venues: Vec::new(),
        };

        let weight = |venue: Venue| state.weights.get(&venue).copied().unwrap_or(1.0);
        let mut best_bid_weight = 0.0;
        let mut best_ask_weight = 0.0;

        for slice in &state.venues {
            let bbo = slice.bbo;
            if bbo.is_stale {
                continue;
            }
            result.venues.push(bbo);

            if bbo.bid_qty > 0.0 {
                let bid_key = price_key(bbo.bid_price);
                let better = bid_key > price_key(result.best_bid_price)
                    || (result.best_bid_venue.is_some()
                        && bid_key == price_key(result.best_bid_price)
                        && weight(bbo.venue) > best_bid_weight);
                if result.best_bid_venue.is_none() && bbo.bid_price > 0.0 || better {
                    result.best_bid_price = bbo.bid_price;
                    result.best_bid_qty = bbo.bid_qty;
                    result.best_bid_venue = Some(bbo.venue);
                    best_bid_weight = weight(bbo.venue);
                }
            }

            if bbo.ask_qty > 0.0 && bbo.ask_price > 0.0 {
                let ask_key = price_key(bbo.ask_price);
                let better = match result.best_ask_venue {
                    None => true,
                    Some(_) => {
                        ask_key < price_key(result.best_ask_price)
                            || (ask_key == price_key(result.best_ask_price)
                                && weight(bbo.venue) > best_ask_weight)
                    }
                };
                if better {
                    result.best_ask_price = bbo.ask_price;
                    result.best_ask_qty = bbo.ask_qty;
                    result.best_ask_venue = Some(bbo.venue);
                    best_ask_weight = weight(bbo.venue);
                }
            }
        }

        if result.best_bid_price > 0.0 && result.best_ask_price > 0.0 {
            result.spread = result.best_ask_price - result.best_bid_price;
            result.mid_price = (result.best_bid_price + result.best_ask_price) / 2.0;
        }

        result
    }

    /// Merged bid depth: levels summed across non-stale venues, sorted
    /// descending, truncated to `depth`.
    pub fn aggregated_bids(&self, depth: usize) -> Vec<AggregatedLevel> {
        self.aggregate_side(depth, true)
    }

    /// Merged ask depth, ascending.
    pub fn aggregated_asks(&self, depth: usize) -> Vec<AggregatedLevel> {
        self.aggregate_side(depth, false)
    }

    fn aggregate_side(&self, depth: usize, bids: bool) -> Vec<AggregatedLevel> {
        let state = self.state.read();
        let mut levels: HashMap<i64, AggregatedLevel> = HashMap::new();

        for slice in &state.venues {
            if slice.bbo.is_stale {
                continue;
            }
            let side = if bids { &slice.bids } else { &slice.asks };
            for level in side.iter().take(depth) {
                let entry = levels.entry(price_key(level.price)).or_insert_with(|| {
                    AggregatedLevel {
                        price: level.price,
                        total_qty: 0.0,
                        venue_breakdown: Vec::new(),
                    }
                });
                entry.total_qty += level.qty;
                entry.venue_breakdown.push((slice.venue, level.qty));
            }
        }

        let mut sorted: Vec<(i64, AggregatedLevel)> = levels.into_iter().collect();
        if bids {
            sorted.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
        }
        sorted.into_iter().take(depth).map(|(_, l)| l).collect()
    }

    pub fn venue_bbo(&self, venue: Venue) -> Option<VenueBbo> {
        let state = self.state.read();
        state.venues.iter().find(|s| s.venue == venue).map(|s| s.bbo)
    }

    pub fn has_venue(&self, venue: Venue) -> bool {
        let state = self.state.read();
        state.venues.iter().any(|s| s.venue == venue)
    }

    pub fn venues(&self) -> Vec<Venue> {
        let state = self.state.read();
        state.venues.iter().map(|s| s.venue).collect()
    }

    pub fn clear(&self) {
        self.state.write().venues.clear();
    }
}

fn entry(venues: &mut Vec<VenueSlice>, venue: Venue) -> &mut VenueSlice {
    if let Some(idx) = venues.iter().position(|s| s.venue == venue) {
        return &mut venues[idx];
    }
    venues.push(VenueSlice {
        venue,
        bids: Vec::new(),
        asks: Vec::new(),
        bbo: VenueBbo {
            venue,
            bid_price: 0.0,
            bid_qty: 0.0,
            ask_price: 0.0,
            ask_qty: 0.0,
            timestamp_ns: 0,
            is_stale: false,
        },
        last_update_ns: 0,
    });
    venues.last_mut().expect("just pushed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bbo_across_venues() {
        let book = AggregatedBook::default();
        book.update_venue_bbo(Venue::Binance, 50_000.0, 1.0, 50_100.0, 1.0, 1);
        book.update_venue_bbo(Venue::Okx, 50_050.0, 2.0, 50_080.0, 2.0, 1);

        let bbo = book.aggregated_bbo();
        assert_relative_eq!(bbo.best_bid_price, 50_050.0);
        assert_eq!(bbo.best_bid_venue, Some(Venue::Okx));
        assert_relative_eq!(bbo.best_ask_price, 50_080.0);
        assert_eq!(bbo.best_ask_venue, Some(Venue::Okx));
        assert_relative_eq!(bbo.spread, 30.0);
        assert_relative_eq!(bbo.mid_price, 50_065.0);
        assert_eq!(bbo.venues.len(), 2);
    }

    #[test]
    fn test_bbo_sanity_bid_not_above_ask() {
        let book = AggregatedBook::default();
        book.update_venue_bbo(Venue::Binance, 50_000.0, 1.0, 50_100.0, 1.0, 1);
        book.update_venue_bbo(Venue::Okx, 49_900.0, 1.0, 50_010.0, 1.0, 1);
        let bbo = book.aggregated_bbo();
        assert!(bbo.best_bid_price <= bbo.best_ask_price);
    }

    #[test]
    fn test_stale_venue_excluded() {
        let book = AggregatedBook::default();
        book.update_venue_bbo(Venue::Binance, 50_000.0, 1.0, 50_100.0, 1.0, 1);
        book.update_venue_bbo(Venue::Okx, 50_050.0, 2.0, 50_080.0, 2.0, 1);
        book.mark_stale(Venue::Okx);

        let bbo = book.aggregated_bbo();
        assert_eq!(bbo.best_bid_venue, Some(Venue::Binance));
        assert_eq!(bbo.venues.len(), 1);
    }

    #[test]
    fn test_check_staleness_by_age() {
        let book = AggregatedBook::new(StalenessConfig {
            max_age: std::time::Duration::from_secs(5),
        });
        book.update_venue_bbo(Venue::Binance, 50_000.0, 1.0, 50_100.0, 1.0, 1_000_000_000);
        book.check_staleness(3_000_000_000);
        assert!(!book.venue_bbo(Venue::Binance).unwrap().is_stale);

        book.check_staleness(7_000_000_000);
        assert!(book.venue_bbo(Venue::Binance).unwrap().is_stale);

        // A fresh update clears the flag
        book.update_venue_bbo(Venue::Binance, 50_000.0, 1.0, 50_100.0, 1.0, 8_000_000_000);
        assert!(!book.venue_bbo(Venue::Binance).unwrap().is_stale);
    }

    #[test]
    fn test_tie_break_by_weight_then_insertion() {
        let book = AggregatedBook::default();
        book.update_venue_bbo(Venue::Binance, 50_000.0, 1.0, 50_100.0, 1.0, 1);
        book.update_venue_bbo(Venue::Okx, 50_000.0, 1.0, 50_100.0, 1.0, 1);

        // Equal weights: first inserted wins
        let bbo = book.aggregated_bbo();
        assert_eq!(bbo.best_bid_venue, Some(Venue::Binance));

        // Heavier venue wins the tie
        book.set_venue_weight(Venue::Okx, 2.0);
        let bbo = book.aggregated_bbo();
        assert_eq!(bbo.best_bid_venue, Some(Venue::Okx));
    }

    #[test]
    fn test_depth_merge_sums_equal_prices() {
        let book = AggregatedBook::default();
        book.update_venue(
            Venue::Binance,
            &BookSnapshot {
                bids: vec![PriceLevel::new(50_000.0, 1.0), PriceLevel::new(49_990.0, 2.0)],
                asks: vec![PriceLevel::new(50_100.0, 1.5)],
            },
            1,
        );
        book.update_venue(
            Venue::Okx,
            &BookSnapshot {
                bids: vec![PriceLevel::new(50_000.0, 0.5)],
                asks: vec![PriceLevel::new(50_100.0, 0.5), PriceLevel::new(50_110.0, 1.0)],
            },
            1,
        );

        let bids = book.aggregated_bids(10);
        assert_eq!(bids.len(), 2);
        assert_relative_eq!(bids[0].price, 50_000.0);
        assert_relative_eq!(bids[0].total_qty, 1.5);
        assert_eq!(bids[0].venue_breakdown.len(), 2);
        assert_relative_eq!(bids[1].price, 49_990.0);

        let asks = book.aggregated_asks(10);
        assert_relative_eq!(asks[0].price, 50_100.0);
        assert_relative_eq!(asks[0].total_qty, 2.0);
        assert_relative_eq!(asks[1].price, 50_110.0);
    }

    #[test]
    fn test_depth_truncation() {
        let book = AggregatedBook::default();
        let bids: Vec<PriceLevel> = (0..10)
            .map(|i| PriceLevel::new(50_000.0 - i as f64, 1.0))
            .collect();
        book.update_venue(
            Venue::Binance,
            &BookSnapshot {
                bids,
                asks: vec![],
            },
            1,
        );
        assert_eq!(book.aggregated_bids(3).len(), 3);
    }

    #[test]
    fn test_empty_book_bbo() {
        let book = AggregatedBook::default();
        let bbo = book.aggregated_bbo();
        assert_eq!(bbo.best_bid_venue, None);
        assert_eq!(bbo.best_ask_venue, None);
        assert_relative_eq!(bbo.spread, 0.0);
    }

    #[test]
    fn test_full_snapshot_sets_bbo() {
        let book = AggregatedBook::default();
        book.update_venue(
            Venue::Binance,
            &BookSnapshot {
                bids: vec![PriceLevel::new(50_000.0, 1.0)],
                asks: vec![PriceLevel::new(50_100.0, 2.0)],
            },
            7,
        );
        let bbo = book.venue_bbo(Venue::Binance).unwrap();
        assert_relative_eq!(bbo.bid_price, 50_000.0);
        assert_relative_eq!(bbo.ask_qty, 2.0);
        assert_eq!(bbo.timestamp_ns, 7);
    }
}
