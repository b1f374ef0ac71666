//! Per-venue position accounting and cross-venue aggregation.
//!
//! Reducing fills realize P&L against the stored entry VWAP; extending
//! fills reweight the VWAP on absolute size. A fill crossing through
//! zero closes the old side in full and opens the residual at the fill
//! price. The optional FIFO mode keeps an ordered lot queue and realizes
//! against the oldest lot first.

use crate::core::{Side, Symbol, Venue, QTY_EPSILON};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Cost-basis mode for realized P&L
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostBasis {
    #[default]
    WeightedAverage,
    Fifo,
}

/// Position held at one venue for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct VenuePosition {
    pub venue: Venue,
    pub symbol: Symbol,
    /// Signed size: > 0 long, < 0 short
    pub size: f64,
    pub avg_entry_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub last_update_ns: i64,
}

impl VenuePosition {
    fn new(venue: Venue, symbol: Symbol) -> Self {
        Self {
            venue,
            symbol,
            size: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            last_update_ns: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.abs() < QTY_EPSILON
    }
}

/// Position for one symbol summed across venues
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPosition {
    pub symbol: Symbol,
    pub total_size: f64,
    pub weighted_avg_price: f64,
    pub total_realized_pnl: f64,
    pub total_unrealized_pnl: f64,
    pub venues: Vec<VenuePosition>,
}

/// Divergence between local and venue-reported position size
#[derive(Debug, Clone, PartialEq)]
pub struct PositionDiscrepancy {
    pub venue: Venue,
    pub symbol: Symbol,
    pub local_size: f64,
    pub venue_size: f64,
    pub detected_ts_ns: i64,
}

pub type DiscrepancyCallback = Box<dyn Fn(&PositionDiscrepancy) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Lot {
    qty: f64,
    price: f64,
}

struct PositionState {
    position: VenuePosition,
    lots: VecDeque<Lot>,
}

#[derive(Default)]
struct BookState {
    positions: HashMap<Venue, HashMap<String, PositionState>>,
    discrepancies: Vec<PositionDiscrepancy>,
    discrepancy_callback: Option<DiscrepancyCallback>,
}

/// Thread-safe position book over every (venue, symbol) pair
pub struct PositionBook {
    cost_basis: CostBasis,
    state: RwLock<BookState>,
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new(CostBasis::WeightedAverage)
    }
}

impl PositionBook {
    pub fn new(cost_basis: CostBasis) -> Self {
        Self {
            cost_basis,
            state: RwLock::new(BookState::default()),
        }
    }

    /// Apply a fill to the (venue, symbol) position.
    pub fn on_fill(
        &self,
        venue: Venue,
        symbol: &Symbol,
        side: Side,
        fill_qty: f64,
        fill_price: f64,
        ts_ns: i64,
    ) {
        if fill_qty <= 0.0 {
            return;
        }
        let mut state = self.state.write();
        let entry = state
            .positions
            .entry(venue)
            .or_default()
            .entry(symbol.as_str().to_string())
            .or_insert_with(|| PositionState {
                position: VenuePosition::new(venue, symbol.clone()),
                lots: VecDeque::new(),
            });

        let change = match side {
            Side::Buy => fill_qty,
            Side::Sell => -fill_qty,
        };
        let old_size = entry.position.size;
        let new_size = old_size + change;

        let reducing = (old_size > 0.0 && change < 0.0) || (old_size < 0.0 && change > 0.0);
        if reducing {
            let closed_qty = old_size.abs().min(change.abs());
            let realized = match self.cost_basis {
                CostBasis::WeightedAverage => {
                    let per_unit = if old_size > 0.0 {
                        fill_price - entry.position.avg_entry_price
                    } else {
                        entry.position.avg_entry_price - fill_price
                    };
                    closed_qty * per_unit
                }
                CostBasis::Fifo => realize_fifo(&mut entry.lots, old_size > 0.0, closed_qty, fill_price),
            };
            entry.position.realized_pnl += realized;
            debug!(
                venue = %venue,
                symbol = %symbol,
                closed_qty,
                realized,
                "realized pnl on reduce"
            );
        }

        let crossed = old_size * new_size < 0.0;
        if crossed {
            // Residual opens a fresh position at the fill price.
            entry.position.avg_entry_price = fill_price;
            entry.lots.clear();
            entry.lots.push_back(Lot {
                qty: new_size.abs(),
                price: fill_price,
            });
        } else if new_size.abs() < QTY_EPSILON {
            entry.position.avg_entry_price = 0.0;
            entry.position.unrealized_pnl = 0.0;
            entry.lots.clear();
        } else if !reducing {
            // Extending: weighted average on absolute size.
            let old_value = old_size.abs() * entry.position.avg_entry_price;
            let add_value = change.abs() * fill_price;
            entry.position.avg_entry_price = (old_value + add_value) / new_size.abs();
            entry.lots.push_back(Lot {
                qty: change.abs(),
                price: fill_price,
            });
        }
        // A plain reduce keeps the remaining side's VWAP.

        entry.position.size = new_size;
        entry.position.last_update_ns = ts_ns;
    }

    /// Overwrite a position (reconciliation or startup seeding).
    pub fn set_position(
        &self,
        venue: Venue,
        symbol: &Symbol,
        size: f64,
        avg_entry_price: f64,
        ts_ns: i64,
    ) {
        let mut state = self.state.write();
        let entry = state
            .positions
            .entry(venue)
            .or_default()
            .entry(symbol.as_str().to_string())
            .or_insert_with(|| PositionState {
                position: VenuePosition::new(venue, symbol.clone()),
                lots: VecDeque::new(),
            });
        entry.position.size = size;
        entry.position.avg_entry_price = avg_entry_price;
        entry.position.last_update_ns = ts_ns;
        entry.lots.clear();
        if size.abs() >= QTY_EPSILON {
            entry.lots.push_back(Lot {
                qty: size.abs(),
                price: avg_entry_price,
            });
        }
    }

    /// Lazily recompute unrealized P&L for every venue holding `symbol`.
    pub fn update_mark_price(&self, symbol: &Symbol, mark_price: f64) {
        let mut state = self.state.write();
        for venue_map in state.positions.values_mut() {
            if let Some(entry) = venue_map.get_mut(symbol.as_str()) {
                if entry.position.size.abs() >= QTY_EPSILON {
                    entry.position.unrealized_pnl =
                        entry.position.size * (mark_price - entry.position.avg_entry_price);
                } else {
                    entry.position.unrealized_pnl = 0.0;
                }
            }
        }
    }

    pub fn position(&self, venue: Venue, symbol: &Symbol) -> Option<VenuePosition> {
        let state = self.state.read();
        state
            .positions
            .get(&venue)
            .and_then(|m| m.get(symbol.as_str()))
            .map(|e| e.position.clone())
    }

    /// Sum of one symbol's positions across venues.
    pub fn aggregated(&self, symbol: &Symbol) -> Option<AggregatedPosition> {
        let state = self.state.read();
        let mut venues = Vec::new();
        for venue_map in state.positions.values() {
            if let Some(entry) = venue_map.get(symbol.as_str()) {
                venues.push(entry.position.clone());
            }
        }
        if venues.is_empty() {
            return None;
        }
        venues.sort_by_key(|p| p.venue);
        Some(aggregate(symbol.clone(), venues))
    }

    /// One aggregate per symbol known to the book.
    pub fn all_aggregated(&self) -> Vec<AggregatedPosition> {
        let state = self.state.read();
        let mut symbols: Vec<String> = state
            .positions
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect();
        symbols.sort();
        symbols.dedup();

        symbols
            .into_iter()
            .filter_map(|sym| {
                let mut venues = Vec::new();
                for venue_map in state.positions.values() {
                    if let Some(entry) = venue_map.get(&sym) {
                        venues.push(entry.position.clone());
                    }
                }
                if venues.is_empty() {
                    None
                } else {
                    venues.sort_by_key(|p| p.venue);
                    Some(aggregate(Symbol::new(sym), venues))
                }
            })
            .collect()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        let state = self.state.read();
        state
            .positions
            .values()
            .flat_map(|m| m.values())
            .map(|e| e.position.realized_pnl)
            .sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        let state = self.state.read();
        state
            .positions
            .values()
            .flat_map(|m| m.values())
            .map(|e| e.position.unrealized_pnl)
            .sum()
    }

    /// Compare a venue-reported size against the local book; records and
    /// reports a discrepancy beyond the quantity tolerance.
    pub fn reconcile_size(
        &self,
        venue: Venue,
        symbol: &Symbol,
        venue_size: f64,
        ts_ns: i64,
    ) -> Option<PositionDiscrepancy> {
        let mut state = self.state.write();
        let local_size = state
            .positions
            .get(&venue)
            .and_then(|m| m.get(symbol.as_str()))
            .map_or(0.0, |e| e.position.size);

        if (local_size - venue_size).abs() <= QTY_EPSILON {
            return None;
        }

        let disc = PositionDiscrepancy {
            venue,
            symbol: symbol.clone(),
            local_size,
            venue_size,
            detected_ts_ns: ts_ns,
        };
        warn!(
            venue = %venue,
            symbol = %symbol,
            local_size,
            venue_size,
            "position discrepancy"
        );
        state.discrepancies.push(disc.clone());
        if let Some(cb) = &state.discrepancy_callback {
            cb(&disc);
        }
        Some(disc)
    }

    pub fn discrepancies(&self) -> Vec<PositionDiscrepancy> {
        self.state.read().discrepancies.clone()
    }

    pub fn clear_discrepancies(&self) {
        self.state.write().discrepancies.clear();
    }

    pub fn set_discrepancy_callback(&self, callback: DiscrepancyCallback) {
        self.state.write().discrepancy_callback = Some(callback);
    }

    pub fn clear_venue(&self, venue: Venue) {
        self.state.write().positions.remove(&venue);
    }

    pub fn clear_all(&self) {
        self.state.write().positions.clear();
    }
}

fn aggregate(symbol: Symbol, venues: Vec<VenuePosition>) -> AggregatedPosition {
    let total_size = venues.iter().map(|p| p.size).sum();
    let total_realized_pnl = venues.iter().map(|p| p.realized_pnl).sum();
    let total_unrealized_pnl = venues.iter().map(|p| p.unrealized_pnl).sum();

    let total_abs: f64 = venues.iter().map(|p| p.size.abs()).sum();
    let weighted_avg_price = if total_abs > QTY_EPSILON {
        venues
            .iter()
            .map(|p| p.size.abs() * p.avg_entry_price)
            .sum::<f64>()
            / total_abs
    } else {
        0.0
    };

    AggregatedPosition {
        symbol,
        total_size,
        weighted_avg_price,
        total_realized_pnl,
        total_unrealized_pnl,
        venues,
    }
}

fn realize_fifo(lots: &mut VecDeque<Lot>, was_long: bool, closed_qty: f64, fill_price: f64) -> f64 {
    let mut remaining = closed_qty;
    let mut realized = 0.0;
    while remaining > QTY_EPSILON {
        let Some(front) = lots.front_mut() else { break };
        let take = front.qty.min(remaining);
        let per_unit = if was_long {
            fill_price - front.price
        } else {
            front.price - fill_price
        };
        realized += take * per_unit;
        front.qty -= take;
        remaining -= take;
        if front.qty <= QTY_EPSILON {
            lots.pop_front();
        }
    }
    realized
}
