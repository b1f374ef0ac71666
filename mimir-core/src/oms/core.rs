//! Order & Position Core: the single source of truth for orders, fills,
//! balances and positions inside the process.
//!
//! Every mutating operation journals to the WAL before its effect becomes
//! observable. `place` is atomic: either the balance is reserved, the
//! order is recorded, the new-order record is durable and Accepted is
//! returned, or nothing changes.

use crate::config::EngineConfig;
use crate::core::{
    CoreError, Instrument, OrderStatus, PlaceOrderRequest, RejectReason, Side, Symbol, Venue,
    QTY_EPSILON,
};
use crate::oms::ledger::{Balance, BalanceLedger};
use crate::oms::positions::{CostBasis, PositionBook};
use crate::oms::store::{Order, OrderStore};
use crate::oms::wal::{OrderWal, WalStats};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Reservation backing an accepted order.
///
/// The due-fill deadline drives the local simulator; for live venues it
/// is informational.
#[derive(Debug, Clone)]
pub struct PendingReservation {
    pub request: PlaceOrderRequest,
    pub venue: Venue,
    pub accept_ts_ns: i64,
    pub due_fill_ts_ns: i64,
    pub reserved_asset: String,
    pub reserved_amount: f64,
}

/// Outcome of a place intent
#[derive(Debug, Clone)]
pub enum PlaceDecision {
    Accepted {
        venue_order_id: String,
        reservation: PendingReservation,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl PlaceDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PlaceDecision::Accepted { .. })
    }
}

/// Outcome of a cancel intent
#[derive(Debug, Clone)]
pub enum CancelDecision {
    Found { reservation: PendingReservation },
    Missing,
}

/// The order/position core
pub struct OrderCore {
    config: EngineConfig,
    instruments: RwLock<HashMap<String, Instrument>>,
    ledger: BalanceLedger,
    store: OrderStore,
    positions: PositionBook,
    wal: OrderWal,
    pending: Mutex<HashMap<String, PendingReservation>>,
    venue_counter: AtomicU64,
}

impl OrderCore {
    /// Open the core, replaying any existing WAL into the store.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_cost_basis(config, CostBasis::WeightedAverage)
    }

    pub fn with_cost_basis(config: EngineConfig, cost_basis: CostBasis) -> Result<Self, CoreError> {
        let wal = OrderWal::new(config.wal.clone())?;
        let store = OrderStore::new();
        wal.replay_into(&store)?;
        let replayed = wal.stats().entries_replayed;
        if replayed > 0 {
            info!(replayed, orders = store.count(), "recovered order store from WAL");
        }

        Ok(Self {
            config,
            instruments: RwLock::new(HashMap::new()),
            ledger: BalanceLedger::new(),
            store,
            positions: PositionBook::new(cost_basis),
            wal,
            pending: Mutex::new(HashMap::new()),
            venue_counter: AtomicU64::new(0),
        })
    }

    /// Register a tradable instrument. Unknown symbols are rejected at
    /// placement.
    pub fn register_instrument(&self, instrument: Instrument) {
        let mut instruments = self.instruments.write();
        instruments.insert(instrument.symbol.as_str().to_string(), instrument);
    }

    /// External credit into the free balance.
    pub fn deposit(&self, asset: &str, amount: f64) {
        self.ledger.deposit(asset, amount);
    }

    /// Place an order intent. Atomic accept-or-nothing; rejects journal
    /// a terminal update for the attempted id (duplicates excepted: the
    /// existing record is left untouched).
    pub fn place(
        &self,
        request: &PlaceOrderRequest,
        now_ns: i64,
    ) -> Result<PlaceDecision, CoreError> {
        if request.client_order_id.is_empty() || request.qty <= 0.0 {
            return self.reject_order(request, RejectReason::RiskRejected, now_ns);
        }

        // Duplicate check comes first: any reject path below journals an
        // update keyed by this id, which must never clobber the record
        // the id already names.
        if self.store.contains(&request.client_order_id) {
            warn!(
                client_order_id = %request.client_order_id,
                "duplicate client order id"
            );
            return Ok(PlaceDecision::Rejected {
                reason: RejectReason::DuplicateClientOrderId,
            });
        }

        let instrument = {
            let instruments = self.instruments.read();
            instruments.get(request.symbol.as_str()).cloned()
        };
        let Some(instrument) = instrument else {
            return self.reject_order(request, RejectReason::UnknownSymbol, now_ns);
        };

        let (reserved_asset, reserved_amount) = match request.side {
            Side::Buy => (instrument.quote_asset.clone(), request.notional()),
            Side::Sell => (instrument.base_asset.clone(), request.qty),
        };

        if !self.ledger.reserve(&reserved_asset, reserved_amount) {
            return self.reject_order(request, RejectReason::InsufficientFunds, now_ns);
        }

        // Funds are locked; everything past this point must succeed or
        // roll the reservation back.
        let venue_order_id = format!("sim-{}", self.venue_counter.fetch_add(1, Ordering::SeqCst) + 1);

        let journal = self
            .wal
            .log_order_new(request)
            .and_then(|_| {
                self.wal.log_order_update(
                    &request.client_order_id,
                    &venue_order_id,
                    OrderStatus::Accepted,
                    "",
                    now_ns,
                )
            });
        if let Err(e) = journal {
            self.ledger.release(&reserved_asset, reserved_amount);
            return Err(e.into());
        }

        self.store.note_order_params(request, now_ns);
        self.store.apply_order_update(
            &request.client_order_id,
            &venue_order_id,
            OrderStatus::Accepted,
            "",
            now_ns,
        );

        let reservation = PendingReservation {
            request: request.clone(),
            venue: Venue::Sim,
            accept_ts_ns: now_ns,
            due_fill_ts_ns: now_ns + self.config.fill_delay_ns,
            reserved_asset,
            reserved_amount,
        };
        self.pending
            .lock()
            .insert(request.client_order_id.clone(), reservation.clone());

        debug!(
            client_order_id = %request.client_order_id,
            venue_order_id = %venue_order_id,
            "order accepted"
        );
        self.checkpoint_if_due()?;
        Ok(PlaceDecision::Accepted {
            venue_order_id,
            reservation,
        })
    }

    /// Record a rejected intent: journals a terminal update and stores
    /// the rejected record. Used internally and by the admission layer
    /// for risk rejections. An id that already names an order is left
    /// untouched; the rejection is surfaced without journaling.
    pub fn reject_order(
        &self,
        request: &PlaceOrderRequest,
        reason: RejectReason,
        now_ns: i64,
    ) -> Result<PlaceDecision, CoreError> {
        if self.store.contains(&request.client_order_id) {
            warn!(
                client_order_id = %request.client_order_id,
                reason = %reason,
                "reject for an id that already names an order"
            );
            return Ok(PlaceDecision::Rejected { reason });
        }
        self.wal.log_order_update(
            &request.client_order_id,
            "",
            OrderStatus::Rejected,
            reason.as_str(),
            now_ns,
        )?;
        self.store.note_order_params(request, now_ns);
        self.store.apply_order_update(
            &request.client_order_id,
            "",
            OrderStatus::Rejected,
            reason.as_str(),
            now_ns,
        );
        debug!(
            client_order_id = %request.client_order_id,
            reason = %reason,
            "order rejected"
        );
        self.checkpoint_if_due()?;
        Ok(PlaceDecision::Rejected { reason })
    }

    /// Cancel an open order. Releasing the reservation is atomic with
    /// removing the order from the open set. A cancel for an unknown id
    /// still journals and records an update carrying `unknown_order`.
    pub fn cancel(&self, client_order_id: &str, now_ns: i64) -> Result<CancelDecision, CoreError> {
        let removed = self.pending.lock().remove(client_order_id);

        match removed {
            Some(reservation) => {
                self.wal.log_order_cancel(client_order_id, "", now_ns)?;
                self.ledger
                    .release(&reservation.reserved_asset, reservation.reserved_amount);
                self.store.apply_order_update(
                    client_order_id,
                    "",
                    OrderStatus::Canceled,
                    "",
                    now_ns,
                );
                self.checkpoint_if_due()?;
                Ok(CancelDecision::Found { reservation })
            }
            None => {
                let reason = RejectReason::UnknownOrder;
                self.wal.log_order_update(
                    client_order_id,
                    "",
                    OrderStatus::Rejected,
                    reason.as_str(),
                    now_ns,
                )?;
                self.store.apply_order_update(
                    client_order_id,
                    "",
                    OrderStatus::Rejected,
                    reason.as_str(),
                    now_ns,
                );
                self.checkpoint_if_due()?;
                Ok(CancelDecision::Missing)
            }
        }
    }

    /// Apply a fill for a previously accepted order: settles balances,
    /// advances the order record and position, and journals the fill.
    pub fn apply_fill(
        &self,
        reservation: &PendingReservation,
        fill_price: f64,
        now_ns: i64,
    ) -> Result<(), CoreError> {
        let request = &reservation.request;
        let qty = request.qty;

        let instrument = {
            let instruments = self.instruments.read();
            instruments.get(request.symbol.as_str()).cloned()
        };
        let Some(instrument) = instrument else {
            return Err(CoreError::InvariantViolation(format!(
                "fill for unregistered symbol {}",
                request.symbol
            )));
        };

        self.wal
            .log_order_fill(&request.client_order_id, &request.symbol, qty, fill_price, now_ns)?;

        match request.side {
            Side::Buy => {
                self.ledger.settle_buy(
                    &instrument.quote_asset,
                    &instrument.base_asset,
                    reservation.reserved_amount,
                    qty * fill_price,
                    qty,
                );
            }
            Side::Sell => {
                self.ledger.settle_sell(
                    &instrument.quote_asset,
                    &instrument.base_asset,
                    reservation.reserved_amount,
                    qty * fill_price,
                );
            }
        }

        self.store
            .apply_fill(&request.client_order_id, &request.symbol, qty, fill_price, now_ns)?;
        self.positions.on_fill(
            reservation.venue,
            &request.symbol,
            request.side,
            qty,
            fill_price,
            now_ns,
        );
        self.checkpoint_if_due()?;
        Ok(())
    }

    /// Journal and apply a venue-sourced order update.
    pub fn apply_order_update(
        &self,
        client_order_id: &str,
        venue_order_id: &str,
        status: OrderStatus,
        reason: &str,
        ts_ns: i64,
    ) -> Result<bool, CoreError> {
        self.wal
            .log_order_update(client_order_id, venue_order_id, status, reason, ts_ns)?;
        let applied = self
            .store
            .apply_order_update(client_order_id, venue_order_id, status, reason, ts_ns);
        self.checkpoint_if_due()?;
        Ok(applied)
    }

    /// Journal and apply a venue-sourced incremental fill against the
    /// order record only (no reservation settlement). Used by
    /// reconciliation corrections.
    pub fn apply_external_fill(
        &self,
        client_order_id: &str,
        symbol: &Symbol,
        qty: f64,
        price: f64,
        ts_ns: i64,
    ) -> Result<bool, CoreError> {
        self.wal
            .log_order_fill(client_order_id, symbol, qty, price, ts_ns)?;
        let applied = self.store.apply_fill(client_order_id, symbol, qty, price, ts_ns)?;
        if applied {
            // The fill is now final; drop any remaining reservation if
            // the order reached a terminal state.
            if let Some(order) = self.store.get(client_order_id) {
                if order.is_terminal() {
                    if let Some(reservation) = self.pending.lock().remove(client_order_id) {
                        let remaining = reservation.reserved_amount;
                        if remaining > QTY_EPSILON {
                            self.ledger.release(&reservation.reserved_asset, remaining);
                        }
                    }
                }
            }
        }
        self.checkpoint_if_due()?;
        Ok(applied)
    }

    /// Expire an accepted order that can no longer fill: releases the
    /// reservation and journals the terminal update.
    pub fn expire(
        &self,
        reservation: &PendingReservation,
        now_ns: i64,
    ) -> Result<(), CoreError> {
        let client_order_id = &reservation.request.client_order_id;
        self.wal
            .log_order_update(client_order_id, "", OrderStatus::Expired, "", now_ns)?;
        self.ledger
            .release(&reservation.reserved_asset, reservation.reserved_amount);
        self.pending.lock().remove(client_order_id);
        self.store
            .apply_order_update(client_order_id, "", OrderStatus::Expired, "", now_ns);
        self.checkpoint_if_due()?;
        Ok(())
    }

    /// Drain every pending order whose due-fill deadline has passed.
    /// Simulator configurations fill these at their limit price.
    pub fn collect_due(&self, now_ns: i64) -> Vec<PendingReservation> {
        let mut pending = self.pending.lock();
        let due_ids: Vec<String> = pending
            .iter()
            .filter(|(_, r)| r.due_fill_ts_ns <= now_ns)
            .map(|(id, _)| id.clone())
            .collect();
        due_ids
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .collect()
    }

    /// Write a checkpoint frame on demand.
    pub fn checkpoint(&self) -> Result<u64, CoreError> {
        Ok(self.wal.write_checkpoint(&self.store)?)
    }

    fn checkpoint_if_due(&self) -> Result<(), CoreError> {
        if self.wal.needs_checkpoint() {
            self.wal.write_checkpoint(&self.store)?;
        }
        Ok(())
    }

    pub fn order(&self, client_order_id: &str) -> Option<Order> {
        self.store.get(client_order_id)
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn balances(&self) -> Vec<Balance> {
        self.ledger.snapshot()
    }

    pub fn balance(&self, asset: &str) -> Balance {
        self.ledger.get(asset)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn wal_stats(&self) -> WalStats {
        self.wal.stats()
    }
}
