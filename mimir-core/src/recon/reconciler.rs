//! The reconciliation loop.
//!
//! Each cycle fetches open orders from every registered venue, compares
//! them against the local pending set, corrects drift by trusting the
//! venue (through the store's journaled update/fill path), adopts
//! orphans, and trips the strategy-freeze interlock on critical or
//! sustained mismatches. The loop is a cancellable tokio task; stopping
//! lets the in-flight query finish.

use crate::config::ReconciliationConfig;
use crate::core::{OrderStatus, Symbol, Venue, QTY_EPSILON};
use crate::exec::adapter::ReconciliationQuery;
use crate::oms::core::OrderCore;
use crate::oms::store::Order;
use crate::recon::{ReconEvent, ReconEventType, ReconSeverity, ReconStats, StateMismatch};
use crate::utils::now_ns;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub type EventCallback = Box<dyn Fn(&ReconEvent) + Send + Sync>;
pub type FreezeCallback = Box<dyn Fn(bool, &str) + Send + Sync>;

struct ReconState {
    venues: HashMap<Venue, Arc<dyn ReconciliationQuery>>,
    events: VecDeque<ReconEvent>,
    stats: ReconStats,
    strategy_frozen: bool,
    consecutive_mismatches: u32,
}

/// Account reconciliation loop over the order core
pub struct Reconciler {
    core: Arc<OrderCore>,
    config: ReconciliationConfig,
    state: Mutex<ReconState>,
    event_callback: RwLock<Option<EventCallback>>,
    freeze_callback: RwLock<Option<FreezeCallback>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Reconciler {
    pub fn new(core: Arc<OrderCore>, config: ReconciliationConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            core,
            config,
            state: Mutex::new(ReconState {
                venues: HashMap::new(),
                events: VecDeque::new(),
                stats: ReconStats::default(),
                strategy_frozen: false,
                consecutive_mismatches: 0,
            }),
            event_callback: RwLock::new(None),
            freeze_callback: RwLock::new(None),
            stop_tx,
            stop_rx,
        }
    }

    pub fn register_venue(&self, venue: Venue, query: Arc<dyn ReconciliationQuery>) {
        info!(venue = %venue, "venue registered for reconciliation");
        self.state.lock().venues.insert(venue, query);
    }

    pub fn unregister_venue(&self, venue: Venue) {
        self.state.lock().venues.remove(&venue);
    }

    pub fn set_event_callback(&self, callback: EventCallback) {
        *self.event_callback.write() = Some(callback);
    }

    pub fn set_freeze_callback(&self, callback: FreezeCallback) {
        *self.freeze_callback.write() = Some(callback);
    }

    /// Spawn the periodic loop. Stop it with [`Reconciler::stop`]; the
    /// cycle in flight completes before the task exits.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the loop
            // waits one full interval before its first cycle.
            ticker.tick().await;
            info!("reconciliation loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.reconcile_now().await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("reconciliation loop stopped");
        })
    }

    /// Signal the loop to stop after the current cycle.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Run one full reconciliation cycle across every registered venue
    /// and configured symbol.
    pub async fn reconcile_now(&self) {
        let start_ns = now_ns();
        self.emit(ReconEvent::new(
            ReconEventType::Started,
            start_ns,
            "reconciliation cycle started",
        ));

        let venues: Vec<(Venue, Arc<dyn ReconciliationQuery>)> = {
            let mut state = self.state.lock();
            state.stats.total_cycles += 1;
            state
                .venues
                .iter()
                .map(|(v, q)| (*v, Arc::clone(q)))
                .collect()
        };

        let mut cycle_failed = false;
        for (venue, query) in venues {
            for symbol_name in &self.config.symbols {
                let symbol = Symbol::new(symbol_name.clone());
                if !self.reconcile_symbol(venue, &query, &symbol).await {
                    cycle_failed = true;
                }
            }
        }

        let end_ns = now_ns();
        {
            let mut state = self.state.lock();
            if cycle_failed {
                state.stats.failed_cycles += 1;
            } else {
                state.stats.successful_cycles += 1;
            }
            state.stats.last_cycle_ts_ns = end_ns;
            state.stats.last_cycle_duration_ns = end_ns - start_ns;
        }
        self.emit(ReconEvent::new(
            ReconEventType::Completed,
            end_ns,
            format!(
                "reconciliation cycle completed in {}ms",
                (end_ns - start_ns) / 1_000_000
            ),
        ));
    }

    /// Reconcile one (venue, symbol) pair. Returns false when the venue
    /// query failed.
    async fn reconcile_symbol(
        &self,
        venue: Venue,
        query: &Arc<dyn ReconciliationQuery>,
        symbol: &Symbol,
    ) -> bool {
        let venue_orders =
            match tokio::time::timeout(self.config.query_timeout, query.query_open_orders(symbol))
                .await
            {
                Ok(orders) => orders,
                Err(_) => {
                    warn!(venue = %venue, symbol = %symbol, "open-order query timed out");
                    let mut event = ReconEvent::new(
                        ReconEventType::Error,
                        now_ns(),
                        format!("open-order query timed out for {} on {}", symbol, venue),
                    );
                    event.severity = ReconSeverity::Error;
                    self.emit(event);
                    return false;
                }
            };

        let mut venue_map: HashMap<String, crate::core::ExecutionReport> = venue_orders
            .into_iter()
            .map(|r| (r.client_order_id.clone(), r))
            .collect();

        let local_pending: Vec<Order> = self
            .core
            .store()
            .list_pending()
            .into_iter()
            .filter(|o| o.symbol == *symbol)
            .collect();

        let mut mismatches: Vec<StateMismatch> = Vec::new();
        for local in &local_pending {
            match venue_map.remove(&local.client_order_id) {
                Some(venue_report) => {
                    if let Some(mismatch) = self.compare(local, &venue_report) {
                        mismatches.push(mismatch);
                    }
                }
                // Local present, venue absent: possibly already terminal
                // at the venue and not yet returned by the query. Left
                // to age out, never treated as an orphan.
                None => {}
            }
        }

        // Whatever the venue reported that we do not know at all is an
        // orphan.
        let orphans: Vec<crate::core::ExecutionReport> = venue_map
            .into_values()
            .filter(|r| self.core.order(&r.client_order_id).is_none())
            .collect();

        if mismatches.is_empty() {
            self.state.lock().consecutive_mismatches = 0;
        } else {
            self.handle_mismatches(mismatches);
        }
        self.handle_orphans(venue, query, symbol, orphans).await;
        true
    }

    /// Compare a local pending order against the venue's report.
    /// Quantities compare with the engine tolerance; prices only when
    /// both sides have filled.
    fn compare(
        &self,
        local: &Order,
        venue_report: &crate::core::ExecutionReport,
    ) -> Option<StateMismatch> {
        let status_mismatch = local.status != venue_report.status;
        let qty_mismatch =
            (local.executed_qty - venue_report.last_fill_qty).abs() > QTY_EPSILON;
        let price_mismatch = local.executed_qty > 0.0
            && venue_report.last_fill_qty > 0.0
            && (local.avg_price - venue_report.last_fill_price).abs() > QTY_EPSILON;

        if !(status_mismatch || qty_mismatch || price_mismatch) {
            return None;
        }

        let mut mismatch = StateMismatch {
            client_order_id: local.client_order_id.clone(),
            symbol: local.symbol.as_str().to_string(),
            local_status: local.status,
            exchange_status: venue_report.status,
            local_filled_qty: local.executed_qty,
            exchange_filled_qty: venue_report.last_fill_qty,
            local_avg_price: local.avg_price,
            exchange_avg_price: venue_report.last_fill_price,
            severity: ReconSeverity::Warning,
            detected_ts_ns: now_ns(),
        };
        mismatch.severity = determine_severity(&mismatch);

        warn!(
            client_order_id = %mismatch.client_order_id,
            local_status = %mismatch.local_status,
            exchange_status = %mismatch.exchange_status,
            severity = ?mismatch.severity,
            "order state mismatch"
        );
        Some(mismatch)
    }

    /// Trust the venue: feed its view through the store's standard
    /// update/fill path, count corrections, and evaluate the freeze
    /// interlock.
    fn handle_mismatches(&self, mismatches: Vec<StateMismatch>) {
        let (consecutive, max_severity) = {
            let mut state = self.state.lock();
            state.stats.mismatches_detected += mismatches.len() as u64;
            state.consecutive_mismatches += mismatches.len() as u32;
            let max_severity = mismatches
                .iter()
                .map(|m| m.severity)
                .max()
                .unwrap_or(ReconSeverity::Info);
            (state.consecutive_mismatches, max_severity)
        };

        if self.config.freeze_on_mismatch
            && (max_severity == ReconSeverity::Critical
                || consecutive >= self.config.max_mismatches_before_freeze)
        {
            self.freeze_strategy(&format!(
                "{} consecutive mismatches (max severity {:?})",
                consecutive, max_severity
            ));
        }

        for mismatch in mismatches {
            let ts = now_ns();
            let mut event = ReconEvent::new(
                ReconEventType::StateMismatch,
                ts,
                format!("state mismatch for order {}", mismatch.client_order_id),
            );
            event.client_order_id = Some(mismatch.client_order_id.clone());
            event.severity = mismatch.severity;
            event.mismatch = Some(mismatch.clone());
            self.emit(event);

            // Synthesize the missing fill, then align the status.
            let fill_delta = mismatch.exchange_filled_qty - mismatch.local_filled_qty;
            if fill_delta > QTY_EPSILON {
                let symbol = Symbol::new(mismatch.symbol.clone());
                if let Err(e) = self.core.apply_external_fill(
                    &mismatch.client_order_id,
                    &symbol,
                    fill_delta,
                    mismatch.exchange_avg_price,
                    ts,
                ) {
                    warn!(error = %e, "correction fill refused");
                    continue;
                }
            }
            let current_status = self
                .core
                .order(&mismatch.client_order_id)
                .map(|o| o.status);
            if current_status != Some(mismatch.exchange_status) {
                let _ = self.core.apply_order_update(
                    &mismatch.client_order_id,
                    "",
                    mismatch.exchange_status,
                    "",
                    ts + 1,
                );
            }

            self.state.lock().stats.mismatches_corrected += 1;
            let mut event = ReconEvent::new(
                ReconEventType::OrderCorrected,
                now_ns(),
                format!("order {} corrected from venue", mismatch.client_order_id),
            );
            event.client_order_id = Some(mismatch.client_order_id);
            self.emit(event);
        }
    }

    /// Adopt venue-present/local-absent orders, pre-dated to the venue
    /// timestamp, and cancel them when configured to.
    async fn handle_orphans(
        &self,
        venue: Venue,
        query: &Arc<dyn ReconciliationQuery>,
        symbol: &Symbol,
        orphans: Vec<crate::core::ExecutionReport>,
    ) {
        for orphan in orphans {
            self.state.lock().stats.orphans_found += 1;
            let mut event = ReconEvent::new(
                ReconEventType::OrphanedOrderFound,
                now_ns(),
                format!("orphaned order on {}: {}", venue, orphan.client_order_id),
            );
            event.client_order_id = Some(orphan.client_order_id.clone());
            event.severity = ReconSeverity::Warning;
            self.emit(event);

            let venue_ts = if orphan.ts_exchange_ns > 0 {
                orphan.ts_exchange_ns
            } else {
                now_ns()
            };
            if orphan.last_fill_qty > 0.0 {
                let _ = self.core.apply_external_fill(
                    &orphan.client_order_id,
                    symbol,
                    orphan.last_fill_qty,
                    orphan.last_fill_price,
                    venue_ts - 1,
                );
            }
            let _ = self.core.apply_order_update(
                &orphan.client_order_id,
                &orphan.venue_order_id,
                orphan.status,
                "",
                venue_ts,
            );

            if self.config.auto_cancel_orphaned && !orphan.status.is_terminal() {
                let cancelled = tokio::time::timeout(
                    self.config.query_timeout,
                    query.cancel_order(symbol, &orphan.client_order_id),
                )
                .await;
                match cancelled {
                    Ok(Some(_)) => {
                        self.state.lock().stats.orphans_cancelled += 1;
                        let mut event = ReconEvent::new(
                            ReconEventType::OrderCancelled,
                            now_ns(),
                            format!("orphaned order cancelled: {}", orphan.client_order_id),
                        );
                        event.client_order_id = Some(orphan.client_order_id.clone());
                        self.emit(event);
                    }
                    _ => {
                        warn!(
                            client_order_id = %orphan.client_order_id,
                            "orphan cancel failed"
                        );
                    }
                }
            }
        }
    }

    fn freeze_strategy(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if state.strategy_frozen {
                return;
            }
            state.strategy_frozen = true;
            state.stats.strategy_freezes += 1;
        }

        let mut event = ReconEvent::new(
            ReconEventType::StrategyFrozen,
            now_ns(),
            format!("strategy frozen: {}", reason),
        );
        event.severity = ReconSeverity::Critical;
        self.emit(event);

        if let Some(callback) = self.freeze_callback.read().as_ref() {
            callback(true, reason);
        }
        warn!(reason, "strategy frozen");
    }

    pub fn is_strategy_frozen(&self) -> bool {
        self.state.lock().strategy_frozen
    }

    /// Manual resume after intervention: clears the freeze and the
    /// consecutive-mismatch counter.
    pub fn resume_strategy(&self) {
        {
            let mut state = self.state.lock();
            if !state.strategy_frozen {
                return;
            }
            state.strategy_frozen = false;
            state.consecutive_mismatches = 0;
        }

        self.emit(ReconEvent::new(
            ReconEventType::StrategyResumed,
            now_ns(),
            "strategy resumed",
        ));
        if let Some(callback) = self.freeze_callback.read().as_ref() {
            callback(false, "manual");
        }
        info!("strategy resumed");
    }

    pub fn stats(&self) -> ReconStats {
        self.state.lock().stats.clone()
    }

    /// Most recent audit events, newest last.
    pub fn recent_events(&self, max_count: usize) -> Vec<ReconEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(max_count);
        state.events.iter().skip(skip).cloned().collect()
    }

    fn emit(&self, event: ReconEvent) {
        {
            let mut state = self.state.lock();
            state.events.push_back(event.clone());
            while state.events.len() > self.config.max_event_history {
                state.events.pop_front();
            }
        }
        if let Some(callback) = self.event_callback.read().as_ref() {
            callback(&event);
        }
    }
}

/// Severity ladder. The venue being ahead on fills is routine drift;
/// what escalates is divergence where both sides already agree they
/// filled (conflicting quantities or prices) or contradictory terminal
/// states.
fn determine_severity(mismatch: &StateMismatch) -> ReconSeverity {
    let qty_base = mismatch
        .exchange_filled_qty
        .abs()
        .max(mismatch.local_filled_qty.abs())
        .max(QTY_EPSILON);
    let qty_rel = (mismatch.exchange_filled_qty - mismatch.local_filled_qty).abs() / qty_base;

    let price_rel = if mismatch.local_avg_price > 0.0 && mismatch.exchange_avg_price > 0.0 {
        (mismatch.exchange_avg_price - mismatch.local_avg_price).abs() / mismatch.local_avg_price
    } else {
        0.0
    };

    let crosses_terminal =
        mismatch.local_status.is_terminal() != mismatch.exchange_status.is_terminal();
    let conflicting_terminal = mismatch.local_status.is_terminal()
        && mismatch.exchange_status.is_terminal()
        && mismatch.local_status != mismatch.exchange_status;
    let both_filled =
        mismatch.local_filled_qty > QTY_EPSILON && mismatch.exchange_filled_qty > QTY_EPSILON;

    if conflicting_terminal || price_rel > 0.1 || (both_filled && qty_rel > 0.5) {
        ReconSeverity::Critical
    } else if crosses_terminal || qty_rel > 0.1 || price_rel > 0.01 {
        ReconSeverity::Error
    } else if qty_rel > 0.0 || price_rel > 0.0 || mismatch.local_status != mismatch.exchange_status
    {
        ReconSeverity::Warning
    } else {
        ReconSeverity::Info
    }
}
