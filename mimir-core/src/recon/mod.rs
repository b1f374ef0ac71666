//! Reconciliation: periodic alignment of local order state against each
//! venue's reported truth, with a strategy-freeze safety interlock.

pub mod reconciler;

pub use reconciler::{EventCallback, FreezeCallback, Reconciler};

use crate::core::OrderStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kinds recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconEventType {
    Started,
    Completed,
    StateMismatch,
    OrphanedOrderFound,
    OrderCorrected,
    OrderCancelled,
    Error,
    StrategyFrozen,
    StrategyResumed,
}

impl fmt::Display for ReconEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconEventType::Started => "Started",
            ReconEventType::Completed => "Completed",
            ReconEventType::StateMismatch => "StateMismatch",
            ReconEventType::OrphanedOrderFound => "OrphanedOrderFound",
            ReconEventType::OrderCorrected => "OrderCorrected",
            ReconEventType::OrderCancelled => "OrderCancelled",
            ReconEventType::Error => "Error",
            ReconEventType::StrategyFrozen => "StrategyFrozen",
            ReconEventType::StrategyResumed => "StrategyResumed",
        };
        write!(f, "{}", s)
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReconSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Divergence between the local record and the venue's report
#[derive(Debug, Clone, PartialEq)]
pub struct StateMismatch {
    pub client_order_id: String,
    pub symbol: String,
    pub local_status: OrderStatus,
    pub exchange_status: OrderStatus,
    pub local_filled_qty: f64,
    pub exchange_filled_qty: f64,
    pub local_avg_price: f64,
    pub exchange_avg_price: f64,
    pub severity: ReconSeverity,
    pub detected_ts_ns: i64,
}

/// One audit-trail entry
#[derive(Debug, Clone)]
pub struct ReconEvent {
    pub event_type: ReconEventType,
    pub ts_ns: i64,
    pub message: String,
    pub client_order_id: Option<String>,
    pub mismatch: Option<StateMismatch>,
    pub severity: ReconSeverity,
}

impl ReconEvent {
    pub fn new(event_type: ReconEventType, ts_ns: i64, message: impl Into<String>) -> Self {
        Self {
            event_type,
            ts_ns,
            message: message.into(),
            client_order_id: None,
            mismatch: None,
            severity: ReconSeverity::Info,
        }
    }
}

/// Counters across the reconciler's lifetime
#[derive(Debug, Clone, Default)]
pub struct ReconStats {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub mismatches_detected: u64,
    pub mismatches_corrected: u64,
    pub orphans_found: u64,
    pub orphans_cancelled: u64,
    pub strategy_freezes: u64,
    pub last_cycle_ts_ns: i64,
    pub last_cycle_duration_ns: i64,
}
