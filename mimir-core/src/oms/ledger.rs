//! Balance ledger: per-asset free/locked accounting.
//!
//! Every open order is backed by a reservation that moves funds from the
//! free bucket to the locked bucket. `free + locked` for an asset only
//! changes through a fill settlement or an explicit deposit/withdraw.

use crate::core::QTY_EPSILON;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Snapshot of a single asset balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    free: f64,
    locked: f64,
}

/// Thread-safe per-asset balance ledger
#[derive(Debug, Default)]
pub struct BalanceLedger {
    // BTreeMap keeps snapshot ordering deterministic for event output
    inner: RwLock<BTreeMap<String, Bucket>>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// External credit: increases the free bucket.
    pub fn deposit(&self, asset: &str, amount: f64) {
        let mut inner = self.inner.write();
        let bucket = inner.entry(asset.to_string()).or_default();
        bucket.free += amount;
        debug!(asset, amount, free = bucket.free, "balance deposit");
    }

    /// External debit from the free bucket. Returns false when free funds
    /// are insufficient; the ledger is left unchanged.
    pub fn withdraw(&self, asset: &str, amount: f64) -> bool {
        let mut inner = self.inner.write();
        let bucket = inner.entry(asset.to_string()).or_default();
        if bucket.free + QTY_EPSILON < amount {
            return false;
        }
        bucket.free -= amount;
        true
    }

    /// Move `amount` from free to locked to back an open order.
    /// Returns false (unchanged ledger) when free funds are insufficient.
    pub fn reserve(&self, asset: &str, amount: f64) -> bool {
        let mut inner = self.inner.write();
        let bucket = inner.entry(asset.to_string()).or_default();
        if bucket.free + QTY_EPSILON < amount {
            debug!(asset, amount, free = bucket.free, "reserve refused");
            return false;
        }
        bucket.free -= amount;
        bucket.locked += amount;
        true
    }

    /// Release a reservation back to the free bucket (cancel path).
    pub fn release(&self, asset: &str, amount: f64) {
        let mut inner = self.inner.write();
        let bucket = inner.entry(asset.to_string()).or_default();
        bucket.locked -= amount;
        bucket.free += amount;
    }

    /// Settle a buy fill: the quote reservation is consumed, any
    /// over-reservation is refunded to free quote, and the bought base
    /// quantity lands in free base.
    pub fn settle_buy(&self, quote: &str, base: &str, reserved: f64, notional: f64, base_qty: f64) {
        let refund = if reserved > notional {
            reserved - notional
        } else {
            0.0
        };
        let mut inner = self.inner.write();
        {
            let q = inner.entry(quote.to_string()).or_default();
            q.locked -= reserved;
            q.free += refund;
        }
        {
            let b = inner.entry(base.to_string()).or_default();
            b.free += base_qty;
        }
    }

    /// Settle a sell fill: the base reservation is consumed and the sale
    /// proceeds land in free quote.
    pub fn settle_sell(&self, quote: &str, base: &str, reserved: f64, proceeds: f64) {
        let mut inner = self.inner.write();
        {
            let b = inner.entry(base.to_string()).or_default();
            b.locked -= reserved;
        }
        {
            let q = inner.entry(quote.to_string()).or_default();
            q.free += proceeds;
        }
    }

    /// Balance for a single asset, zeros if never touched.
    pub fn get(&self, asset: &str) -> Balance {
        let inner = self.inner.read();
        let bucket = inner.get(asset).copied().unwrap_or_default();
        Balance {
            asset: asset.to_string(),
            free: bucket.free,
            locked: bucket.locked,
        }
    }

    /// Snapshot of every asset, ordered by asset name.
    pub fn snapshot(&self) -> Vec<Balance> {
        let inner = self.inner.read();
        inner
            .iter()
            .map(|(asset, bucket)| Balance {
                asset: asset.clone(),
                free: bucket.free,
                locked: bucket.locked,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_deposit_and_get() {
        let ledger = BalanceLedger::new();
        ledger.deposit("USDT", 1000.0);
        let b = ledger.get("USDT");
        assert_relative_eq!(b.free, 1000.0);
        assert_relative_eq!(b.locked, 0.0);
    }

    #[test]
    fn test_reserve_insufficient() {
        let ledger = BalanceLedger::new();
        ledger.deposit("USDT", 1000.0);
        assert!(!ledger.reserve("USDT", 5000.0));
        // Unchanged on refusal
        let b = ledger.get("USDT");
        assert_relative_eq!(b.free, 1000.0);
        assert_relative_eq!(b.locked, 0.0);
    }

    #[test]
    fn test_reserve_and_release() {
        let ledger = BalanceLedger::new();
        ledger.deposit("USDT", 100_000.0);
        assert!(ledger.reserve("USDT", 50_000.0));
        let b = ledger.get("USDT");
        assert_relative_eq!(b.free, 50_000.0);
        assert_relative_eq!(b.locked, 50_000.0);

        ledger.release("USDT", 50_000.0);
        let b = ledger.get("USDT");
        assert_relative_eq!(b.free, 100_000.0);
        assert_relative_eq!(b.locked, 0.0);
    }

    #[test]
    fn test_settle_buy_with_refund() {
        let ledger = BalanceLedger::new();
        ledger.deposit("USDT", 100_000.0);
        assert!(ledger.reserve("USDT", 50_000.0));

        // Filled cheaper than reserved: 0.9 BTC at 50000 = 45000 notional
        ledger.settle_buy("USDT", "BTC", 50_000.0, 45_000.0, 0.9);

        let usdt = ledger.get("USDT");
        assert_relative_eq!(usdt.free, 55_000.0);
        assert_relative_eq!(usdt.locked, 0.0);
        let btc = ledger.get("BTC");
        assert_relative_eq!(btc.free, 0.9);
    }

    #[test]
    fn test_settle_sell() {
        let ledger = BalanceLedger::new();
        ledger.deposit("BTC", 2.0);
        assert!(ledger.reserve("BTC", 1.0));

        ledger.settle_sell("USDT", "BTC", 1.0, 50_000.0);

        let btc = ledger.get("BTC");
        assert_relative_eq!(btc.free, 1.0);
        assert_relative_eq!(btc.locked, 0.0);
        let usdt = ledger.get("USDT");
        assert_relative_eq!(usdt.free, 50_000.0);
    }

    #[test]
    fn test_conservation_under_reserve_cycle() {
        let ledger = BalanceLedger::new();
        ledger.deposit("USDT", 12_345.0);
        let total_before = ledger.get("USDT").total();

        assert!(ledger.reserve("USDT", 4_000.0));
        assert_relative_eq!(ledger.get("USDT").total(), total_before);
        ledger.release("USDT", 4_000.0);
        assert_relative_eq!(ledger.get("USDT").total(), total_before);
    }

    #[test]
    fn test_withdraw() {
        let ledger = BalanceLedger::new();
        ledger.deposit("USDT", 100.0);
        assert!(ledger.withdraw("USDT", 40.0));
        assert!(!ledger.withdraw("USDT", 100.0));
        assert_relative_eq!(ledger.get("USDT").free, 60.0);
    }
}
