use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Write-ahead log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Directory for WAL files
    #[serde(default = "default_wal_dir")]
    pub directory: PathBuf,

    /// Prefix for WAL files (e.g. "orders")
    #[serde(default = "default_wal_prefix")]
    pub file_prefix: String,

    /// Max file size before rotation (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Max number of WAL files to keep
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// fsync after each write
    #[serde(default = "default_true")]
    pub sync_on_write: bool,

    /// Entries between automatic checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
}

fn default_wal_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_wal_prefix() -> String {
    "orders".to_string()
}

fn default_max_file_size() -> u64 {
    64 * 1024 * 1024
}

fn default_max_files() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_interval() -> u64 {
    1000
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            directory: default_wal_dir(),
            file_prefix: default_wal_prefix(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            sync_on_write: true,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Order/position core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between accept and simulated fill (nanoseconds).
    /// Informational for live venues.
    #[serde(default = "default_fill_delay_ns")]
    pub fill_delay_ns: i64,

    /// Write-ahead log settings
    #[serde(default)]
    pub wal: WalConfig,
}

fn default_fill_delay_ns() -> i64 {
    300_000_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fill_delay_ns: default_fill_delay_ns(),
            wal: WalConfig::default(),
        }
    }
}

/// Risk engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Account balance in quote currency
    #[serde(default)]
    pub account_balance: f64,

    /// Max position size per symbol (0 = unlimited)
    #[serde(default)]
    pub max_position_size: f64,

    /// Maximum leverage used for the funds check
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,

    /// Max allowed deviation of a limit price from the reference price
    #[serde(default = "default_max_price_deviation")]
    pub max_price_deviation: f64,

    /// Max order submissions per second
    #[serde(default = "default_max_order_rate")]
    pub max_order_rate: usize,

    /// Max quantity per order
    #[serde(default = "default_max_order_size")]
    pub max_order_size: f64,

    /// Stop-loss signal threshold (fraction of entry notional)
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    #[serde(default)]
    pub stop_loss_enabled: bool,

    /// Take-profit signal threshold
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,

    #[serde(default)]
    pub take_profit_enabled: bool,
}

fn default_max_leverage() -> f64 {
    1.0
}

fn default_max_price_deviation() -> f64 {
    0.1
}

fn default_max_order_rate() -> usize {
    100
}

fn default_max_order_size() -> f64 {
    1000.0
}

fn default_stop_loss_pct() -> f64 {
    0.05
}

fn default_take_profit_pct() -> f64 {
    0.1
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_balance: 0.0,
            max_position_size: 0.0,
            max_leverage: default_max_leverage(),
            max_price_deviation: default_max_price_deviation(),
            max_order_rate: default_max_order_rate(),
            max_order_size: default_max_order_size(),
            stop_loss_pct: default_stop_loss_pct(),
            stop_loss_enabled: false,
            take_profit_pct: default_take_profit_pct(),
            take_profit_enabled: false,
        }
    }
}

/// Smart router scoring weights. Each weight is clamped to [0, 1] when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_price_weight")]
    pub price_weight: f64,

    #[serde(default = "default_fee_weight")]
    pub fee_weight: f64,

    #[serde(default = "default_latency_weight")]
    pub latency_weight: f64,

    #[serde(default = "default_liquidity_weight")]
    pub liquidity_weight: f64,

    #[serde(default = "default_reliability_weight")]
    pub reliability_weight: f64,

    /// Taker fee assumed when a venue has no configured fee schedule
    #[serde(default = "default_taker_fee")]
    pub default_taker_fee: f64,
}

fn default_price_weight() -> f64 {
    0.35
}

fn default_fee_weight() -> f64 {
    0.20
}

fn default_latency_weight() -> f64 {
    0.15
}

fn default_liquidity_weight() -> f64 {
    0.20
}

fn default_reliability_weight() -> f64 {
    0.10
}

fn default_taker_fee() -> f64 {
    0.001
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            price_weight: default_price_weight(),
            fee_weight: default_fee_weight(),
            latency_weight: default_latency_weight(),
            liquidity_weight: default_liquidity_weight(),
            reliability_weight: default_reliability_weight(),
            default_taker_fee: default_taker_fee(),
        }
    }
}

/// Order book staleness policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StalenessConfig {
    /// A venue slice older than this is flagged stale and excluded
    /// from aggregation.
    #[serde(default = "default_max_age", with = "duration_secs")]
    pub max_age: Duration,
}

fn default_max_age() -> Duration {
    Duration::from_secs(5)
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            max_age: default_max_age(),
        }
    }
}

/// Latency tracker window bounds. Both are enforced on every insert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencyWindowConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_window_duration", with = "duration_secs")]
    pub window_duration: Duration,
}

fn default_window_size() -> usize {
    1000
}

fn default_window_duration() -> Duration {
    Duration::from_secs(300)
}

impl Default for LatencyWindowConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_duration: default_window_duration(),
        }
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Interval between reconciliation cycles
    #[serde(default = "default_recon_interval", with = "duration_secs")]
    pub interval: Duration,

    /// Cancel orders found on the venue but unknown locally
    #[serde(default)]
    pub auto_cancel_orphaned: bool,

    /// Freeze strategy after sustained mismatches
    #[serde(default = "default_true")]
    pub freeze_on_mismatch: bool,

    /// Consecutive mismatching cycles before freezing
    #[serde(default = "default_max_mismatches")]
    pub max_mismatches_before_freeze: u32,

    /// Symbols reconciled against each venue
    #[serde(default = "default_recon_symbols")]
    pub symbols: Vec<String>,

    /// Bounded audit ring size
    #[serde(default = "default_max_event_history")]
    pub max_event_history: usize,

    /// Timeout for a single venue query
    #[serde(default = "default_query_timeout", with = "duration_secs")]
    pub query_timeout: Duration,
}

fn default_recon_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_mismatches() -> u32 {
    3
}

fn default_recon_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}

fn default_max_event_history() -> usize {
    1000
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: default_recon_interval(),
            auto_cancel_orphaned: false,
            freeze_on_mismatch: true,
            max_mismatches_before_freeze: default_max_mismatches(),
            symbols: default_recon_symbols(),
            max_event_history: default_max_event_history(),
            query_timeout: default_query_timeout(),
        }
    }
}

/// Serialize/deserialize a Duration as whole seconds (f64 for sub-second).
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
