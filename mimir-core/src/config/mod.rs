//! Runtime configuration.
//!
//! Plain serde structs with sensible defaults; everything is
//! instance-scoped and injected, there are no process-wide singletons.

pub mod types;

pub use types::{
    EngineConfig, LatencyWindowConfig, ReconciliationConfig, RiskConfig, RouterConfig,
    StalenessConfig, WalConfig,
};
