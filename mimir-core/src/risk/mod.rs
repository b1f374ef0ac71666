//! Risk management.
//!
//! Four cooperating layers:
//!
//! 1. **Admission** ([`RiskEngine`]) - ordered pre-trade checks
//!    (freeze, breaker, rate, size, funds, position, price band) and
//!    post-trade stop-loss / take-profit signals.
//! 2. **VaR** ([`VarCalculator`]) - historical, parametric and Monte
//!    Carlo value-at-risk with portfolio aggregation and component
//!    attribution.
//! 3. **Stress** ([`StressTestEngine`]) - factor-shock scenarios,
//!    historical crash replays, sensitivity sweeps, reverse stress.
//! 4. **Dynamic thresholds** ([`DynamicThresholdController`]) - scales
//!    the base limits with volatility, drawdown, clock and market
//!    regime, feeding back into admission.

pub mod dynamic;
pub mod engine;
pub mod stress;
pub mod var;

pub use dynamic::{
    DynamicThresholdConfig, DynamicThresholdController, MarketCondition, MarketConditionState,
};
pub use engine::{RiskAlert, RiskDecision, RiskEngine, RiskLevel, RiskSignal};
pub use stress::{
    FactorShock, MarketFactor, ScenarioComparison, SensitivityResult, StressPosition,
    StressScenario, StressScenarioBuilder, StressScenarioType, StressTestEngine, StressTestResult,
};
pub use var::{
    prices_to_log_returns, prices_to_returns, scale_var_to_holding_period, z_score,
    CovarianceEntry, IncrementalVarCalculator, RiskContribution, VarCalculator, VarConfig,
    VarError, VarMethod, VarPosition, VarResult,
};
