//! Dynamic risk thresholds.
//!
//! Scales the base position, leverage and stop-loss limits with market
//! condition, volatility percentile, drawdown and time to close. All
//! multipliers live in [0.1, 1.0] and compose multiplicatively.

use serde::{Deserialize, Serialize};

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarketCondition {
    #[default]
    Normal,
    HighVolatility,
    LowLiquidity,
    Trending,
    MeanReverting,
    Crisis,
}

impl MarketCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCondition::Normal => "Normal",
            MarketCondition::HighVolatility => "HighVolatility",
            MarketCondition::LowLiquidity => "LowLiquidity",
            MarketCondition::Trending => "Trending",
            MarketCondition::MeanReverting => "MeanReverting",
            MarketCondition::Crisis => "Crisis",
        }
    }
}

/// Condition metrics supplied by the market-data side
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketConditionState {
    pub condition: MarketCondition,
    /// Current volatility vs history, 0-100
    pub volatility_percentile: f64,
    /// 0-1, from spread and depth
    pub liquidity_score: f64,
    /// Trend strength, 0-100
    pub trend_strength: f64,
    pub last_update_ns: i64,
}

impl Default for MarketConditionState {
    fn default() -> Self {
        Self {
            condition: MarketCondition::Normal,
            volatility_percentile: 50.0,
            liquidity_score: 1.0,
            trend_strength: 0.0,
            last_update_ns: 0,
        }
    }
}

/// Base thresholds and adjustment rates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicThresholdConfig {
    pub base_max_position_size: f64,
    pub base_max_leverage: f64,
    pub base_stop_loss_pct: f64,

    /// Reduction applied between the 50th and 100th vol percentile
    pub vol_scale_factor: f64,

    /// Drawdown level where reduction starts
    pub drawdown_reduction_start: f64,
    /// Reduction per unit of excess drawdown
    pub drawdown_reduction_rate: f64,

    /// Reduce exposure approaching market close
    pub reduce_before_close: bool,
    pub minutes_before_close: i32,
}

impl Default for DynamicThresholdConfig {
    fn default() -> Self {
        Self {
            base_max_position_size: 100.0,
            base_max_leverage: 3.0,
            base_stop_loss_pct: 0.05,
            vol_scale_factor: 0.5,
            drawdown_reduction_start: 0.05,
            drawdown_reduction_rate: 2.0,
            reduce_before_close: false,
            minutes_before_close: 30,
        }
    }
}

/// Threshold controller fed by market state, drawdown and the clock
#[derive(Debug, Clone)]
pub struct DynamicThresholdController {
    config: DynamicThresholdConfig,
    market_state: MarketConditionState,
    current_drawdown: f64,
    minutes_to_close: i32,
}

impl DynamicThresholdController {
    pub fn new(config: DynamicThresholdConfig) -> Self {
        Self {
            config,
            market_state: MarketConditionState::default(),
            current_drawdown: 0.0,
            minutes_to_close: -1,
        }
    }

    pub fn config(&self) -> &DynamicThresholdConfig {
        &self.config
    }

    pub fn update_market_condition(&mut self, state: MarketConditionState) {
        self.market_state = state;
    }

    /// Drawdown as a fraction of the running equity peak, clamped 0-1.
    pub fn update_current_drawdown(&mut self, drawdown_pct: f64) {
        self.current_drawdown = drawdown_pct.clamp(0.0, 1.0);
    }

    /// Minutes until market close; negative disables the adjustment.
    pub fn update_time_to_close(&mut self, minutes: i32) {
        self.minutes_to_close = minutes;
    }

    pub fn market_condition(&self) -> MarketCondition {
        self.market_state.condition
    }

    /// Combined position multiplier in [0.1, 1.0].
    pub fn position_size_multiplier(&self) -> f64 {
        let multiplier = self.volatility_adjustment()
            * self.drawdown_adjustment()
            * self.time_adjustment()
            * self.condition_adjustment();
        multiplier.clamp(0.1, 1.0)
    }

    /// Effective max position size.
    pub fn max_position_size(&self) -> f64 {
        self.config.base_max_position_size * self.position_size_multiplier()
    }

    /// Effective max leverage, never below 1.
    pub fn max_leverage(&self) -> f64 {
        let adjusted = self.config.base_max_leverage
            * self.volatility_adjustment()
            * self.drawdown_adjustment()
            * self.condition_adjustment();
        adjusted.max(1.0)
    }

    /// Effective stop-loss percentage: tightens by up to 50% above the
    /// 80th volatility percentile and again under drawdown, floored at
    /// 1%.
    pub fn stop_loss_pct(&self) -> f64 {
        let mut stop = self.config.base_stop_loss_pct;

        if self.market_state.volatility_percentile > 80.0 {
            let vol_factor = (self.market_state.volatility_percentile - 80.0) / 40.0;
            stop *= 1.0 - vol_factor * 0.5;
        }

        if self.current_drawdown > self.config.drawdown_reduction_start {
            let excess = self.current_drawdown - self.config.drawdown_reduction_start;
            let dd_factor = (excess * 2.0).min(0.5);
            stop *= 1.0 - dd_factor;
        }

        stop.max(0.01)
    }

    /// Human-readable summary of every active adjustment.
    pub fn explain_adjustments(&self) -> String {
        let mut parts = Vec::new();

        let vol_adj = self.volatility_adjustment();
        if vol_adj < 1.0 {
            parts.push(format!(
                "volatility at {}th percentile: position reduced to {}%",
                self.market_state.volatility_percentile as i32,
                (vol_adj * 100.0) as i32
            ));
        }
        let dd_adj = self.drawdown_adjustment();
        if dd_adj < 1.0 {
            parts.push(format!(
                "drawdown at {}%: position reduced to {}%",
                (self.current_drawdown * 100.0) as i32,
                (dd_adj * 100.0) as i32
            ));
        }
        let time_adj = self.time_adjustment();
        if time_adj < 1.0 {
            parts.push(format!(
                "{} minutes to close: position reduced to {}%",
                self.minutes_to_close,
                (time_adj * 100.0) as i32
            ));
        }
        let cond_adj = self.condition_adjustment();
        if cond_adj < 1.0 {
            parts.push(format!(
                "market condition ({}): position reduced to {}%",
                self.market_state.condition.as_str(),
                (cond_adj * 100.0) as i32
            ));
        }

        if parts.is_empty() {
            "no adjustments active - operating at base thresholds".to_string()
        } else {
            parts.join("; ")
        }
    }

    pub fn reset(&mut self) {
        self.market_state = MarketConditionState::default();
        self.current_drawdown = 0.0;
        self.minutes_to_close = -1;
    }

    /// 1.0 at or below the 50th percentile, linearly reduced above it.
    fn volatility_adjustment(&self) -> f64 {
        if self.market_state.volatility_percentile <= 50.0 {
            return 1.0;
        }
        let excess = (self.market_state.volatility_percentile - 50.0) / 50.0;
        (1.0 - excess * self.config.vol_scale_factor).max(0.1)
    }

    fn drawdown_adjustment(&self) -> f64 {
        if self.current_drawdown <= self.config.drawdown_reduction_start {
            return 1.0;
        }
        let excess = self.current_drawdown - self.config.drawdown_reduction_start;
        (1.0 - excess * self.config.drawdown_reduction_rate).max(0.1)
    }

    /// Linear 1.0 -> 0.5 over the close window.
    fn time_adjustment(&self) -> f64 {
        if !self.config.reduce_before_close || self.minutes_to_close < 0 {
            return 1.0;
        }
        if self.minutes_to_close >= self.config.minutes_before_close {
            return 1.0;
        }
        let time_factor = self.minutes_to_close as f64 / self.config.minutes_before_close as f64;
        0.5 + time_factor * 0.5
    }

    fn condition_adjustment(&self) -> f64 {
        match self.market_state.condition {
            MarketCondition::Normal => 1.0,
            MarketCondition::HighVolatility => 0.8,
            MarketCondition::LowLiquidity => 0.7,
            MarketCondition::Trending => 1.0,
            MarketCondition::MeanReverting => 1.0,
            MarketCondition::Crisis => 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn controller() -> DynamicThresholdController {
        DynamicThresholdController::new(DynamicThresholdConfig::default())
    }

    #[test]
    fn test_baseline_no_adjustments() {
        let ctl = controller();
        assert_relative_eq!(ctl.position_size_multiplier(), 1.0);
        assert_relative_eq!(ctl.max_position_size(), 100.0);
        assert_relative_eq!(ctl.max_leverage(), 3.0);
        assert_relative_eq!(ctl.stop_loss_pct(), 0.05);
        assert!(ctl.explain_adjustments().contains("no adjustments"));
    }

    #[test]
    fn test_volatility_reduction() {
        let mut ctl = controller();
        ctl.update_market_condition(MarketConditionState {
            volatility_percentile: 75.0,
            ..Default::default()
        });
        // (75-50)/50 * 0.5 = 0.25 reduction
        assert_relative_eq!(ctl.position_size_multiplier(), 0.75);

        ctl.update_market_condition(MarketConditionState {
            volatility_percentile: 100.0,
            ..Default::default()
        });
        assert_relative_eq!(ctl.position_size_multiplier(), 0.5);
    }

    #[test]
    fn test_below_median_volatility_no_reduction() {
        let mut ctl = controller();
        ctl.update_market_condition(MarketConditionState {
            volatility_percentile: 20.0,
            ..Default::default()
        });
        assert_relative_eq!(ctl.position_size_multiplier(), 1.0);
    }

    #[test]
    fn test_drawdown_reduction() {
        let mut ctl = controller();
        // 15% drawdown, 5% start, rate 2.0: 1 - 0.10*2 = 0.8
        ctl.update_current_drawdown(0.15);
        assert_relative_eq!(ctl.position_size_multiplier(), 0.8);

        // Deep drawdown bottoms at the 0.1 floor
        ctl.update_current_drawdown(0.60);
        assert_relative_eq!(ctl.position_size_multiplier(), 0.1);
    }

    #[test]
    fn test_time_adjustment_window() {
        let mut ctl = DynamicThresholdController::new(DynamicThresholdConfig {
            reduce_before_close: true,
            minutes_before_close: 30,
            ..Default::default()
        });
        ctl.update_time_to_close(60);
        assert_relative_eq!(ctl.position_size_multiplier(), 1.0);

        ctl.update_time_to_close(15);
        assert_relative_eq!(ctl.position_size_multiplier(), 0.75);

        ctl.update_time_to_close(0);
        assert_relative_eq!(ctl.position_size_multiplier(), 0.5);
    }

    #[test]
    fn test_condition_table() {
        let mut ctl = controller();
        let expect = [
            (MarketCondition::Normal, 1.0),
            (MarketCondition::HighVolatility, 0.8),
            (MarketCondition::LowLiquidity, 0.7),
            (MarketCondition::Trending, 1.0),
            (MarketCondition::MeanReverting, 1.0),
            (MarketCondition::Crisis, 0.3),
        ];
        for (condition, multiplier) in expect {
            ctl.update_market_condition(MarketConditionState {
                condition,
                ..Default::default()
            });
            assert_relative_eq!(ctl.position_size_multiplier(), multiplier);
        }
    }

    #[test]
    fn test_multipliers_compose_and_clamp() {
        let mut ctl = controller();
        ctl.update_market_condition(MarketConditionState {
            condition: MarketCondition::Crisis,
            volatility_percentile: 100.0,
            ..Default::default()
        });
        ctl.update_current_drawdown(0.30);
        // 0.5 * 0.5 * 0.3 = 0.075, clamped to the 0.1 floor
        assert_relative_eq!(ctl.position_size_multiplier(), 0.1);
        assert_relative_eq!(ctl.max_position_size(), 10.0);
    }

    #[test]
    fn test_leverage_floor() {
        let mut ctl = controller();
        ctl.update_market_condition(MarketConditionState {
            condition: MarketCondition::Crisis,
            volatility_percentile: 100.0,
            ..Default::default()
        });
        // 3.0 * 0.5 * 0.3 = 0.45, floored at 1.0
        assert_relative_eq!(ctl.max_leverage(), 1.0);
    }

    #[test]
    fn test_stop_loss_tightens() {
        let mut ctl = controller();
        ctl.update_market_condition(MarketConditionState {
            volatility_percentile: 100.0,
            ..Default::default()
        });
        // Full vol tightening halves the 5% base
        assert_relative_eq!(ctl.stop_loss_pct(), 0.025);

        // Deep drawdown tightens by another 50%, to 1.25%
        ctl.update_current_drawdown(0.40);
        assert_relative_eq!(ctl.stop_loss_pct(), 0.0125);
    }

    #[test]
    fn test_stop_loss_floor() {
        let mut ctl = DynamicThresholdController::new(DynamicThresholdConfig {
            base_stop_loss_pct: 0.015,
            ..Default::default()
        });
        ctl.update_market_condition(MarketConditionState {
            volatility_percentile: 100.0,
            ..Default::default()
        });
        ctl.update_current_drawdown(0.50);
        assert_relative_eq!(ctl.stop_loss_pct(), 0.01);
    }

    #[test]
    fn test_reset() {
        let mut ctl = controller();
        ctl.update_current_drawdown(0.5);
        ctl.update_market_condition(MarketConditionState {
            condition: MarketCondition::Crisis,
            ..Default::default()
        });
        ctl.reset();
        assert_relative_eq!(ctl.position_size_multiplier(), 1.0);
    }

    #[test]
    fn test_explanations_listed() {
        let mut ctl = controller();
        ctl.update_market_condition(MarketConditionState {
            condition: MarketCondition::LowLiquidity,
            volatility_percentile: 90.0,
            ..Default::default()
        });
        ctl.update_current_drawdown(0.10);
        let explanation = ctl.explain_adjustments();
        assert!(explanation.contains("volatility"));
        assert!(explanation.contains("drawdown"));
        assert!(explanation.contains("LowLiquidity"));
    }
}
