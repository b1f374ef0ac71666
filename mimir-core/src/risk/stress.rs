//! Stress testing: factor-shock scenarios over the current portfolio,
//! built-in historical crash replays, sensitivity sweeps and reverse
//! stress.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stress scenario type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StressScenarioType {
    /// Replay of a historical market event
    Historical,
    /// User-defined shock scenario
    Hypothetical,
    /// Single-factor sensitivity analysis
    Sensitivity,
}

/// Market factor a shock applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketFactor {
    Price,
    Volatility,
    Correlation,
    Liquidity,
    InterestRate,
    FundingRate,
}

/// Shock on a single factor. An empty symbol applies portfolio-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorShock {
    pub factor: MarketFactor,
    /// Target symbol; empty for portfolio-wide
    pub symbol: String,
    pub magnitude: f64,
    /// Relative (fractional change) vs absolute shift
    pub is_relative: bool,
}

/// A named set of factor shocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scenario_type: StressScenarioType,
    pub shocks: Vec<FactorShock>,
    pub historical_event: String,
}

/// Position input to a stress run
#[derive(Debug, Clone, PartialEq)]
pub struct StressPosition {
    pub symbol: String,
    /// Signed size
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub volatility: f64,
}

/// Stress impact on one position
#[derive(Debug, Clone, PartialEq)]
pub struct PositionStressResult {
    pub symbol: String,
    pub base_value: f64,
    pub stressed_value: f64,
    pub pnl_impact: f64,
    pub pnl_impact_pct: f64,
}

/// Stress impact on the whole portfolio
#[derive(Debug, Clone, PartialEq)]
pub struct StressTestResult {
    pub scenario_id: String,
    pub scenario_name: String,
    pub base_portfolio_value: f64,
    pub stressed_portfolio_value: f64,
    pub total_pnl_impact: f64,
    pub total_pnl_impact_pct: f64,
    pub position_results: Vec<PositionStressResult>,
}

/// Sensitivity sweep output
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityResult {
    pub factor: MarketFactor,
    pub symbol: String,
    pub shock_levels: Vec<f64>,
    pub pnl_impacts: Vec<f64>,
    /// First-order sensitivity over the sweep
    pub delta: f64,
    /// Second-order sensitivity (convexity)
    pub gamma: f64,
}

/// Summary across a batch of scenario runs
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioComparison {
    pub worst_scenario_id: String,
    pub worst_pnl_impact: f64,
    pub best_pnl_impact: f64,
    pub average_pnl_impact: f64,
    pub scenarios_tested: usize,
}

/// Builder for ad-hoc scenarios
#[derive(Debug, Default)]
pub struct StressScenarioBuilder {
    id: String,
    name: String,
    description: String,
    scenario_type: Option<StressScenarioType>,
    shocks: Vec<FactorShock>,
    historical_event: String,
}

impl StressScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn scenario_type(mut self, scenario_type: StressScenarioType) -> Self {
        self.scenario_type = Some(scenario_type);
        self
    }

    /// Relative price shock; empty symbol applies to every position.
    pub fn price_shock(mut self, symbol: impl Into<String>, shock_pct: f64) -> Self {
        self.shocks.push(FactorShock {
            factor: MarketFactor::Price,
            symbol: symbol.into(),
            magnitude: shock_pct,
            is_relative: true,
        });
        self
    }

    pub fn volatility_shock(mut self, symbol: impl Into<String>, shock_pct: f64) -> Self {
        self.shocks.push(FactorShock {
            factor: MarketFactor::Volatility,
            symbol: symbol.into(),
            magnitude: shock_pct,
            is_relative: true,
        });
        self
    }

    pub fn liquidity_shock(mut self, shock_pct: f64) -> Self {
        self.shocks.push(FactorShock {
            factor: MarketFactor::Liquidity,
            symbol: String::new(),
            magnitude: shock_pct,
            is_relative: true,
        });
        self
    }

    pub fn add_shock(mut self, shock: FactorShock) -> Self {
        self.shocks.push(shock);
        self
    }

    pub fn historical_event(mut self, event: impl Into<String>) -> Self {
        self.historical_event = event.into();
        self
    }

    pub fn build(self) -> StressScenario {
        StressScenario {
            id: self.id,
            name: self.name,
            description: self.description,
            scenario_type: self.scenario_type.unwrap_or(StressScenarioType::Hypothetical),
            shocks: self.shocks,
            historical_event: self.historical_event,
        }
    }
}

/// Stress testing engine holding a scenario library
#[derive(Debug, Default)]
pub struct StressTestEngine {
    scenarios: Vec<StressScenario>,
}

impl StressTestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Scenario library
    // ---------------------------------------------------------------

    pub fn add_scenario(&mut self, scenario: StressScenario) {
        self.scenarios.retain(|s| s.id != scenario.id);
        self.scenarios.push(scenario);
    }

    pub fn scenario(&self, id: &str) -> Option<&StressScenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn scenarios(&self) -> &[StressScenario] {
        &self.scenarios
    }

    pub fn remove_scenario(&mut self, id: &str) -> bool {
        let before = self.scenarios.len();
        self.scenarios.retain(|s| s.id != id);
        self.scenarios.len() != before
    }

    pub fn clear_scenarios(&mut self) {
        self.scenarios.clear();
    }

    /// COVID crash, March 2020: roughly -50% in a day with a volatility
    /// explosion.
    pub fn add_covid_crash_scenario(&mut self) {
        self.add_scenario(
            StressScenarioBuilder::new()
                .id("covid-2020")
                .name("COVID-19 March 2020")
                .description("BTC -50% in 24h, volatility +300%")
                .scenario_type(StressScenarioType::Historical)
                .historical_event("COVID-19 March 2020")
                .price_shock("", -0.50)
                .volatility_shock("", 3.0)
                .build(),
        );
    }

    /// LUNA/UST collapse, May 2022.
    pub fn add_luna_collapse_scenario(&mut self) {
        self.add_scenario(
            StressScenarioBuilder::new()
                .id("luna-2022")
                .name("LUNA Collapse May 2022")
                .description("Broad market -30%, volatility +150%")
                .scenario_type(StressScenarioType::Historical)
                .historical_event("LUNA/UST May 2022")
                .price_shock("", -0.30)
                .volatility_shock("", 1.5)
                .build(),
        );
    }

    /// FTX collapse, November 2022.
    pub fn add_ftx_collapse_scenario(&mut self) {
        self.add_scenario(
            StressScenarioBuilder::new()
                .id("ftx-2022")
                .name("FTX Collapse November 2022")
                .description("BTC -25%, exchange contagion")
                .scenario_type(StressScenarioType::Historical)
                .historical_event("FTX November 2022")
                .price_shock("", -0.25)
                .volatility_shock("", 1.0)
                .build(),
        );
    }

    /// Sudden drop with liquidity evaporation.
    pub fn add_flash_crash_scenario(&mut self) {
        self.add_scenario(
            StressScenarioBuilder::new()
                .id("flash-crash")
                .name("Flash Crash")
                .description("Sudden -15% with liquidity evaporation")
                .scenario_type(StressScenarioType::Historical)
                .historical_event("Flash crash")
                .price_shock("", -0.15)
                .liquidity_shock(-0.5)
                .build(),
        );
    }

    pub fn add_all_historical_scenarios(&mut self) {
        self.add_covid_crash_scenario();
        self.add_luna_collapse_scenario();
        self.add_ftx_collapse_scenario();
        self.add_flash_crash_scenario();
    }

    // ---------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------

    /// Run a stored scenario by id.
    pub fn run_by_id(
        &self,
        scenario_id: &str,
        positions: &[StressPosition],
    ) -> Option<StressTestResult> {
        let scenario = self.scenario(scenario_id)?;
        Some(self.run(scenario, positions))
    }

    /// Run a scenario (stored or ad hoc) over the portfolio.
    pub fn run(&self, scenario: &StressScenario, positions: &[StressPosition]) -> StressTestResult {
        let mut position_results = Vec::with_capacity(positions.len());
        let mut base_total = 0.0;
        let mut stressed_total = 0.0;

        for position in positions {
            let stressed_price = stressed_price(position, &scenario.shocks);
            let base_value = position.size * position.current_price;
            let stressed_value = position.size * stressed_price;
            let pnl_impact = position.size * (stressed_price - position.current_price);
            let pnl_impact_pct = if base_value.abs() > f64::EPSILON {
                pnl_impact / base_value.abs() * 100.0
            } else {
                0.0
            };

            base_total += base_value;
            stressed_total += stressed_value;
            position_results.push(PositionStressResult {
                symbol: position.symbol.clone(),
                base_value,
                stressed_value,
                pnl_impact,
                pnl_impact_pct,
            });
        }

        let total_pnl_impact = stressed_total - base_total;
        debug!(
            scenario = %scenario.id,
            total_pnl_impact,
            positions = positions.len(),
            "stress scenario evaluated"
        );
        StressTestResult {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            base_portfolio_value: base_total,
            stressed_portfolio_value: stressed_total,
            total_pnl_impact,
            total_pnl_impact_pct: if base_total.abs() > f64::EPSILON {
                total_pnl_impact / base_total.abs() * 100.0
            } else {
                0.0
            },
            position_results,
        }
    }

    /// Run every stored scenario.
    pub fn run_all_scenarios(&self, positions: &[StressPosition]) -> Vec<StressTestResult> {
        self.scenarios
            .iter()
            .map(|scenario| self.run(scenario, positions))
            .collect()
    }

    /// Sweep one factor over `[shock_min, shock_max]` and fit first and
    /// second order sensitivities. An empty symbol shocks every
    /// position.
    pub fn run_sensitivity_analysis(
        &self,
        factor: MarketFactor,
        symbol: &str,
        positions: &[StressPosition],
        shock_min: f64,
        shock_max: f64,
        num_points: usize,
    ) -> SensitivityResult {
        let num_points = num_points.max(3);
        let step = (shock_max - shock_min) / (num_points - 1) as f64;

        let mut shock_levels = Vec::with_capacity(num_points);
        let mut pnl_impacts = Vec::with_capacity(num_points);
        for i in 0..num_points {
            let magnitude = shock_min + step * i as f64;
            let scenario = StressScenarioBuilder::new()
                .id("sensitivity")
                .name("sensitivity sweep")
                .scenario_type(StressScenarioType::Sensitivity)
                .add_shock(FactorShock {
                    factor,
                    symbol: symbol.to_string(),
                    magnitude,
                    is_relative: true,
                })
                .build();
            let result = self.run(&scenario, positions);
            shock_levels.push(magnitude);
            pnl_impacts.push(result.total_pnl_impact);
        }

        let range = shock_max - shock_min;
        let delta = if range.abs() > f64::EPSILON {
            (pnl_impacts[num_points - 1] - pnl_impacts[0]) / range
        } else {
            0.0
        };
        // Central second difference at the midpoint
        let mid = num_points / 2;
        let gamma = if mid > 0 && mid + 1 < num_points && step.abs() > f64::EPSILON {
            (pnl_impacts[mid + 1] - 2.0 * pnl_impacts[mid] + pnl_impacts[mid - 1]) / (step * step)
        } else {
            0.0
        };

        SensitivityResult {
            factor,
            symbol: symbol.to_string(),
            shock_levels,
            pnl_impacts,
            delta,
            gamma,
        }
    }

    /// Compare a batch of results.
    pub fn compare_scenarios(&self, results: &[StressTestResult]) -> ScenarioComparison {
        let mut comparison = ScenarioComparison {
            worst_scenario_id: String::new(),
            worst_pnl_impact: f64::MAX,
            best_pnl_impact: f64::MIN,
            average_pnl_impact: 0.0,
            scenarios_tested: results.len(),
        };
        if results.is_empty() {
            comparison.worst_pnl_impact = 0.0;
            comparison.best_pnl_impact = 0.0;
            return comparison;
        }

        let mut sum = 0.0;
        for result in results {
            sum += result.total_pnl_impact;
            if result.total_pnl_impact < comparison.worst_pnl_impact {
                comparison.worst_pnl_impact = result.total_pnl_impact;
                comparison.worst_scenario_id = result.scenario_id.clone();
            }
            if result.total_pnl_impact > comparison.best_pnl_impact {
                comparison.best_pnl_impact = result.total_pnl_impact;
            }
        }
        comparison.average_pnl_impact = sum / results.len() as f64;
        comparison
    }

    /// Reverse stress: the uniform relative price shock whose portfolio
    /// P&L approximately equals `target_loss` (typically negative).
    /// `None` when the portfolio carries no price exposure.
    pub fn reverse_stress(
        &self,
        target_loss: f64,
        positions: &[StressPosition],
    ) -> Option<f64> {
        let exposure: f64 = positions
            .iter()
            .map(|p| p.size * p.current_price)
            .sum();
        if exposure.abs() < f64::EPSILON {
            return None;
        }
        Some(target_loss / exposure)
    }
}

/// Stressed price for one position: a symbol-specific price shock wins
/// over a portfolio-wide one; non-price factors leave the price
/// untouched.
fn stressed_price(position: &StressPosition, shocks: &[FactorShock]) -> f64 {
    let shock = shocks
        .iter()
        .find(|s| s.factor == MarketFactor::Price && s.symbol == position.symbol)
        .or_else(|| {
            shocks
                .iter()
                .find(|s| s.factor == MarketFactor::Price && s.symbol.is_empty())
        });

    match shock {
        Some(shock) if shock.is_relative => position.current_price * (1.0 + shock.magnitude),
        Some(shock) => position.current_price + shock.magnitude,
        None => position.current_price,
    }
}
