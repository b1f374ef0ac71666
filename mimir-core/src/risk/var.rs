//! Value-at-Risk models: historical simulation, parametric
//! (variance-covariance) and Monte Carlo, plus portfolio VaR with
//! covariances, component attribution and an incremental rolling-window
//! estimator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Minimum observations for historical VaR
const MIN_HISTORICAL_SAMPLES: usize = 30;
/// Minimum paths for Monte Carlo VaR
const MIN_MONTE_CARLO_PATHS: usize = 1000;

/// z-scores for the two standard confidence levels
pub const Z_95: f64 = 1.6449;
pub const Z_99: f64 = 2.3263;

/// VaR calculation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VarMethod {
    #[default]
    Historical,
    Parametric,
    MonteCarlo,
}

#[derive(Debug, Error)]
pub enum VarError {
    #[error("insufficient data: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// VaR calculation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarConfig {
    pub method: VarMethod,
    pub monte_carlo_paths: usize,
    pub holding_period_days: u32,
    /// Monte Carlo seed; 0 selects an entropy-based seed.
    pub seed: u64,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            method: VarMethod::Historical,
            monte_carlo_paths: 10_000,
            holding_period_days: 1,
            seed: 0,
        }
    }
}

/// VaR/CVaR at both standard confidence levels
#[derive(Debug, Clone, PartialEq)]
pub struct VarResult {
    pub var_95: f64,
    pub var_99: f64,
    pub cvar_95: f64,
    pub cvar_99: f64,
    pub method: VarMethod,
    pub sample_size: usize,
    pub simulation_paths: usize,
    pub mean_return: f64,
    pub std_dev: f64,
}

/// Portfolio position for VaR aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct VarPosition {
    pub symbol: String,
    /// Portfolio weight in [0, 1]
    pub weight: f64,
    pub value: f64,
    /// Volatility of returns over the VaR horizon
    pub volatility: f64,
}

/// Symmetric covariance entry between two symbols. Self-terms are
/// implicit as each position's volatility squared.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceEntry {
    pub symbol_a: String,
    pub symbol_b: String,
    pub covariance: f64,
}

/// Risk contribution of one position
#[derive(Debug, Clone, PartialEq)]
pub struct RiskContribution {
    pub symbol: String,
    pub marginal_var: f64,
    pub component_var: f64,
    pub pct_contribution: f64,
}

/// Multi-method VaR calculator
#[derive(Debug, Clone, Default)]
pub struct VarCalculator {
    config: VarConfig,
}

impl VarCalculator {
    pub fn new(config: VarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VarConfig {
        &self.config
    }

    /// Dispatch on the configured method. Parametric and Monte Carlo
    /// estimate mean/std-dev from the supplied returns.
    pub fn calculate(&self, returns: &[f64], portfolio_value: f64) -> Result<VarResult, VarError> {
        match self.config.method {
            VarMethod::Historical => self.calculate_historical(returns, portfolio_value),
            VarMethod::Parametric => {
                let mean = mean(returns);
                let std_dev = std_dev(returns);
                self.calculate_parametric(mean, std_dev, portfolio_value)
            }
            VarMethod::MonteCarlo => {
                let mean = mean(returns);
                let std_dev = std_dev(returns);
                self.calculate_monte_carlo(mean, std_dev, portfolio_value)
            }
        }
    }

    /// Historical simulation over at least 30 return observations.
    pub fn calculate_historical(
        &self,
        returns: &[f64],
        portfolio_value: f64,
    ) -> Result<VarResult, VarError> {
        if returns.len() < MIN_HISTORICAL_SAMPLES {
            return Err(VarError::InsufficientData {
                needed: MIN_HISTORICAL_SAMPLES,
                got: returns.len(),
            });
        }

        let mut sorted = returns.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let (var_95, cvar_95) = tail_var(&sorted, 0.95, portfolio_value);
        let (var_99, cvar_99) = tail_var(&sorted, 0.99, portfolio_value);

        Ok(VarResult {
            var_95,
            var_99,
            cvar_95,
            cvar_99,
            method: VarMethod::Historical,
            sample_size: returns.len(),
            simulation_paths: 0,
            mean_return: mean(returns),
            std_dev: std_dev(returns),
        })
    }

    /// Variance-covariance VaR under a normal assumption.
    pub fn calculate_parametric(
        &self,
        mean_return: f64,
        std_dev: f64,
        portfolio_value: f64,
    ) -> Result<VarResult, VarError> {
        if std_dev < 0.0 {
            return Err(VarError::InvalidInput("negative std dev".to_string()));
        }

        let var_95 = (Z_95 * std_dev - mean_return) * portfolio_value;
        let var_99 = (Z_99 * std_dev - mean_return) * portfolio_value;
        let cvar_95 = (std_dev * phi(Z_95) / 0.05 - mean_return) * portfolio_value;
        let cvar_99 = (std_dev * phi(Z_99) / 0.01 - mean_return) * portfolio_value;

        Ok(VarResult {
            var_95,
            var_99,
            cvar_95,
            cvar_99,
            method: VarMethod::Parametric,
            sample_size: 0,
            simulation_paths: 0,
            mean_return,
            std_dev,
        })
    }

    /// Monte Carlo VaR: normal draws via Box-Muller from a seeded PRNG,
    /// empirical percentile over the simulated P&L distribution.
    pub fn calculate_monte_carlo(
        &self,
        mean_return: f64,
        std_dev: f64,
        portfolio_value: f64,
    ) -> Result<VarResult, VarError> {
        let paths = self.config.monte_carlo_paths;
        if paths < MIN_MONTE_CARLO_PATHS {
            return Err(VarError::InsufficientData {
                needed: MIN_MONTE_CARLO_PATHS,
                got: paths,
            });
        }

        let mut rng = if self.config.seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(self.config.seed)
        };

        let mut simulated: Vec<f64> = (0..paths)
            .map(|_| mean_return + std_dev * box_muller(&mut rng))
            .collect();
        simulated.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let (var_95, cvar_95) = tail_var(&simulated, 0.95, portfolio_value);
        let (var_99, cvar_99) = tail_var(&simulated, 0.99, portfolio_value);

        Ok(VarResult {
            var_95,
            var_99,
            cvar_95,
            cvar_99,
            method: VarMethod::MonteCarlo,
            sample_size: 0,
            simulation_paths: paths,
            mean_return,
            std_dev,
        })
    }

    /// Portfolio VaR from weights, volatilities and pairwise
    /// covariances: sigma_p^2 = sum w_i^2 s_i^2 + 2 sum w_i w_j cov(i,j).
    pub fn calculate_portfolio_var(
        &self,
        positions: &[VarPosition],
        covariances: &[CovarianceEntry],
        portfolio_value: f64,
    ) -> Result<VarResult, VarError> {
        if positions.is_empty() {
            return Err(VarError::InvalidInput("no positions".to_string()));
        }

        let mut variance = 0.0;
        for p in positions {
            variance += p.weight * p.weight * p.volatility * p.volatility;
        }
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                let cov = find_covariance(covariances, &positions[i].symbol, &positions[j].symbol);
                variance += 2.0 * positions[i].weight * positions[j].weight * cov;
            }
        }
        if variance < 0.0 {
            return Err(VarError::InvalidInput(
                "covariances produce negative portfolio variance".to_string(),
            ));
        }

        self.calculate_parametric(0.0, variance.sqrt(), portfolio_value)
    }

    /// Component VaR attribution. Contributions sum to the supplied
    /// portfolio VaR.
    pub fn component_var(
        &self,
        positions: &[VarPosition],
        covariances: &[CovarianceEntry],
        portfolio_var: f64,
    ) -> Result<Vec<RiskContribution>, VarError> {
        if positions.is_empty() {
            return Err(VarError::InvalidInput("no positions".to_string()));
        }

        let mut variance = 0.0;
        for p in positions {
            variance += p.weight * p.weight * p.volatility * p.volatility;
        }
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                let cov = find_covariance(covariances, &positions[i].symbol, &positions[j].symbol);
                variance += 2.0 * positions[i].weight * positions[j].weight * cov;
            }
        }
        let sigma_p = variance.sqrt();
        if sigma_p <= 0.0 {
            return Err(VarError::InvalidInput("zero portfolio volatility".to_string()));
        }

        let mut contributions = Vec::with_capacity(positions.len());
        for (i, position) in positions.iter().enumerate() {
            // sum_j w_j cov(i, j), self-term implicit as sigma_i^2
            let mut cov_sum = position.weight * position.volatility * position.volatility;
            for (j, other) in positions.iter().enumerate() {
                if i == j {
                    continue;
                }
                cov_sum +=
                    other.weight * find_covariance(covariances, &position.symbol, &other.symbol);
            }

            let marginal_var = cov_sum / sigma_p;
            let component_var = position.weight * marginal_var / sigma_p * portfolio_var;
            let pct_contribution = if portfolio_var.abs() > f64::EPSILON {
                component_var / portfolio_var * 100.0
            } else {
                0.0
            };
            contributions.push(RiskContribution {
                symbol: position.symbol.clone(),
                marginal_var,
                component_var,
                pct_contribution,
            });
        }
        Ok(contributions)
    }
}

/// Square-root-of-time scaling from 1-day to T-day VaR.
pub fn scale_var_to_holding_period(var_1day: f64, holding_days: u32) -> f64 {
    var_1day * (holding_days as f64).sqrt()
}

/// z-score for a confidence level (exact at 95/99, common table values
/// otherwise).
pub fn z_score(confidence: f64) -> f64 {
    match (confidence * 100.0).round() as u32 {
        90 => 1.2816,
        95 => Z_95,
        99 => Z_99,
        _ => Z_95,
    }
}

/// Simple returns from a price series, oldest first.
pub fn prices_to_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Log returns from a price series, oldest first.
pub fn prices_to_log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Standard normal density.
fn phi(z: f64) -> f64 {
    (-z * z / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// (VaR, CVaR) at `confidence` from ascending-sorted returns.
fn tail_var(sorted: &[f64], confidence: f64, portfolio_value: f64) -> (f64, f64) {
    let n = sorted.len();
    let idx = (((1.0 - confidence) * n as f64) as usize).min(n - 1);
    let var = sorted[idx].abs() * portfolio_value;

    let tail = if idx > 0 { &sorted[..idx] } else { &sorted[..1] };
    let cvar = mean(tail).abs() * portfolio_value;
    (var, cvar)
}

/// One standard normal draw via the Box-Muller transform.
fn box_muller<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn find_covariance(covariances: &[CovarianceEntry], a: &str, b: &str) -> f64 {
    covariances
        .iter()
        .find(|c| {
            (c.symbol_a == a && c.symbol_b == b) || (c.symbol_a == b && c.symbol_b == a)
        })
        .map_or(0.0, |c| c.covariance)
}

/// Rolling-window VaR estimator for real-time updates. Keeps running
/// sums so each new observation is O(1).
#[derive(Debug, Clone)]
pub struct IncrementalVarCalculator {
    window_size: usize,
    returns: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl IncrementalVarCalculator {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(2),
            returns: VecDeque::new(),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn add_return(&mut self, value: f64) {
        self.returns.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
        while self.returns.len() > self.window_size {
            if let Some(old) = self.returns.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
    }

    pub fn mean(&self) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        self.sum / self.returns.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let m = self.mean();
        let var = (self.sum_sq - self.sum * m) / (n - 1) as f64;
        var.max(0.0).sqrt()
    }

    pub fn var(&self, portfolio_value: f64, confidence: f64) -> f64 {
        (z_score(confidence) * self.std_dev() - self.mean()) * portfolio_value
    }

    pub fn cvar(&self, portfolio_value: f64, confidence: f64) -> f64 {
        let z = z_score(confidence);
        (self.std_dev() * phi(z) / (1.0 - confidence) - self.mean()) * portfolio_value
    }

    pub fn count(&self) -> usize {
        self.returns.len()
    }

    pub fn is_valid(&self) -> bool {
        self.returns.len() >= MIN_HISTORICAL_SAMPLES
    }

    pub fn reset(&mut self) {
        self.returns.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 100 returns: -0.10, -0.09, ..., then a flat middle
    fn sample_returns() -> Vec<f64> {
        let mut returns = Vec::new();
        for i in 0..100 {
            // Spread from -10% to +9.8% in 0.2% steps
            returns.push(-0.10 + 0.002 * i as f64);
        }
        returns
    }

    #[test]
    fn test_historical_requires_thirty_samples() {
        let calc = VarCalculator::default();
        let few = vec![0.01; 10];
        assert!(calc.calculate_historical(&few, 1000.0).is_err());
    }

    #[test]
    fn test_historical_percentile() {
        let calc = VarCalculator::default();
        let result = calc.calculate_historical(&sample_returns(), 100_000.0).unwrap();
        // 5th percentile of the ladder is -0.09; 1st percentile -0.098
        assert_relative_eq!(result.var_95, 9_000.0, epsilon = 1.0);
        assert_relative_eq!(result.var_99, 9_800.0, epsilon = 1.0);
        // CVaR is the mean of the tail below the percentile
        assert!(result.cvar_95 >= result.var_95);
        assert!(result.cvar_99 >= result.var_99);
    }

    #[test]
    fn test_parametric_z_scores() {
        let calc = VarCalculator::default();
        let result = calc.calculate_parametric(0.0, 0.02, 100_000.0).unwrap();
        assert_relative_eq!(result.var_95, 1.6449 * 0.02 * 100_000.0, epsilon = 1e-6);
        assert_relative_eq!(result.var_99, 2.3263 * 0.02 * 100_000.0, epsilon = 1e-6);
        // Expected shortfall exceeds VaR at the same confidence
        assert!(result.cvar_95 > result.var_95);
        assert!(result.cvar_99 > result.var_99);
    }

    #[test]
    fn test_parametric_mean_offsets_var() {
        let calc = VarCalculator::default();
        let zero_mean = calc.calculate_parametric(0.0, 0.02, 1000.0).unwrap();
        let pos_mean = calc.calculate_parametric(0.01, 0.02, 1000.0).unwrap();
        assert!(pos_mean.var_95 < zero_mean.var_95);
    }

    #[test]
    fn test_monte_carlo_needs_paths() {
        let calc = VarCalculator::new(VarConfig {
            monte_carlo_paths: 100,
            ..Default::default()
        });
        assert!(calc.calculate_monte_carlo(0.0, 0.02, 1000.0).is_err());
    }

    #[test]
    fn test_monte_carlo_seeded_reproducible() {
        let config = VarConfig {
            monte_carlo_paths: 5_000,
            seed: 42,
            ..Default::default()
        };
        let calc = VarCalculator::new(config);
        let a = calc.calculate_monte_carlo(0.0, 0.02, 100_000.0).unwrap();
        let b = calc.calculate_monte_carlo(0.0, 0.02, 100_000.0).unwrap();
        assert_eq!(a.var_95, b.var_95);
        assert_eq!(a.cvar_99, b.cvar_99);
    }

    #[test]
    fn test_monte_carlo_approximates_parametric() {
        let calc = VarCalculator::new(VarConfig {
            monte_carlo_paths: 50_000,
            seed: 7,
            ..Default::default()
        });
        let mc = calc.calculate_monte_carlo(0.0, 0.02, 100_000.0).unwrap();
        let pm = calc.calculate_parametric(0.0, 0.02, 100_000.0).unwrap();
        // Within a few percent at 50k paths
        assert!((mc.var_95 - pm.var_95).abs() / pm.var_95 < 0.05);
    }

    #[test]
    fn test_holding_period_scaling() {
        assert_relative_eq!(scale_var_to_holding_period(100.0, 1), 100.0);
        assert_relative_eq!(scale_var_to_holding_period(100.0, 4), 200.0);
        assert_relative_eq!(
            scale_var_to_holding_period(100.0, 10),
            100.0 * 10.0_f64.sqrt()
        );
    }

    #[test]
    fn test_portfolio_var_two_assets() {
        let calc = VarCalculator::default();
        let positions = vec![
            VarPosition {
                symbol: "BTC".into(),
                weight: 0.6,
                value: 60_000.0,
                volatility: 0.04,
            },
            VarPosition {
                symbol: "ETH".into(),
                weight: 0.4,
                value: 40_000.0,
                volatility: 0.05,
            },
        ];
        let covariances = vec![CovarianceEntry {
            symbol_a: "BTC".into(),
            symbol_b: "ETH".into(),
            covariance: 0.0012,
        }];

        let result = calc
            .calculate_portfolio_var(&positions, &covariances, 100_000.0)
            .unwrap();

        let expected_variance: f64 = 0.36 * 0.0016 + 0.16 * 0.0025 + 2.0 * 0.6 * 0.4 * 0.0012;
        let expected_var = Z_95 * expected_variance.sqrt() * 100_000.0;
        assert_relative_eq!(result.var_95, expected_var, epsilon = 1e-6);
    }

    #[test]
    fn test_component_var_sums_to_total() {
        let calc = VarCalculator::default();
        let positions = vec![
            VarPosition {
                symbol: "BTC".into(),
                weight: 0.6,
                value: 60_000.0,
                volatility: 0.04,
            },
            VarPosition {
                symbol: "ETH".into(),
                weight: 0.4,
                value: 40_000.0,
                volatility: 0.05,
            },
        ];
        let covariances = vec![CovarianceEntry {
            symbol_a: "BTC".into(),
            symbol_b: "ETH".into(),
            covariance: 0.0012,
        }];

        let portfolio = calc
            .calculate_portfolio_var(&positions, &covariances, 100_000.0)
            .unwrap();
        let contributions = calc
            .component_var(&positions, &covariances, portfolio.var_95)
            .unwrap();

        let total: f64 = contributions.iter().map(|c| c.component_var).sum();
        assert_relative_eq!(total, portfolio.var_95, epsilon = 1e-6);
        let pct_total: f64 = contributions.iter().map(|c| c.pct_contribution).sum();
        assert_relative_eq!(pct_total, 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_returns_from_prices() {
        let prices = vec![100.0, 110.0, 99.0];
        let returns = prices_to_returns(&prices);
        assert_eq!(returns.len(), 2);
        assert_relative_eq!(returns[0], 0.10);
        assert_relative_eq!(returns[1], -0.10);

        let log_returns = prices_to_log_returns(&prices);
        assert_relative_eq!(log_returns[0], (1.1_f64).ln());
    }

    #[test]
    fn test_incremental_window() {
        let mut calc = IncrementalVarCalculator::new(3);
        for v in [0.01, 0.02, 0.03, 0.04] {
            calc.add_return(v);
        }
        assert_eq!(calc.count(), 3);
        // Window holds [0.02, 0.03, 0.04]
        assert_relative_eq!(calc.mean(), 0.03, epsilon = 1e-12);
        assert!(!calc.is_valid());

        let full = std_dev(&[0.02, 0.03, 0.04]);
        assert_relative_eq!(calc.std_dev(), full, epsilon = 1e-9);

        calc.reset();
        assert_eq!(calc.count(), 0);
    }

    #[test]
    fn test_incremental_var_positive_for_losses() {
        let mut calc = IncrementalVarCalculator::new(252);
        for i in 0..60 {
            calc.add_return(if i % 2 == 0 { 0.01 } else { -0.012 });
        }
        assert!(calc.is_valid());
        assert!(calc.var(100_000.0, 0.95) > 0.0);
        assert!(calc.cvar(100_000.0, 0.95) > calc.var(100_000.0, 0.95));
    }
}
