// crates/backtest/src/optimizer.rs
use crate::loader::{BacktestFrame, DataSummary};
use crate::solver::{self, CappedSimplex, SolverOptions};
use common::config::{BacktestConfig, ScoringConfig};
use common::{AnalyticsConfig, FormulaVersion, Horizon, MetricSnapshot, Result};
use features::stats;
use scoring::{Formula, ScoreCalculator, WeightVector, build_inputs};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Outcome of a weight fit.
///
/// Successful fits carry the iteration count; failed fits carry the original
/// defaults, a zero correlation and the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: WeightVector,
    pub correlation: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OptimizationResult {
    fn failure(defaults: &WeightVector, message: impl Into<String>) -> Self {
        Self {
            weights: defaults.clone(),
            correlation: 0.0,
            success: false,
            iterations: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightComparison {
    pub weights1_correlation: f64,
    pub weights2_correlation: f64,
    pub improvement: f64,
    /// Improvement relative to |weights1_correlation|; 0 when that is 0
    pub improvement_pct: f64,
}

/// Fits formula weights to maximize score/return correlation on one horizon.
///
/// Sub-metric values are built once per row; each candidate weight vector
/// only re-runs the weighted sum.
pub struct WeightOptimizer {
    calculator: ScoreCalculator,
    components: Vec<Vec<Option<f64>>>,
    returns: Vec<Option<f64>>,
    config: BacktestConfig,
}

impl WeightOptimizer {
    pub fn new(
        frame: &BacktestFrame,
        horizon: Horizon,
        version: FormulaVersion,
        scoring_config: &ScoringConfig,
        config: &BacktestConfig,
    ) -> Self {
        let calculator = ScoreCalculator::new(version);
        let components = frame
            .frame()
            .rows()
            .iter()
            .map(|row: &MetricSnapshot| calculator.align(&build_inputs(version, row, scoring_config)))
            .collect();
        Self::from_components(version, components, frame.returns(horizon).to_vec(), config)
    }

    /// Build from pre-scaled sub-metric rows in formula order.
    pub fn from_components(
        version: FormulaVersion,
        components: Vec<Vec<Option<f64>>>,
        returns: Vec<Option<f64>>,
        config: &BacktestConfig,
    ) -> Self {
        Self {
            calculator: ScoreCalculator::new(version),
            components,
            returns,
            config: config.clone(),
        }
    }

    pub fn formula(&self) -> &'static Formula {
        self.calculator.formula()
    }

    /// Rows with both a score and a forward return under `weights`.
    pub fn complete_pairs(&self, weights: &[f64]) -> (Vec<f64>, Vec<f64>) {
        self.components
            .iter()
            .zip(&self.returns)
            .filter_map(|(values, ret)| {
                let score = self.calculator.raw_score(values, weights)?;
                Some((score, (*ret)?))
            })
            .unzip()
    }

    /// Pearson correlation of score with forward return.
    ///
    /// Too few complete pairs or an undefined correlation yield the
    /// configured penalty instead.
    pub fn correlation_of(&self, weights: &[f64]) -> f64 {
        let (scores, returns) = self.complete_pairs(weights);
        if scores.len() < self.config.min_pairs {
            return self.config.penalty_correlation;
        }
        stats::pearson_r(&scores, &returns).unwrap_or(self.config.penalty_correlation)
    }

    pub fn correlation(&self, weights: &WeightVector) -> Result<f64> {
        Ok(self.correlation_of(&weights.to_slice(self.formula())?))
    }

    /// Maximize correlation over `[min_weight, max_weight]` weights summing to one.
    ///
    /// Never fails: infeasible bounds, malformed defaults and solver errors all
    /// come back as an unsuccessful result carrying `defaults`.
    pub fn optimize(&self, defaults: &WeightVector) -> OptimizationResult {
        let started = Instant::now();
        metrics::counter!("backtest_optimizations_total").increment(1);

        let result = self.run_solver(defaults);

        metrics::histogram!("backtest_optimize_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        if result.success {
            tracing::info!(
                "✅ Optimization successful: correlation {:.4} after {} iterations",
                result.correlation,
                result.iterations.unwrap_or(0)
            );
        } else {
            metrics::counter!("backtest_optimization_failures_total").increment(1);
            tracing::warn!(
                "Optimization failed: {}",
                result.message.as_deref().unwrap_or("unknown reason")
            );
        }
        result
    }

    fn run_solver(&self, defaults: &WeightVector) -> OptimizationResult {
        let x0 = match defaults.to_slice(self.formula()) {
            Ok(x0) => x0,
            Err(e) => return OptimizationResult::failure(defaults, e.to_string()),
        };

        let region = CappedSimplex::new(self.config.min_weight, self.config.max_weight);
        if let Err(e) = region.check_feasible(x0.len()) {
            return OptimizationResult::failure(defaults, e.to_string());
        }

        let options = SolverOptions {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
            ..Default::default()
        };

        match solver::minimize(|w| -self.correlation_of(w), &x0, region, options) {
            Ok(outcome) if outcome.converged => OptimizationResult {
                weights: WeightVector::from_slice(self.formula(), &outcome.x),
                correlation: -outcome.fun,
                success: true,
                iterations: Some(outcome.iterations),
                message: None,
            },
            Ok(outcome) => OptimizationResult::failure(defaults, outcome.message),
            Err(e) => OptimizationResult::failure(defaults, e.to_string()),
        }
    }

    pub fn compare(&self, weights1: &WeightVector, weights2: &WeightVector) -> Result<WeightComparison> {
        let corr1 = self.correlation(weights1)?;
        let corr2 = self.correlation(weights2)?;
        let improvement = corr2 - corr1;
        Ok(WeightComparison {
            weights1_correlation: corr1,
            weights2_correlation: corr2,
            improvement,
            improvement_pct: if corr1 != 0.0 { improvement / corr1.abs() * 100.0 } else { 0.0 },
        })
    }
}

/// Fit weights for the configured formula on one horizon of `history`.
pub fn optimize_weights(
    history: &BacktestFrame,
    horizon: Horizon,
    defaults: &WeightVector,
    config: &AnalyticsConfig,
) -> OptimizationResult {
    WeightOptimizer::new(history, horizon, config.backtest.formula, &config.scoring, &config.backtest)
        .optimize(defaults)
}

/// What to do with a re-fitted weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    StrongAdopt,
    Adopt,
    Monitor,
    KeepCurrent,
}

impl Recommendation {
    pub fn from_comparison(comparison: Option<&WeightComparison>, config: &BacktestConfig) -> Self {
        match comparison.map(|c| c.improvement) {
            Some(d) if d > config.strong_adopt_threshold => Recommendation::StrongAdopt,
            Some(d) if d > config.adopt_threshold => Recommendation::Adopt,
            Some(d) if d > config.monitor_threshold => Recommendation::Monitor,
            _ => Recommendation::KeepCurrent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub formula: FormulaVersion,
    pub horizon: Horizon,
    pub summary: DataSummary,
    pub baseline_correlation: f64,
    pub optimization: OptimizationResult,
    pub comparison: Option<WeightComparison>,
    pub recommendation: Recommendation,
}

/// Baseline, fit, comparison and recommendation for one horizon.
pub fn run_backtest(frame: &BacktestFrame, horizon: Horizon, config: &AnalyticsConfig) -> Result<BacktestReport> {
    let version = config.backtest.formula;
    let defaults = Formula::get(version).default_weights();
    let summary = frame.summary(version, &config.scoring);

    let valid = summary.valid_returns.get(&horizon).copied().unwrap_or(0);
    if valid < config.backtest.min_valid_returns {
        tracing::warn!(
            "Only {} valid {} returns (want {}); results may be unreliable",
            valid,
            horizon,
            config.backtest.min_valid_returns
        );
    }

    let optimizer = WeightOptimizer::new(frame, horizon, version, &config.scoring, &config.backtest);
    let baseline_correlation = optimizer.correlation(&defaults)?;
    tracing::info!("{} {} baseline correlation: {:.4}", version, horizon, baseline_correlation);

    let optimization = optimizer.optimize(&defaults);
    let comparison = if optimization.success {
        Some(optimizer.compare(&defaults, &optimization.weights)?)
    } else {
        None
    };
    let recommendation = Recommendation::from_comparison(comparison.as_ref(), &config.backtest);

    Ok(BacktestReport {
        formula: version,
        horizon,
        summary,
        baseline_correlation,
        optimization,
        comparison,
        recommendation,
    })
}

/// Run every horizon in `horizons` over the same snapshots.
pub fn run_backtests(
    snapshots: Vec<MetricSnapshot>,
    horizons: &[Horizon],
    config: &AnalyticsConfig,
) -> Result<Vec<BacktestReport>> {
    let frame = BacktestFrame::build(snapshots);
    tracing::info!("📊 Backtesting {} snapshots over {} horizons", frame.len(), horizons.len());
    horizons.iter().map(|h| run_backtest(&frame, *h, config)).collect()
}
