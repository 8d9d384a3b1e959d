// crates/common/src/config.rs
use crate::{Error, FormulaVersion, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/analytics.toml";

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub scoring: ScoringConfig,
    pub backtest: BacktestConfig,
    pub correlation: CorrelationConfig,
    pub outliers: OutlierConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Healthy annual inflation for the v1.1 inflation factor (percent)
    pub inflation_target_pct: f64,
    /// Points lost per percentage point away from the target
    pub inflation_penalty_per_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            inflation_target_pct: 8.0,
            inflation_penalty_per_pct: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Formula whose weights are fitted
    pub formula: FormulaVersion,
    pub min_weight: f64,
    pub max_weight: f64,
    pub max_iterations: usize,
    /// Complete (score, return) pairs needed before a correlation counts
    pub min_pairs: usize,
    /// Correlation assigned to candidates that cannot be evaluated
    pub penalty_correlation: f64,
    pub tolerance: f64,
    /// Warn when a horizon has fewer valid forward returns than this
    pub min_valid_returns: usize,
    pub strong_adopt_threshold: f64,
    pub adopt_threshold: f64,
    pub monitor_threshold: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            formula: FormulaVersion::V2_1,
            min_weight: 0.01,
            max_weight: 0.50,
            max_iterations: 1000,
            min_pairs: 10,
            penalty_correlation: -0.1,
            tolerance: 1e-8,
            min_valid_returns: 20,
            strong_adopt_threshold: 0.05,
            adopt_threshold: 0.02,
            monitor_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub min_abs_r: f64,
    pub max_p_value: f64,
    pub min_pairs: usize,
    pub max_results: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            min_abs_r: 0.5,
            max_p_value: 0.05,
            min_pairs: 10,
            max_results: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Robust z magnitude above which a value is flagged
    pub threshold: f64,
    pub z_cap: f64,
    pub min_sample: usize,
    pub max_results: usize,
    /// Smallest column for which digest summary statistics are reported
    pub summary_min_sample: usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            z_cap: 8.0,
            min_sample: 8,
            max_results: 15,
            summary_min_sample: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_hours: i64,
    pub daily_limit: u32,
    pub hourly_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            daily_limit: 10,
            hourly_limit: 2,
        }
    }
}

impl AnalyticsConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path.display(), e)))?;

        let mut config = Self::from_toml_str(&config_str)?;
        config.apply_env_overrides();
        config.validate()?;

        tracing::debug!("Loaded analytics config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(target) = env_override::<f64>("TAO_INF_TARGET") {
            self.scoring.inflation_target_pct = target;
        }
        if let Some(limit) = env_override::<u32>("ANALYTICS_DAILY_LIMIT") {
            self.cache.daily_limit = limit;
        }
        if let Some(limit) = env_override::<u32>("ANALYTICS_HOURLY_LIMIT") {
            self.cache.hourly_limit = limit;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bt = &self.backtest;
        if !(bt.min_weight >= 0.0 && bt.min_weight <= bt.max_weight) {
            return Err(Error::Config(format!(
                "weight bounds must satisfy 0 <= min <= max, got [{}, {}]",
                bt.min_weight, bt.max_weight
            )));
        }
        if bt.max_iterations == 0 {
            return Err(Error::Config("backtest.max_iterations must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.correlation.max_p_value) {
            return Err(Error::Config(format!(
                "correlation.max_p_value out of range: {}",
                self.correlation.max_p_value
            )));
        }
        if self.outliers.threshold <= 0.0 || self.outliers.z_cap < self.outliers.threshold {
            return Err(Error::Config(format!(
                "outlier threshold {} must be positive and below cap {}",
                self.outliers.threshold, self.outliers.z_cap
            )));
        }
        if self.cache.ttl_hours <= 0 {
            return Err(Error::Config("cache.ttl_hours must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_override<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
