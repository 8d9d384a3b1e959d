// crates/analysis/src/correlation.rs
use common::config::CorrelationConfig;
use common::{Error, MetricFrame, Result};
use features::PearsonTest;
use features::stats;
use itertools::Itertools;
use ndarray::Array2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::{debug, trace};

/// Columns screened when the caller does not name any.
pub const DEFAULT_METRIC_COLUMNS: &[&str] = &[
    "tao_score",
    "stake_quality",
    "emission_roi",
    "trust_score",
    "market_cap_tao",
    "fdv_tao",
    "price_tao",
    "price_1d_change",
    "price_7d_change",
    "price_30d_change",
    "flow_24h",
    "buy_volume_tao_1d",
    "sell_volume_tao_1d",
    "total_volume_tao_1d",
    "buy_sell_ratio",
    "active_validators",
    "validator_util_pct",
    "total_stake_tao",
    "max_validators",
    "stake_hhi",
    "stake_quality_rank_pct",
    "reserve_momentum",
    "tao_in",
    "alpha_circ",
    "root_prop",
    "emission_pct",
    "consensus_alignment",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

impl Strength {
    pub fn from_r(r: f64) -> Self {
        let abs = r.abs();
        if abs >= 0.7 {
            Strength::Strong
        } else if abs >= 0.5 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }
}

/// A column pair that passed the significance filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    #[serde(rename = "metric1")]
    pub metric_a: String,
    #[serde(rename = "metric2")]
    pub metric_b: String,
    pub r: f64,
    #[serde(rename = "p")]
    pub p_value: f64,
    #[serde(rename = "n")]
    pub sample_size: usize,
}

impl CorrelationResult {
    pub fn strength(&self) -> Strength {
        Strength::from_r(self.r)
    }

    pub fn direction(&self) -> &'static str {
        if self.r >= 0.0 { "positive" } else { "negative" }
    }
}

fn extract_columns<S: AsRef<str>>(frame: &MetricFrame, columns: &[S]) -> Result<Vec<(String, Vec<Option<f64>>)>> {
    MetricFrame::check_columns(columns)?;
    columns
        .iter()
        .map(|c| c.as_ref())
        .unique()
        .map(|name| Ok((name.to_string(), frame.column(name)?)))
        .collect()
}

/// Pearson test over the rows where both columns are present.
///
/// Fewer than `min_pairs` such rows is an `InsufficientSample` error; a
/// constant column gives `Ok(None)`.
pub fn pair_test(a: &[Option<f64>], b: &[Option<f64>], min_pairs: usize) -> Result<Option<PearsonTest>> {
    let (x, y) = stats::complete_pairs(a, b);
    if x.len() < min_pairs {
        return Err(Error::InsufficientSample {
            statistic: "pearson".to_string(),
            required: min_pairs,
            actual: x.len(),
        });
    }
    Ok(stats::pearson_test(&x, &y))
}

/// Every unordered column pair with `|r| >= min_abs_r` and `p < max_p_value`
/// over its complete rows, strongest first.
///
/// Pairs with fewer than `min_pairs` complete rows are not tested. An unknown
/// column name is an error.
pub fn significant_correlations<S: AsRef<str>>(
    frame: &MetricFrame,
    columns: &[S],
    config: &CorrelationConfig,
) -> Result<Vec<CorrelationResult>> {
    let extracted = extract_columns(frame, columns)?;

    let mut tested = 0u64;
    let mut results: Vec<CorrelationResult> = extracted
        .iter()
        .tuple_combinations()
        .filter_map(|((name_a, a), (name_b, b))| {
            let test = match pair_test(a, b, config.min_pairs) {
                Ok(test) => {
                    tested += 1;
                    test?
                }
                Err(e) => {
                    trace!("{} / {}: {}", name_a, name_b, e);
                    return None;
                }
            };
            (test.r.abs() >= config.min_abs_r && test.p_value < config.max_p_value).then(|| CorrelationResult {
                metric_a: name_a.clone(),
                metric_b: name_b.clone(),
                r: test.r,
                p_value: test.p_value,
                sample_size: test.n,
            })
        })
        .collect();

    results.sort_by_key(|c| Reverse(OrderedFloat(c.r.abs())));
    let significant = results.len();
    results.truncate(config.max_results);

    metrics::counter!("analysis_correlation_pairs_tested").increment(tested);
    metrics::counter!("analysis_correlation_pairs_kept").increment(results.len() as u64);
    debug!(
        "Correlations: {} columns, {} pairs tested, {} significant",
        extracted.len(),
        tested,
        significant
    );
    Ok(results)
}

/// Pairwise-complete Pearson matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl CorrelationMatrix {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Entries are NaN where the pair had too few complete rows or no spread.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        let r = self.values[[i, j]];
        r.is_finite().then_some(r)
    }
}

pub fn correlation_matrix<S: AsRef<str>>(
    frame: &MetricFrame,
    columns: &[S],
    min_pairs: usize,
) -> Result<CorrelationMatrix> {
    let extracted = extract_columns(frame, columns)?;
    let n = extracted.len();
    let mut values = Array2::from_elem((n, n), f64::NAN);

    for i in 0..n {
        for j in i..n {
            let (x, y) = stats::complete_pairs(&extracted[i].1, &extracted[j].1);
            if x.len() < min_pairs {
                continue;
            }
            let r = if i == j {
                match stats::sample_std(&x) {
                    Some(std) if std > 0.0 => 1.0,
                    _ => continue,
                }
            } else {
                match stats::pearson_r(&x, &y) {
                    Some(r) => r,
                    None => continue,
                }
            };
            values[[i, j]] = r;
            values[[j, i]] = r;
        }
    }

    Ok(CorrelationMatrix {
        columns: extracted.into_iter().map(|(name, _)| name).collect(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::MetricSnapshot;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy_frame(n: u32) -> MetricFrame {
        seeded_frame(n, 7)
    }

    fn seeded_frame(n: u32, seed: u64) -> MetricFrame {
        let mut rng = StdRng::seed_from_u64(seed);
        let ts = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let price = 0.01 + i as f64 * 0.002;
                MetricSnapshot {
                    price_tao: Some(price),
                    market_cap_tao: Some(price * 2_000_000.0 + 500.0),
                    total_stake_tao: Some(rng.gen_range(1_000.0..50_000.0)),
                    flow_24h: Some(rng.gen_range(-100.0..100.0)),
                    ..MetricSnapshot::new(i, ts)
                }
            })
            .collect()
    }

    #[test]
    fn test_perfect_pair_kept_noise_dropped() {
        let columns = ["price_tao", "market_cap_tao", "total_stake_tao", "flow_24h"];
        for seed in [7, 19, 42] {
            let frame = seeded_frame(50, seed);
            let found = significant_correlations(&frame, &columns, &CorrelationConfig::default()).unwrap();

            let perfect = found
                .iter()
                .find(|c| c.metric_a == "price_tao" && c.metric_b == "market_cap_tao")
                .expect("perfect pair missing");
            assert!((perfect.r - 1.0).abs() < 1e-9);
            assert!(perfect.p_value < 1e-6);
            assert_eq!(perfect.sample_size, 50);
            assert_eq!(perfect.strength(), Strength::Strong);

            for c in &found {
                let noise = ["total_stake_tao", "flow_24h"];
                if noise.contains(&c.metric_a.as_str()) || noise.contains(&c.metric_b.as_str()) {
                    assert!(c.p_value >= 0.05, "seed {} kept noise pair: {:?}", seed, c);
                }
            }
        }
    }

    #[test]
    fn test_small_frame_is_empty() {
        let frame = noisy_frame(3);
        let found = significant_correlations(&frame, &["price_tao", "market_cap_tao"], &CorrelationConfig::default())
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_unknown_column() {
        let frame = noisy_frame(20);
        let result = significant_correlations(&frame, &["price_tao", "moon_phase"], &CorrelationConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_max_results_and_order() {
        let frame = noisy_frame(50);
        let config = CorrelationConfig {
            min_abs_r: 0.0,
            max_p_value: 1.1,
            max_results: 2,
            ..CorrelationConfig::default()
        };
        let columns = ["price_tao", "market_cap_tao", "total_stake_tao", "flow_24h"];
        let found = significant_correlations(&frame, &columns, &config).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].r.abs() >= found[1].r.abs());
    }

    #[test]
    fn test_matrix() {
        let mut frame = noisy_frame(12);
        frame.rows_mut()[0].flow_24h = None;
        let matrix = correlation_matrix(&frame, &["price_tao", "market_cap_tao", "flow_24h", "emission_roi"], 10).unwrap();

        assert_eq!(matrix.values().dim(), (4, 4));
        assert_eq!(matrix.get("price_tao", "price_tao"), Some(1.0));
        let r = matrix.get("price_tao", "market_cap_tao").unwrap();
        assert!((r - 1.0).abs() < 1e-9);
        assert_eq!(matrix.get("flow_24h", "price_tao"), matrix.get("price_tao", "flow_24h"));
        assert!(matrix.get("flow_24h", "price_tao").is_some());
        // never observed
        assert_eq!(matrix.get("emission_roi", "price_tao"), None);
        assert_eq!(matrix.get("emission_roi", "emission_roi"), None);
    }

    #[test]
    fn test_pair_test_sample_floor() {
        let a: Vec<Option<f64>> = (0..12).map(|i| Some(i as f64)).collect();
        let mut b = a.clone();
        b[0] = None;
        b[1] = None;
        b[2] = None;

        let short = pair_test(&a, &b, 10);
        assert!(matches!(short, Err(Error::InsufficientSample { required: 10, actual: 9, .. })));
        let test = pair_test(&a, &b, 9).unwrap().unwrap();
        assert_eq!(test.n, 9);
        assert_eq!(pair_test(&a, &[Some(1.0); 12], 10).unwrap(), None);
    }

    #[test]
    fn test_strength_labels() {
        assert_eq!(Strength::from_r(-0.75), Strength::Strong);
        assert_eq!(Strength::from_r(0.5), Strength::Moderate);
        assert_eq!(Strength::from_r(0.49), Strength::Weak);
    }
}
