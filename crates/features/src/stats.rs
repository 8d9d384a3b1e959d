// crates/features/src/stats.rs
//! Sample statistics over present values.
//!
//! Every function takes already-filtered `f64` slices and answers `None`
//! when the sample cannot support the statistic.

use ndarray::{Array2, ArrayView1, Axis, stack};
use ndarray_stats::{CorrelationExt, SummaryStatisticsExt};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// MAD to standard-deviation consistency constant for normal data.
pub const MAD_SCALE: f64 = 0.6745;

pub fn mean(values: &[f64]) -> Option<f64> {
    ArrayView1::from(values).mean()
}

/// Sample standard deviation (ddof = 1).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(ArrayView1::from(values).std(1.0))
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Quantile of an ascending-sorted slice, linear interpolation between order statistics.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    quantile_sorted(&sorted(values), q)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Median absolute deviation from the median.
pub fn mad(values: &[f64]) -> Option<f64> {
    let med = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() || weights.iter().sum::<f64>() <= 0.0 {
        return None;
    }
    ArrayView1::from(values)
        .weighted_mean(&ArrayView1::from(weights))
        .ok()
}

/// Population (ddof = 0) weighted standard deviation.
pub fn weighted_std(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() || weights.iter().sum::<f64>() <= 0.0 {
        return None;
    }
    ArrayView1::from(values)
        .weighted_var(&ArrayView1::from(weights), 0.0)
        .ok()
        .map(|var| var.max(0.0).sqrt())
}

/// Keep only rows where both sides are present.
pub fn complete_pairs(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip()
}

/// Pearson correlation coefficient; `None` for fewer than 3 points or a constant side.
pub fn pearson_r(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }
    let spread = |v: &[f64]| {
        let first = v[0];
        v.iter().any(|value| (value - first).abs() > f64::EPSILON * first.abs().max(1.0))
    };
    if !spread(x) || !spread(y) {
        return None;
    }

    let data: Array2<f64> = stack(Axis(0), &[ArrayView1::from(x), ArrayView1::from(y)]).ok()?;
    let matrix = data.pearson_correlation().ok()?;
    let r = matrix[[0, 1]];
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Pearson result with its two-sided significance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PearsonTest {
    pub r: f64,
    pub p_value: f64,
    pub n: usize,
}

pub fn pearson_test(x: &[f64], y: &[f64]) -> Option<PearsonTest> {
    let r = pearson_r(x, y)?;
    let n = x.len();
    Some(PearsonTest {
        r,
        p_value: correlation_p_value(r, n),
        n,
    })
}

/// Two-sided p-value of H0: rho = 0, via Student's t with n - 2 degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let r2 = r * r;
    if r2 >= 1.0 {
        return 0.0;
    }
    let t = (r2 * df / (1.0 - r2)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Distribution summary of one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Summarize a column, or `None` below `min_sample` values.
pub fn summarize(values: &[f64], min_sample: usize) -> Option<SummaryStats> {
    if values.len() < min_sample.max(2) {
        return None;
    }
    let sorted = sorted(values);
    Some(SummaryStats {
        count: values.len(),
        mean: mean(values)?,
        median: quantile_sorted(&sorted, 0.5)?,
        std: sample_std(values)?,
        min: *sorted.first()?,
        max: *sorted.last()?,
    })
}
