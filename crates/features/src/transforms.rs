// crates/features/src/transforms.rs
use crate::stats;

/// Default z-score clip band.
pub const Z_LOWER: f64 = -3.0;
pub const Z_UPPER: f64 = 3.0;

/// Fewest present values a column needs before it is winsorized.
pub const WINSORIZE_MIN_SAMPLE: usize = 8;

/// Square-root compression for heavy-tailed magnitudes.
pub fn sqrt_compress(x: Option<f64>) -> f64 {
    match x {
        Some(v) if v > 0.0 && v.is_finite() => v.abs().sqrt(),
        _ => 0.0,
    }
}

/// Clip `x` to the 0..=100 score range.
pub fn clamp_pct(x: f64) -> f64 {
    x.clamp(0.0, 100.0)
}

/// `sqrt(x)` as a percentage of `sqrt_cap`, capped at 100.
pub fn sqrt_scaled(x: Option<f64>, sqrt_cap: f64) -> f64 {
    if sqrt_cap <= 0.0 {
        return 0.0;
    }
    (sqrt_compress(x) / sqrt_cap * 100.0).min(100.0)
}

/// Z-score clipped to [-3, 3] and mapped onto 0..=100.
pub fn clipped_zscore(x: Option<f64>, mean: f64, std: f64) -> f64 {
    clipped_zscore_within(x, mean, std, Z_LOWER, Z_UPPER)
}

/// Z-score clipped to `[lo, hi]` and mapped linearly onto 0..=100.
///
/// Absent input maps to 0; a non-positive `std` maps to the band midpoint.
pub fn clipped_zscore_within(x: Option<f64>, mean: f64, std: f64, lo: f64, hi: f64) -> f64 {
    let Some(x) = x.filter(|v| v.is_finite()) else {
        return 0.0;
    };
    if hi <= lo {
        return 0.0;
    }
    let z = if std > 0.0 { (x - mean) / std } else { 0.0 };
    (z.clamp(lo, hi) - lo) / (hi - lo) * 100.0
}

/// Percentile position of `value` within `population`, rounded half to even.
///
/// Ties resolve to the first matching index of the ascending sort, i.e. the
/// count of strictly smaller members. A value that is not a member of the
/// population has no rank.
pub fn percentile_rank(value: Option<f64>, population: &[f64]) -> Option<u8> {
    let value = value.filter(|v| v.is_finite())?;
    if !population.contains(&value) {
        return None;
    }
    let below = population.iter().filter(|p| **p < value).count();
    let pct = (below as f64 / population.len() as f64 * 100.0).round_ties_even();
    Some(pct.clamp(0.0, 100.0) as u8)
}

/// Clip a column in place at its own `low_pct` / `high_pct` quantiles.
///
/// Columns with fewer than eight present values are left untouched.
/// Returns whether clipping was applied.
pub fn winsorize(values: &mut [Option<f64>], low_pct: f64, high_pct: f64) -> bool {
    let present: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if present.len() < WINSORIZE_MIN_SAMPLE {
        return false;
    }
    let sorted = stats::sorted(&present);
    let (Some(lo), Some(hi)) = (
        stats::quantile_sorted(&sorted, low_pct),
        stats::quantile_sorted(&sorted, high_pct),
    ) else {
        return false;
    };

    for v in values.iter_mut().flatten() {
        *v = v.clamp(lo, hi);
    }
    true
}

/// Winsorize at the 1st / 99th percentiles.
pub fn winsorize_default(values: &mut [Option<f64>]) -> bool {
    winsorize(values, 0.01, 0.99)
}

/// Standardize a column after winsorizing; absent stays absent.
///
/// Columns too small to winsorize, or with zero spread, come back as all zero
/// where present.
pub fn winsorized_zscores(column: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut values = column.to_vec();
    if !winsorize_default(&mut values) {
        return values.iter().map(|v| v.map(|_| 0.0)).collect();
    }
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let (Some(mean), Some(std)) = (stats::mean(&present), stats::sample_std(&present)) else {
        return values.iter().map(|v| v.map(|_| 0.0)).collect();
    };
    values
        .iter()
        .map(|v| v.map(|x| if std > 0.0 { (x - mean) / std } else { 0.0 }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqrt_compress() {
        assert_eq!(sqrt_compress(None), 0.0);
        assert_eq!(sqrt_compress(Some(-4.0)), 0.0);
        assert_eq!(sqrt_compress(Some(0.0)), 0.0);
        assert_eq!(sqrt_compress(Some(16.0)), 4.0);
        assert_eq!(sqrt_scaled(Some(250_000.0), 1000.0), 50.0);
        assert_eq!(sqrt_scaled(Some(1e12), 1000.0), 100.0);
    }

    #[test]
    fn test_clipped_zscore() {
        assert_eq!(clipped_zscore(None, 0.0, 1.0), 0.0);
        assert_eq!(clipped_zscore(Some(5000.0), 5000.0, 2000.0), 50.0);
        assert_eq!(clipped_zscore(Some(11000.0), 5000.0, 2000.0), 100.0);
        assert_eq!(clipped_zscore(Some(-1e9), 5000.0, 2000.0), 0.0);
        assert_eq!(clipped_zscore(Some(7.0), 5.0, 0.0), 50.0);
        // z = 1.5 -> (1.5 + 3) / 6
        assert_eq!(clipped_zscore(Some(3.0), 0.0, 2.0), 75.0);
    }

    #[test]
    fn test_percentile_rank() {
        let population = [10.0, 20.0, 20.0, 30.0];
        assert_eq!(percentile_rank(Some(10.0), &population), Some(0));
        assert_eq!(percentile_rank(Some(20.0), &population), Some(25));
        assert_eq!(percentile_rank(Some(30.0), &population), Some(75));
        assert_eq!(percentile_rank(None, &population), None);
        assert_eq!(percentile_rank(Some(1.0), &[]), None);
        assert_eq!(percentile_rank(Some(25.0), &population), None);

        // 1 of 8 is 12.5, which rounds to even
        let eight: Vec<f64> = (1..=8).map(f64::from).collect();
        assert_eq!(percentile_rank(Some(2.0), &eight), Some(12));
        // 3 of 8 is 37.5
        assert_eq!(percentile_rank(Some(4.0), &eight), Some(38));
    }

    #[test]
    fn test_winsorize() {
        let mut values: Vec<Option<f64>> = (1..=100).map(|i| Some(i as f64)).collect();
        values.push(None);
        values[99] = Some(10_000.0);

        assert!(winsorize_default(&mut values));
        let max = values.iter().flatten().fold(f64::MIN, |a, b| a.max(*b));
        assert!(max < 10_000.0);
        assert_eq!(values[100], None);
        assert!(values[0].unwrap() > 1.0);

        let mut short = vec![Some(1.0), Some(1000.0), None];
        assert!(!winsorize_default(&mut short));
        assert_eq!(short[1], Some(1000.0));
    }

    #[test]
    fn test_winsorized_zscores() {
        let column: Vec<Option<f64>> = (0..10).map(|i| Some(i as f64)).chain([None]).collect();
        let z = winsorized_zscores(&column);
        assert_eq!(z[10], None);
        assert!(z[0].unwrap() < 0.0);
        assert!(z[9].unwrap() > 0.0);

        let small = winsorized_zscores(&[Some(1.0), Some(5.0)]);
        assert_eq!(small, vec![Some(0.0), Some(0.0)]);
    }
}
