// crates/analysis/src/outliers.rs
use common::config::OutlierConfig;
use common::{MetricFrame, Result};
use features::stats::{self, MAD_SCALE};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::debug;

/// Metrics screened for outliers.
pub const OUTLIER_METRICS: [&str; 4] = ["tao_score", "stake_quality", "market_cap_tao", "flow_turnover"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierRecord {
    #[serde(rename = "entity")]
    pub entity_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub metric: String,
    pub value: f64,
    #[serde(rename = "z")]
    pub robust_z: f64,
    pub reason: String,
}

/// `0.6745 * (x - median) / MAD`, capped at `±cap`.
///
/// `None` for an empty column or one whose MAD is zero.
pub fn robust_z_scores(values: &[f64], cap: f64) -> Option<Vec<f64>> {
    let median = stats::median(values)?;
    let mad = stats::mad(values)?;
    if mad <= 0.0 || !mad.is_finite() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|x| (MAD_SCALE * (x - median) / mad).clamp(-cap, cap))
            .collect(),
    )
}

pub fn outlier_reason(metric: &str, z: f64) -> &'static str {
    let high = z > 0.0;
    match (metric, high) {
        ("tao_score", true) => "Exceptional performance across all metrics",
        ("tao_score", false) => "Underperforming in key network metrics",
        ("stake_quality", true) => "Excellent stake distribution quality",
        ("stake_quality", false) => "Concentrated stake distribution",
        ("market_cap_tao", true) => "High market valuation",
        ("market_cap_tao", false) => "Low market valuation",
        ("flow_turnover", true) => "High token turnover rate",
        ("flow_turnover", false) => "Low token turnover rate",
        _ => "Statistical outlier",
    }
}

/// Rows whose robust z-score exceeds the threshold, most extreme first.
///
/// Metrics with fewer than `min_sample` present values or zero MAD are
/// skipped.
pub fn detect_outliers<S: AsRef<str>>(
    frame: &MetricFrame,
    columns: &[S],
    config: &OutlierConfig,
) -> Result<Vec<OutlierRecord>> {
    MetricFrame::check_columns(columns)?;

    let mut records = Vec::new();
    for metric in columns.iter().map(|m| m.as_ref()) {
        let column = frame.column(metric)?;
        let points: Vec<_> = frame
            .rows()
            .iter()
            .zip(column)
            .filter_map(|(row, value)| Some((row, value?)))
            .collect();

        if points.len() < config.min_sample {
            debug!("Outliers: {} skipped, {} values", metric, points.len());
            continue;
        }
        let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
        let Some(z_scores) = robust_z_scores(&values, config.z_cap) else {
            debug!("Outliers: {} skipped, zero MAD", metric);
            continue;
        };

        for ((row, value), z) in points.iter().zip(z_scores) {
            if z.abs() > config.threshold {
                records.push(OutlierRecord {
                    entity_id: row.entity_id,
                    name: row.name.clone(),
                    metric: metric.to_string(),
                    value: *value,
                    robust_z: z,
                    reason: outlier_reason(metric, z).to_string(),
                });
            }
        }
    }

    records.sort_by_key(|r| Reverse(OrderedFloat(r.robust_z.abs())));
    records.truncate(config.max_results);
    metrics::counter!("analysis_outliers_flagged").increment(records.len() as u64);
    Ok(records)
}
