// crates/analysis/src/insights.rs
//! Cross-sectional rankings over the latest snapshot of each subnet.
//!
//! Both rankings are weighted sums of winsorized z-scores. An absent value
//! contributes zero. The hot ranking reads turnover through a signed `log1p`
//! and counts missing turnover or validator ratio as zero.

use common::{MetricFrame, Result};
use features::transforms::{WINSORIZE_MIN_SAMPLE, winsorized_zscores};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// `(metric, weight, negate)`
pub type Weighting = (&'static str, f64, bool);

pub const HOT_WEIGHTS: [Weighting; 5] = [
    ("tao_score", 0.30, false),
    ("stake_quality", 0.20, false),
    ("price_7d_change", 0.20, false),
    ("flow_turnover", 0.15, false),
    ("validator_ratio", 0.05, false),
];

/// High ROI and concentration push the risk up; healthy stake, usage,
/// turnover and price action pull it down.
pub const FARMER_WEIGHTS: [Weighting; 6] = [
    ("emission_roi", 0.20, false),
    ("stake_quality", 0.15, true),
    ("validator_util_pct", 0.15, true),
    ("flow_turnover", 0.15, true),
    ("stake_hhi", 0.20, false),
    ("price_30d_change", 0.15, true),
];

pub const FARMER_WEIGHTS_NO_ROI: [Weighting; 5] = [
    ("stake_quality", 0.1875, true),
    ("validator_util_pct", 0.1875, true),
    ("flow_turnover", 0.1875, true),
    ("stake_hhi", 0.25, false),
    ("price_30d_change", 0.1875, true),
];

pub const WATCHLIST_THRESHOLD: f64 = 1.00;
pub const RED_FLAG_THRESHOLD: f64 = 1.30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotEntity {
    pub entity_id: u32,
    pub name: Option<String>,
    pub hot_score: f64,
    pub tao_score: Option<f64>,
    pub price_7d_change: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Watchlist,
    RedFlag,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Option<Self> {
        if score > RED_FLAG_THRESHOLD {
            Some(RiskLevel::RedFlag)
        } else if score > WATCHLIST_THRESHOLD {
            Some(RiskLevel::Watchlist)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmingRisk {
    pub entity_id: u32,
    pub name: Option<String>,
    pub score: f64,
    pub level: RiskLevel,
}

/// Per-row weighted sum of winsorized z-scores.
pub fn weighted_z_scores(frame: &MetricFrame, weights: &[Weighting]) -> Result<Vec<f64>> {
    weighted_sum(frame.len(), weights, |metric| frame.column(metric))
}

fn weighted_sum<F>(len: usize, weights: &[Weighting], mut column: F) -> Result<Vec<f64>>
where
    F: FnMut(&str) -> Result<Vec<Option<f64>>>,
{
    let mut scores = vec![0.0; len];
    for (metric, weight, negate) in weights {
        let sign = if *negate { -1.0 } else { 1.0 };
        let z = winsorized_zscores(&column(metric)?);
        for (score, z) in scores.iter_mut().zip(z) {
            *score += sign * weight * z.unwrap_or(0.0);
        }
    }
    Ok(scores)
}

/// `sign(x) * ln(1 + |x|)`
pub fn signed_log1p(x: f64) -> f64 {
    x.abs().ln_1p().copysign(x)
}

/// Column as the hot ranking sees it.
pub fn hot_column(frame: &MetricFrame, metric: &str) -> Result<Vec<Option<f64>>> {
    let column = frame.column(metric)?;
    Ok(match metric {
        "flow_turnover" => column
            .into_iter()
            .map(|v| Some(signed_log1p(v.unwrap_or(0.0))))
            .collect(),
        "validator_ratio" => column.into_iter().map(|v| Some(v.unwrap_or(0.0))).collect(),
        _ => column,
    })
}

/// Top `top_n` subnets by hot score; empty below the winsorizing sample size.
pub fn hot_entities(frame: &MetricFrame, top_n: usize) -> Result<Vec<HotEntity>> {
    if frame.len() < WINSORIZE_MIN_SAMPLE {
        return Ok(Vec::new());
    }
    let scores = weighted_sum(frame.len(), &HOT_WEIGHTS, |metric| hot_column(frame, metric))?;
    let mut hot: Vec<HotEntity> = frame
        .rows()
        .iter()
        .zip(scores)
        .map(|(row, hot_score)| HotEntity {
            entity_id: row.entity_id,
            name: row.name.clone(),
            hot_score,
            tao_score: row.tao_score,
            price_7d_change: row.price_7d_change,
        })
        .collect();
    hot.sort_by_key(|h| Reverse(OrderedFloat(h.hot_score)));
    hot.truncate(top_n);
    Ok(hot)
}

/// Subnets whose emission-farming score crosses the watchlist threshold,
/// riskiest first.
///
/// The ROI-free weighting applies when no row reports an emission ROI.
pub fn farming_risks(frame: &MetricFrame, top_n: usize) -> Result<Vec<FarmingRisk>> {
    let has_roi = frame.rows().iter().any(|r| r.emission_roi.is_some());
    let scores = if has_roi {
        weighted_z_scores(frame, &FARMER_WEIGHTS)?
    } else {
        weighted_z_scores(frame, &FARMER_WEIGHTS_NO_ROI)?
    };

    let mut risks: Vec<FarmingRisk> = frame
        .rows()
        .iter()
        .zip(scores)
        .filter_map(|(row, score)| {
            Some(FarmingRisk {
                entity_id: row.entity_id,
                name: row.name.clone(),
                score,
                level: RiskLevel::from_score(score)?,
            })
        })
        .collect();
    risks.sort_by_key(|r| Reverse(OrderedFloat(r.score)));
    risks.truncate(top_n);
    Ok(risks)
}
