// crates/scoring/src/inputs.rs
use crate::calculator::{ScoreCalculator, ScoreInputs};
use common::config::ScoringConfig;
use common::{FormulaVersion, MAX_VALIDATOR_SLOTS, MetricFrame, MetricSnapshot};
use features::{clamp_pct, clipped_zscore, sqrt_scaled};

/// Network-wide HHI centre and spread used to standardize concentration.
const HHI_MEAN: f64 = 5000.0;
const HHI_STD: f64 = 2000.0;

/// sqrt caps at which a magnitude input saturates at 100
const MCAP_SQRT_CAP: f64 = 1000.0;
const EFFICIENCY_SQRT_CAP: f64 = 0.1;
const FLOW_VELOCITY_SQRT_CAP: f64 = 0.5;
const VOLUME_SQRT_CAP: f64 = 10_000.0;

const ROOT_PROP_DELTA_STD: f64 = 0.1;
const SHARPE_STD: f64 = 0.2;

fn entry(key: &str, value: Option<f64>) -> (String, Option<f64>) {
    (key.to_string(), value.filter(|v| v.is_finite()))
}

/// Six-factor validator health inputs.
pub fn v11_inputs(snapshot: &MetricSnapshot, config: &ScoringConfig) -> ScoreInputs {
    let inflation = snapshot.emission_pct.map(|pct| {
        clamp_pct(100.0 - (pct - config.inflation_target_pct).abs() * config.inflation_penalty_per_pct)
    });

    [
        entry("stake_quality", snapshot.stake_quality.map(clamp_pct)),
        entry("consensus", snapshot.consensus_alignment.map(clamp_pct)),
        entry("trust", snapshot.trust_score.map(|t| clamp_pct(t * 100.0))),
        entry("validator_util", snapshot.validator_util_pct.map(clamp_pct)),
        entry("inflation", inflation),
        entry("momentum", snapshot.reserve_momentum.map(|m| clamp_pct(m * 100.0))),
    ]
    .into_iter()
    .collect()
}

/// Nine-factor investor inputs.
///
/// Optional inputs stay absent when their raw fields are missing so the
/// calculator can move their weight onto the core inputs.
pub fn v21_inputs(snapshot: &MetricSnapshot) -> ScoreInputs {
    [
        entry("stake_quality", snapshot.stake_quality.map(clamp_pct)),
        entry(
            "active_validators",
            snapshot.active_validators.map(|n| clamp_pct(n / MAX_VALIDATOR_SLOTS * 100.0)),
        ),
        entry("stake_hhi", snapshot.stake_hhi.map(|h| clipped_zscore(Some(h), HHI_MEAN, HHI_STD))),
        entry("market_cap", snapshot.market_cap_tao.map(|m| sqrt_scaled(Some(m), MCAP_SQRT_CAP))),
        entry(
            "emission_efficiency",
            snapshot.emission_efficiency().map(|e| sqrt_scaled(Some(e), EFFICIENCY_SQRT_CAP)),
        ),
        entry(
            "flow_velocity",
            snapshot.flow_velocity().map(|v| sqrt_scaled(Some(v), FLOW_VELOCITY_SQRT_CAP)),
        ),
        entry(
            "root_prop_delta",
            snapshot.root_prop_delta().map(|d| clipped_zscore(Some(d), 0.0, ROOT_PROP_DELTA_STD)),
        ),
        entry("sharpe", snapshot.sharpe_30d().map(|s| clipped_zscore(Some(s), 0.0, SHARPE_STD))),
        entry("volume", snapshot.total_volume_tao_1d.map(|v| sqrt_scaled(Some(v), VOLUME_SQRT_CAP))),
    ]
    .into_iter()
    .collect()
}

pub fn build_inputs(version: FormulaVersion, snapshot: &MetricSnapshot, config: &ScoringConfig) -> ScoreInputs {
    match version {
        FormulaVersion::V1_1 => v11_inputs(snapshot, config),
        FormulaVersion::V2_1 => v21_inputs(snapshot),
    }
}

pub fn score_snapshot(version: FormulaVersion, snapshot: &MetricSnapshot, config: &ScoringConfig) -> Option<f64> {
    ScoreCalculator::new(version).score(&build_inputs(version, snapshot, config))
}

/// Write both score versions onto every row that does not already carry one.
pub fn apply_scores(frame: &mut MetricFrame, config: &ScoringConfig) -> usize {
    let mut scored = 0;
    for row in frame.rows_mut() {
        if row.tao_score.is_none() {
            row.tao_score = score_snapshot(FormulaVersion::V1_1, row, config);
        }
        if row.tao_score_v21.is_none() {
            row.tao_score_v21 = score_snapshot(FormulaVersion::V2_1, row, config);
        }
        if row.tao_score.is_some() || row.tao_score_v21.is_some() {
            scored += 1;
        }
    }
    tracing::debug!("Scored {}/{} snapshots", scored, frame.len());
    scored
}
