// crates/features/src/derived.rs
use crate::stats;
use crate::transforms::percentile_rank;
use chrono::{Duration, NaiveDate};
use common::{BLOCKS_PER_DAY, Error, MAX_VALIDATOR_SLOTS, MetricFrame, MetricSnapshot, RAO_PER_TAO, Result};
use std::collections::HashMap;

/// Herfindahl-Hirschman index of the stake distribution, 0..=10_000.
pub fn stake_hhi(stakes: &[f64]) -> Option<f64> {
    let total: f64 = stakes.iter().sum();
    if stakes.is_empty() || total <= 0.0 {
        return None;
    }
    Some(stakes.iter().map(|s| (s / total).powi(2)).sum::<f64>() * 10_000.0)
}

/// Decentralization score from the HHI, rounded to one decimal.
pub fn stake_quality(hhi: f64) -> f64 {
    round_to((100.0 - hhi / 100.0).max(0.0), 1)
}

/// Share of stake (percent) held by UIDs within two weighted standard
/// deviations of the stake-weighted consensus mean.
pub fn consensus_alignment(consensus: &[f64], stakes: &[f64]) -> Option<f64> {
    if consensus.is_empty() || consensus.len() != stakes.len() {
        return None;
    }
    let total: f64 = stakes.iter().sum();
    let mean = stats::weighted_mean(consensus, stakes)?;
    let std = stats::weighted_std(consensus, stakes)?;

    // Inclusive bound, unlike a strict `<`: a unanimous network (std = 0)
    // counts as fully aligned rather than 0.
    let aligned: f64 = consensus
        .iter()
        .zip(stakes)
        .filter(|(c, _)| (*c - mean).abs() <= 2.0 * std)
        .map(|(_, s)| s)
        .sum();
    Some(aligned / total * 100.0)
}

/// Stake-weighted mean trust.
pub fn trust_score(trust: &[f64], stakes: &[f64]) -> Option<f64> {
    if trust.len() != stakes.len() {
        return None;
    }
    stats::weighted_mean(trust, stakes)
}

/// Emission over the last day from two cumulative RAO readings.
pub fn daily_emission_tao(prev_rao: f64, now_rao: f64) -> f64 {
    (now_rao - prev_rao) / RAO_PER_TAO
}

/// Daily emission extrapolated from a per-block reading.
pub fn synthetic_daily_emission(per_block_tao: f64) -> f64 {
    per_block_tao * BLOCKS_PER_DAY
}

pub fn emission_roi(daily_emission: f64, total_stake: f64) -> Option<f64> {
    (total_stake > 0.0).then(|| daily_emission / total_stake)
}

/// Day-over-day TAO reserve change relative to market cap.
pub fn reserve_momentum(tao_in_today: f64, tao_in_yesterday: f64, market_cap: f64) -> Option<f64> {
    (market_cap > 0.0).then(|| (tao_in_today - tao_in_yesterday) / market_cap)
}

pub fn flow_velocity(flow_24h: f64, alpha_circ: f64) -> Option<f64> {
    (alpha_circ > 0.0).then(|| flow_24h.abs() / alpha_circ)
}

pub fn flow_turnover(flow_24h: f64, market_cap: f64) -> Option<f64> {
    (market_cap > 0.0).then(|| flow_24h / market_cap)
}

pub fn emission_efficiency(emission_pct: f64, fdv: f64) -> Option<f64> {
    if fdv <= 0.0 {
        return None;
    }
    Some(if emission_pct > 0.0 { emission_pct / fdv } else { 0.0 })
}

pub fn root_prop_delta(now: f64, prev: f64) -> f64 {
    now - prev
}

pub fn buy_sell_ratio(buy: f64, sell: f64) -> f64 {
    round_to(buy / sell.max(1.0), 2)
}

/// Active validators as an integer percentage of slots, capped at 100.
pub fn validator_utilization(active: f64, slots: f64) -> Option<f64> {
    if slots <= 0.0 {
        return None;
    }
    Some((active / slots * 100.0).round().min(100.0))
}

pub fn rank_percentile(value: Option<f64>, category_values: &[f64]) -> Option<f64> {
    percentile_rank(value, category_values).map(f64::from)
}

/// Per-UID network arrays for one subnet at one point in time.
#[derive(Debug, Clone, Default)]
pub struct NetworkSample {
    pub stakes: Vec<f64>,
    pub consensus: Vec<f64>,
    pub trust: Vec<f64>,
    pub active_validators: Option<f64>,
    /// Cumulative emission readings (RAO) a day apart
    pub emission_rao: Option<(f64, f64)>,
    /// Fallback when cumulative readings are missing
    pub emission_per_block_tao: Option<f64>,
}

/// Fill the network-derived fields of `snapshot` from raw arrays.
pub fn derive_network_metrics(snapshot: &mut MetricSnapshot, sample: &NetworkSample) {
    let hhi = stake_hhi(&sample.stakes);
    snapshot.stake_hhi = hhi;
    snapshot.stake_quality = hhi.map(stake_quality);
    snapshot.total_stake_tao = (!sample.stakes.is_empty()).then(|| sample.stakes.iter().sum());
    snapshot.consensus_alignment = consensus_alignment(&sample.consensus, &sample.stakes);
    snapshot.trust_score = trust_score(&sample.trust, &sample.stakes);

    if let Some(active) = sample.active_validators {
        snapshot.active_validators = Some(active);
        snapshot.validator_util_pct = validator_utilization(active, MAX_VALIDATOR_SLOTS);
    }

    let daily = sample
        .emission_rao
        .map(|(prev, now)| daily_emission_tao(prev, now))
        .or_else(|| sample.emission_per_block_tao.map(synthetic_daily_emission));
    snapshot.daily_emission_tao = daily;
    snapshot.emission_roi = match (daily, snapshot.total_stake_tao) {
        (Some(d), Some(stake)) => emission_roi(d, stake),
        _ => None,
    };
}

/// Sanity bounds on a derived snapshot; the first violated rule is reported.
pub fn validate_metrics(snapshot: &MetricSnapshot) -> Result<()> {
    if let Some(price) = snapshot.price_tao {
        if !(price > 0.0 && price < 10.0) {
            return Err(Error::InvalidData(format!(
                "subnet {}: price_tao {} outside (0, 10)",
                snapshot.entity_id, price
            )));
        }
    }
    if let Some(sq) = snapshot.stake_quality {
        if !(sq > 0.0 && sq <= 100.0) {
            return Err(Error::InvalidData(format!(
                "subnet {}: stake_quality {} outside (0, 100]",
                snapshot.entity_id, sq
            )));
        }
    }
    if let Some(roi) = snapshot.emission_roi {
        if roi < 0.0 {
            return Err(Error::InvalidData(format!(
                "subnet {}: negative emission_roi {}",
                snapshot.entity_id, roi
            )));
        }
    }
    if let Some(ca) = snapshot.consensus_alignment {
        if !(0.0..=100.0).contains(&ca) {
            return Err(Error::InvalidData(format!(
                "subnet {}: consensus_alignment {} outside [0, 100]",
                snapshot.entity_id, ca
            )));
        }
    }
    Ok(())
}

/// Fill cross-row derived fields in place.
///
/// Previous-day values come from a single `(subnet, date)` index. Fields that
/// are already present are never overwritten.
pub fn enrich_frame(frame: &mut MetricFrame) {
    let index: HashMap<(u32, NaiveDate), usize> = frame
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| ((row.entity_id, row.date()), i))
        .collect();

    let previous: Vec<Option<(Option<f64>, Option<f64>)>> = frame
        .rows()
        .iter()
        .map(|row| {
            let prev_day = row.date() - Duration::days(1);
            index
                .get(&(row.entity_id, prev_day))
                .map(|&i| (frame.rows()[i].root_prop, frame.rows()[i].tao_in))
        })
        .collect();

    let mut filled = 0usize;
    for (row, prev) in frame.rows_mut().iter_mut().zip(previous) {
        if let Some((prev_root_prop, prev_tao_in)) = prev {
            if row.root_prop_prev.is_none() {
                row.root_prop_prev = prev_root_prop;
            }
            if row.tao_in_yesterday.is_none() {
                row.tao_in_yesterday = prev_tao_in;
            }
        }
        if row.reserve_momentum.is_none() {
            if let (Some(today), Some(yesterday), Some(mcap)) = (row.tao_in, row.tao_in_yesterday, row.market_cap_tao) {
                row.reserve_momentum = reserve_momentum(today, yesterday, mcap);
            }
        }
        if row.buy_sell_ratio.is_none() {
            if let (Some(buy), Some(sell)) = (row.buy_volume_tao_1d, row.sell_volume_tao_1d) {
                row.buy_sell_ratio = Some(buy_sell_ratio(buy, sell));
            }
        }
        if row.validator_util_pct.is_none() {
            if let Some(active) = row.active_validators {
                row.validator_util_pct = validator_utilization(active, MAX_VALIDATOR_SLOTS);
            }
        }
        filled += 1;
    }

    assign_rank_percentiles(frame);
    tracing::debug!("Enriched {} snapshots", filled);
}

/// Rank stake quality within each (date, category) group.
fn assign_rank_percentiles(frame: &mut MetricFrame) {
    let mut groups: HashMap<(NaiveDate, Option<String>), Vec<f64>> = HashMap::new();
    for row in frame.rows() {
        if let Some(sq) = row.stake_quality.filter(|v| v.is_finite()) {
            groups.entry((row.date(), row.category.clone())).or_default().push(sq);
        }
    }

    for row in frame.rows_mut() {
        if row.stake_quality_rank_pct.is_some() {
            continue;
        }
        let key = (row.date(), row.category.clone());
        if let Some(population) = groups.get(&key) {
            row.stake_quality_rank_pct = rank_percentile(row.stake_quality, population);
        }
    }
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (x * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_stake_concentration() {
        assert_eq!(stake_hhi(&[]), None);
        assert_eq!(stake_hhi(&[0.0, 0.0]), None);
        assert_eq!(stake_hhi(&[5.0]), Some(10_000.0));
        // Four equal holders -> 4 * 0.0625 * 10_000
        assert_eq!(stake_hhi(&[1.0, 1.0, 1.0, 1.0]), Some(2_500.0));

        assert_eq!(stake_quality(2_500.0), 75.0);
        assert_eq!(stake_quality(10_000.0), 0.0);
        assert_eq!(stake_quality(1_234.0), 87.7);
    }

    #[test]
    fn test_consensus_alignment_drops_outlier_stake() {
        let mut consensus = vec![0.5; 19];
        consensus.push(0.9);
        let stakes = vec![1.0; 20];

        let aligned = consensus_alignment(&consensus, &stakes).unwrap();
        assert!((aligned - 95.0).abs() < 1e-9);

        assert_eq!(consensus_alignment(&[0.5, 0.5, 0.5], &[1.0, 2.0, 1.0]), Some(100.0));
        assert_eq!(consensus_alignment(&[], &[]), None);
        assert_eq!(consensus_alignment(&[0.5], &[1.0, 2.0]), None);
        assert_eq!(consensus_alignment(&[0.5, 0.6], &[0.0, 0.0]), None);
    }

    #[test]
    fn test_trust_and_ratios() {
        assert!((trust_score(&[0.2, 0.8], &[1.0, 3.0]).unwrap() - 0.65).abs() < 1e-12);
        assert_eq!(buy_sell_ratio(30.0, 0.0), 30.0);
        assert_eq!(buy_sell_ratio(10.0, 3.0), 3.33);
        assert_eq!(validator_utilization(300.0, 256.0), Some(100.0));
        assert_eq!(validator_utilization(64.0, 256.0), Some(25.0));
        assert_eq!(emission_roi(5.0, 0.0), None);
        assert_eq!(reserve_momentum(110.0, 100.0, 0.0), None);
        assert_eq!(daily_emission_tao(1e9, 4e9), 3.0);
        assert_eq!(synthetic_daily_emission(0.5), 3600.0);
        assert_eq!(emission_efficiency(-2.0, 100.0), Some(0.0));
    }

    #[test]
    fn test_derive_network_metrics() {
        let mut snapshot = MetricSnapshot::default();
        let sample = NetworkSample {
            stakes: vec![100.0, 100.0, 100.0, 100.0],
            consensus: vec![0.5, 0.5, 0.5, 0.5],
            trust: vec![0.9, 0.9, 0.9, 0.9],
            active_validators: Some(128.0),
            emission_rao: Some((0.0, 40e9)),
            emission_per_block_tao: None,
        };
        derive_network_metrics(&mut snapshot, &sample);

        assert_eq!(snapshot.stake_hhi, Some(2_500.0));
        assert_eq!(snapshot.stake_quality, Some(75.0));
        assert_eq!(snapshot.consensus_alignment, Some(100.0));
        assert_eq!(snapshot.validator_util_pct, Some(50.0));
        assert_eq!(snapshot.daily_emission_tao, Some(40.0));
        assert_eq!(snapshot.emission_roi, Some(0.1));
        assert!(validate_metrics(&snapshot).is_ok());
    }

    #[test]
    fn test_validate_metrics() {
        let bad_price = MetricSnapshot {
            price_tao: Some(12.0),
            ..Default::default()
        };
        assert!(validate_metrics(&bad_price).is_err());

        let bad_quality = MetricSnapshot {
            stake_quality: Some(0.0),
            ..Default::default()
        };
        assert!(validate_metrics(&bad_quality).is_err());

        assert!(validate_metrics(&MetricSnapshot::default()).is_ok());
    }

    #[test]
    fn test_enrich_frame_uses_previous_day() {
        let day = |d: u32| Utc.with_ymd_and_hms(2025, 5, d, 12, 0, 0).unwrap();
        let mut frame = MetricFrame::new(vec![
            MetricSnapshot {
                root_prop: Some(0.30),
                tao_in: Some(1_000.0),
                stake_quality: Some(60.0),
                ..MetricSnapshot::new(7, day(1))
            },
            MetricSnapshot {
                root_prop: Some(0.25),
                tao_in: Some(1_100.0),
                market_cap_tao: Some(2_000.0),
                active_validators: Some(64.0),
                stake_quality: Some(70.0),
                ..MetricSnapshot::new(7, day(2))
            },
            MetricSnapshot {
                stake_quality: Some(90.0),
                ..MetricSnapshot::new(8, day(2))
            },
        ]);

        enrich_frame(&mut frame);
        let rows = frame.rows();

        assert_eq!(rows[0].root_prop_prev, None);
        assert_eq!(rows[1].root_prop_prev, Some(0.30));
        assert_eq!(rows[1].tao_in_yesterday, Some(1_000.0));
        assert_eq!(rows[1].reserve_momentum, Some(0.05));
        assert_eq!(rows[1].validator_util_pct, Some(25.0));
        assert_eq!(rows[1].stake_quality_rank_pct, Some(0.0));
        assert_eq!(rows[2].stake_quality_rank_pct, Some(50.0));
        assert_eq!(rows[0].stake_quality_rank_pct, Some(0.0));
    }
}
