// crates/common/src/lib.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod config;
pub mod error;
pub mod frame;

pub use config::AnalyticsConfig;
pub use error::{Error, Result};
pub use frame::MetricFrame;

/// Validator slots per subnet.
pub const MAX_VALIDATOR_SLOTS: f64 = 256.0;

/// Blocks produced per day (12s block time).
pub const BLOCKS_PER_DAY: f64 = 7200.0;

/// RAO per TAO.
pub const RAO_PER_TAO: f64 = 1e9;

/// Score formula versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormulaVersion {
    /// Six-factor validator health score
    #[serde(rename = "v1.1")]
    V1_1,
    /// Nine-factor investor score
    #[serde(rename = "v2.1")]
    V2_1,
}

impl FormulaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaVersion::V1_1 => "v1.1",
            FormulaVersion::V2_1 => "v2.1",
        }
    }
}

impl fmt::Display for FormulaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FormulaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1.1" | "1.1" => Ok(FormulaVersion::V1_1),
            "v2.1" | "2.1" => Ok(FormulaVersion::V2_1),
            other => Err(Error::InvalidData(format!("unknown formula version: {}", other))),
        }
    }
}

/// Forward-return horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::OneDay, Horizon::SevenDays, Horizon::ThirtyDays];

    pub fn days(&self) -> i64 {
        match self {
            Horizon::OneDay => 1,
            Horizon::SevenDays => 7,
            Horizon::ThirtyDays => 30,
        }
    }

    pub fn from_days(days: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.days() == days)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days())
    }
}

/// One row of raw and derived metrics for one subnet at one point in time.
///
/// Every numeric field is optional: `None` means the value was not observed,
/// which is distinct from an observed zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSnapshot {
    pub entity_id: u32,
    pub timestamp: DateTime<Utc>,
    pub name: Option<String>,
    pub category: Option<String>,

    // Market
    pub price_tao: Option<f64>,
    pub market_cap_tao: Option<f64>,
    pub fdv_tao: Option<f64>,
    pub total_volume_tao_1d: Option<f64>,
    pub buy_volume_tao_1d: Option<f64>,
    pub sell_volume_tao_1d: Option<f64>,
    pub flow_24h: Option<f64>,
    pub price_1d_change: Option<f64>,
    pub price_7d_change: Option<f64>,
    pub price_30d_change: Option<f64>,
    pub alpha_circ: Option<f64>,
    pub tao_in: Option<f64>,
    pub tao_in_yesterday: Option<f64>,
    pub root_prop: Option<f64>,
    pub root_prop_prev: Option<f64>,
    pub emission_pct: Option<f64>,

    // Network
    pub total_stake_tao: Option<f64>,
    pub active_validators: Option<f64>,
    pub max_validators: Option<f64>,
    pub stake_hhi: Option<f64>,
    pub stake_quality: Option<f64>,
    pub consensus_alignment: Option<f64>,
    pub trust_score: Option<f64>,
    pub daily_emission_tao: Option<f64>,
    pub emission_roi: Option<f64>,
    pub reserve_momentum: Option<f64>,
    pub validator_util_pct: Option<f64>,
    pub buy_sell_ratio: Option<f64>,
    pub stake_quality_rank_pct: Option<f64>,

    // Scores
    pub tao_score: Option<f64>,
    pub tao_score_v21: Option<f64>,
}

/// Columns computed on read from other snapshot fields.
pub const COMPUTED_COLUMNS: &[&str] = &[
    "flow_turnover",
    "flow_velocity",
    "emission_efficiency",
    "root_prop_delta",
    "validator_ratio",
    "sharpe_30d",
];

/// Stored numeric columns, addressable by name.
pub const STORED_COLUMNS: &[&str] = &[
    "price_tao",
    "market_cap_tao",
    "fdv_tao",
    "total_volume_tao_1d",
    "buy_volume_tao_1d",
    "sell_volume_tao_1d",
    "flow_24h",
    "price_1d_change",
    "price_7d_change",
    "price_30d_change",
    "alpha_circ",
    "tao_in",
    "tao_in_yesterday",
    "root_prop",
    "root_prop_prev",
    "emission_pct",
    "total_stake_tao",
    "active_validators",
    "max_validators",
    "stake_hhi",
    "stake_quality",
    "consensus_alignment",
    "trust_score",
    "daily_emission_tao",
    "emission_roi",
    "reserve_momentum",
    "validator_util_pct",
    "buy_sell_ratio",
    "stake_quality_rank_pct",
    "tao_score",
    "tao_score_v21",
];

impl MetricSnapshot {
    pub fn new(entity_id: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            timestamp,
            ..Default::default()
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn is_known_column(column: &str) -> bool {
        STORED_COLUMNS.contains(&column) || COMPUTED_COLUMNS.contains(&column)
    }

    /// Look up a numeric column by name.
    ///
    /// Non-finite stored values read as absent. Unknown names are an error.
    pub fn field(&self, column: &str) -> Result<Option<f64>> {
        let value = match column {
            "price_tao" => self.price_tao,
            "market_cap_tao" => self.market_cap_tao,
            "fdv_tao" => self.fdv_tao,
            "total_volume_tao_1d" => self.total_volume_tao_1d,
            "buy_volume_tao_1d" => self.buy_volume_tao_1d,
            "sell_volume_tao_1d" => self.sell_volume_tao_1d,
            "flow_24h" => self.flow_24h,
            "price_1d_change" => self.price_1d_change,
            "price_7d_change" => self.price_7d_change,
            "price_30d_change" => self.price_30d_change,
            "alpha_circ" => self.alpha_circ,
            "tao_in" => self.tao_in,
            "tao_in_yesterday" => self.tao_in_yesterday,
            "root_prop" => self.root_prop,
            "root_prop_prev" => self.root_prop_prev,
            "emission_pct" => self.emission_pct,
            "total_stake_tao" => self.total_stake_tao,
            "active_validators" => self.active_validators,
            "max_validators" => self.max_validators,
            "stake_hhi" => self.stake_hhi,
            "stake_quality" => self.stake_quality,
            "consensus_alignment" => self.consensus_alignment,
            "trust_score" => self.trust_score,
            "daily_emission_tao" => self.daily_emission_tao,
            "emission_roi" => self.emission_roi,
            "reserve_momentum" => self.reserve_momentum,
            "validator_util_pct" => self.validator_util_pct,
            "buy_sell_ratio" => self.buy_sell_ratio,
            "stake_quality_rank_pct" => self.stake_quality_rank_pct,
            "tao_score" => self.tao_score,
            "tao_score_v21" => self.tao_score_v21,
            "flow_turnover" => self.flow_turnover(),
            "flow_velocity" => self.flow_velocity(),
            "emission_efficiency" => self.emission_efficiency(),
            "root_prop_delta" => self.root_prop_delta(),
            "validator_ratio" => self.validator_ratio(),
            "sharpe_30d" => self.sharpe_30d(),
            other => {
                return Err(Error::InvalidData(format!("unknown metric column: {}", other)));
            }
        };
        Ok(value.filter(|v| v.is_finite()))
    }

    /// Net 24h flow relative to market cap.
    pub fn flow_turnover(&self) -> Option<f64> {
        match (self.flow_24h, self.market_cap_tao) {
            (Some(flow), Some(mcap)) if mcap > 0.0 => Some(flow / mcap),
            _ => None,
        }
    }

    /// Absolute 24h flow relative to circulating alpha.
    pub fn flow_velocity(&self) -> Option<f64> {
        match (self.flow_24h, self.alpha_circ) {
            (Some(flow), Some(circ)) if circ > 0.0 => Some(flow.abs() / circ),
            _ => None,
        }
    }

    /// Emission share per unit of fully diluted value.
    pub fn emission_efficiency(&self) -> Option<f64> {
        match (self.emission_pct, self.fdv_tao) {
            (Some(pct), Some(fdv)) if fdv > 0.0 => Some(if pct > 0.0 { pct / fdv } else { 0.0 }),
            _ => None,
        }
    }

    pub fn root_prop_delta(&self) -> Option<f64> {
        match (self.root_prop, self.root_prop_prev) {
            (Some(now), Some(prev)) => Some(now - prev),
            _ => None,
        }
    }

    pub fn validator_ratio(&self) -> Option<f64> {
        match (self.active_validators, self.max_validators) {
            (Some(active), Some(max)) if max > 0.0 => Some(active / max),
            _ => None,
        }
    }

    /// 30-day return as a fraction, used as a risk-adjusted momentum proxy.
    pub fn sharpe_30d(&self) -> Option<f64> {
        self.price_30d_change.map(|pct| pct / 100.0)
    }
}

/// Count rows, subnets and distinct days in a slice of snapshots.
pub fn coverage(snapshots: &[MetricSnapshot]) -> (usize, usize, usize) {
    let entities: BTreeSet<u32> = snapshots.iter().map(|s| s.entity_id).collect();
    let dates: BTreeSet<NaiveDate> = snapshots.iter().map(|s| s.date()).collect();
    (snapshots.len(), entities.len(), dates.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lookup() {
        let snap = MetricSnapshot {
            flow_24h: Some(-50.0),
            market_cap_tao: Some(1000.0),
            alpha_circ: Some(500.0),
            stake_quality: Some(f64::NAN),
            ..Default::default()
        };

        assert_eq!(snap.field("flow_turnover").unwrap(), Some(-0.05));
        assert_eq!(snap.field("flow_velocity").unwrap(), Some(0.1));
        assert_eq!(snap.field("stake_quality").unwrap(), None);
        assert!(snap.field("no_such_metric").is_err());
    }

    #[test]
    fn test_emission_efficiency_non_positive() {
        let snap = MetricSnapshot {
            emission_pct: Some(-1.0),
            fdv_tao: Some(10.0),
            ..Default::default()
        };
        assert_eq!(snap.emission_efficiency(), Some(0.0));

        let no_fdv = MetricSnapshot {
            emission_pct: Some(1.0),
            fdv_tao: Some(0.0),
            ..Default::default()
        };
        assert_eq!(no_fdv.emission_efficiency(), None);
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("v2.1".parse::<FormulaVersion>().unwrap(), FormulaVersion::V2_1);
        assert!("v3".parse::<FormulaVersion>().is_err());
        assert_eq!(Horizon::from_days(7), Some(Horizon::SevenDays));
        assert_eq!(Horizon::from_days(2), None);
    }

    #[test]
    fn test_snapshot_partial_json() {
        let json = r#"{"entity_id": 3, "timestamp": "2025-01-02T00:00:00Z", "price_tao": 0.02}"#;
        let snap: MetricSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.entity_id, 3);
        assert_eq!(snap.price_tao, Some(0.02));
        assert_eq!(snap.stake_hhi, None);
    }
}
