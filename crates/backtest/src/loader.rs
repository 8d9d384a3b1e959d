// crates/backtest/src/loader.rs
use chrono::{Duration, NaiveDate};
use common::config::ScoringConfig;
use common::{Error, FormulaVersion, Horizon, MetricFrame, MetricSnapshot, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Source of historical snapshots.
pub trait SnapshotStore {
    /// Snapshots whose date falls within `[start, end]`; open ends are unbounded.
    fn load_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Vec<MetricSnapshot>>;
}

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

/// Snapshots held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    snapshots: Vec<MetricSnapshot>,
}

impl InMemoryStore {
    pub fn new(snapshots: Vec<MetricSnapshot>) -> Self {
        Self { snapshots }
    }
}

impl SnapshotStore for InMemoryStore {
    fn load_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Vec<MetricSnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|s| in_range(s.date(), start, end))
            .cloned()
            .collect())
    }
}

/// JSON array of snapshots on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Vec<MetricSnapshot>> {
        let raw = std::fs::read_to_string(&self.path)?;
        let snapshots: Vec<MetricSnapshot> = serde_json::from_str(&raw)?;
        tracing::info!("Read {} snapshots from {}", snapshots.len(), self.path.display());
        Ok(snapshots
            .into_iter()
            .filter(|s| in_range(s.date(), start, end))
            .collect())
    }
}

/// Percentage price change; `None` without both prices or a positive start price.
pub fn forward_return(price: Option<f64>, future_price: Option<f64>) -> Option<f64> {
    match (price, future_price) {
        (Some(p), Some(f)) if p > 0.0 && f.is_finite() => Some((f - p) / p * 100.0),
        _ => None,
    }
}

/// Historical snapshots joined with their forward returns.
#[derive(Debug, Clone)]
pub struct BacktestFrame {
    frame: MetricFrame,
    returns: BTreeMap<Horizon, Vec<Option<f64>>>,
}

impl BacktestFrame {
    /// Sort, enrich and join every snapshot with its forward returns.
    ///
    /// Future prices are looked up in one `(subnet, date)` index built once
    /// per frame.
    pub fn build(mut snapshots: Vec<MetricSnapshot>) -> Self {
        snapshots.sort_by(|a, b| (a.entity_id, a.timestamp).cmp(&(b.entity_id, b.timestamp)));
        let mut frame = MetricFrame::new(snapshots);
        features::enrich_frame(&mut frame);

        let prices: HashMap<(u32, NaiveDate), f64> = frame
            .rows()
            .iter()
            .filter_map(|row| Some(((row.entity_id, row.date()), row.price_tao?)))
            .collect();

        let returns = Horizon::ALL
            .into_iter()
            .map(|horizon| {
                let column: Vec<Option<f64>> = frame
                    .rows()
                    .iter()
                    .map(|row| {
                        let future_date = row.date() + Duration::days(horizon.days());
                        forward_return(row.price_tao, prices.get(&(row.entity_id, future_date)).copied())
                    })
                    .collect();
                tracing::debug!(
                    "{} returns: {} valid data points",
                    horizon,
                    column.iter().flatten().count()
                );
                (horizon, column)
            })
            .collect();

        Self { frame, returns }
    }

    /// Load a date window from `store` and build the joined frame.
    pub fn load(store: &dyn SnapshotStore, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        let snapshots = store.load_range(start, end)?;
        if snapshots.is_empty() {
            return Err(Error::NotFound(format!("no snapshots between {:?} and {:?}", start, end)));
        }
        Ok(Self::build(snapshots))
    }

    pub fn frame(&self) -> &MetricFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn returns(&self, horizon: Horizon) -> &[Option<f64>] {
        self.returns.get(&horizon).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn valid_returns(&self, horizon: Horizon) -> usize {
        self.returns(horizon).iter().flatten().count()
    }

    pub fn summary(&self, version: FormulaVersion, scoring: &ScoringConfig) -> DataSummary {
        let rows = self.frame.rows();
        let (total_records, unique_entities, unique_dates) = common::coverage(rows);
        let valid_scores = rows
            .iter()
            .filter(|row| scoring::score_snapshot(version, row, scoring).is_some())
            .count();

        DataSummary {
            total_records,
            unique_entities,
            unique_dates,
            date_range: self.frame.date_range(),
            valid_scores,
            valid_returns: Horizon::ALL.into_iter().map(|h| (h, self.valid_returns(h))).collect(),
        }
    }
}

/// Coverage of a loaded backtest window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub total_records: usize,
    pub unique_entities: usize,
    pub unique_dates: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub valid_scores: usize,
    pub valid_returns: BTreeMap<Horizon, usize>,
}
