// crates/common/src/frame.rs
use crate::{Error, MetricSnapshot, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row-oriented table of snapshots with named numeric columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricFrame {
    rows: Vec<MetricSnapshot>,
}

impl MetricFrame {
    pub fn new(rows: Vec<MetricSnapshot>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[MetricSnapshot] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [MetricSnapshot] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<MetricSnapshot> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fail on the first column name no snapshot field answers to.
    pub fn check_columns<S: AsRef<str>>(columns: &[S]) -> Result<()> {
        match columns.iter().find(|c| !MetricSnapshot::is_known_column(c.as_ref())) {
            Some(unknown) => Err(Error::InvalidData(format!(
                "unknown metric column: {}",
                unknown.as_ref()
            ))),
            None => Ok(()),
        }
    }

    /// One value per row, `None` where absent.
    pub fn column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        self.rows.iter().map(|row| row.field(name)).collect()
    }

    /// Present values only.
    pub fn present(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self.column(name)?.into_iter().flatten().collect())
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.rows.iter().map(|r| r.date()).min()?;
        let last = self.rows.iter().map(|r| r.date()).max()?;
        Some((first, last))
    }

    /// Most recent snapshot of every subnet, ordered by subnet id.
    pub fn latest_per_entity(&self) -> MetricFrame {
        let mut latest: BTreeMap<u32, &MetricSnapshot> = BTreeMap::new();
        for row in &self.rows {
            match latest.get(&row.entity_id) {
                Some(existing) if existing.timestamp >= row.timestamp => {}
                _ => {
                    latest.insert(row.entity_id, row);
                }
            }
        }
        MetricFrame::new(latest.into_values().cloned().collect())
    }
}

impl From<Vec<MetricSnapshot>> for MetricFrame {
    fn from(rows: Vec<MetricSnapshot>) -> Self {
        Self::new(rows)
    }
}

impl FromIterator<MetricSnapshot> for MetricFrame {
    fn from_iter<I: IntoIterator<Item = MetricSnapshot>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
