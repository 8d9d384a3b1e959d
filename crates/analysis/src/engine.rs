// crates/analysis/src/engine.rs
use crate::correlation::{self, CorrelationResult, DEFAULT_METRIC_COLUMNS};
use crate::digest::{self, DigestInput};
use crate::insights::{self, FarmingRisk, HotEntity};
use crate::outliers::{self, OUTLIER_METRICS, OutlierRecord};
use common::config::{CorrelationConfig, OutlierConfig, ScoringConfig};
use common::{AnalyticsConfig, MetricFrame, Result};
use features::SummaryStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

const HOT_LIMIT: usize = 5;
const RISK_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub correlations: Vec<CorrelationResult>,
    pub outliers: Vec<OutlierRecord>,
    pub summary: BTreeMap<String, SummaryStats>,
    pub hot: Vec<HotEntity>,
    pub farming_risks: Vec<FarmingRisk>,
    pub digest: String,
}

/// Correlation, outlier and insight passes over one frame.
#[derive(Debug, Clone, Default)]
pub struct AnalysisEngine {
    scoring: ScoringConfig,
    correlation: CorrelationConfig,
    outliers: OutlierConfig,
}

impl AnalysisEngine {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            scoring: config.scoring.clone(),
            correlation: config.correlation.clone(),
            outliers: config.outliers.clone(),
        }
    }

    /// Analyze `frame` over `metric_columns`.
    ///
    /// Derived fields and scores missing from the frame are filled in first.
    /// Correlations use every row; outliers and rankings use the latest
    /// snapshot of each subnet. An unknown column name is the only error.
    pub fn analyze<S: AsRef<str>>(&self, frame: &MetricFrame, metric_columns: &[S]) -> Result<AnalysisReport> {
        let started = Instant::now();
        MetricFrame::check_columns(metric_columns)?;

        let mut frame = frame.clone();
        features::enrich_frame(&mut frame);
        scoring::apply_scores(&mut frame, &self.scoring);

        let correlations = correlation::significant_correlations(&frame, metric_columns, &self.correlation)?;

        let latest = frame.latest_per_entity();
        let outliers = outliers::detect_outliers(&latest, &OUTLIER_METRICS, &self.outliers)?;
        let summary = digest::headline_summary(&latest, self.outliers.summary_min_sample)?;
        let hot = insights::hot_entities(&latest, HOT_LIMIT)?;
        let farming_risks = insights::farming_risks(&latest, RISK_LIMIT)?;

        let digest = digest::compose_digest(&DigestInput {
            frame: &frame,
            summary: &summary,
            correlations: &correlations,
            outliers: &outliers,
            hot: &hot,
            risks: &farming_risks,
        });

        metrics::counter!("analysis_runs_total").increment(1);
        metrics::histogram!("analysis_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            "Analysis: {} rows, {} correlations, {} outliers in {:?}",
            frame.len(),
            correlations.len(),
            outliers.len(),
            started.elapsed()
        );

        Ok(AnalysisReport {
            correlations,
            outliers,
            summary,
            hot,
            farming_risks,
            digest,
        })
    }

    pub fn analyze_default(&self, frame: &MetricFrame) -> Result<AnalysisReport> {
        self.analyze(frame, DEFAULT_METRIC_COLUMNS)
    }
}
