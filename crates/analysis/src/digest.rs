// crates/analysis/src/digest.rs
use crate::correlation::CorrelationResult;
use crate::insights::{FarmingRisk, HotEntity};
use crate::outliers::OutlierRecord;
use common::{MetricFrame, Result};
use features::stats::{self, SummaryStats};
use std::collections::{BTreeMap, BTreeSet};

/// Metrics summarized in the digest.
pub const SUMMARY_METRICS: [&str; 6] = [
    "tao_score",
    "stake_quality",
    "market_cap_tao",
    "flow_turnover",
    "price_7d_change",
    "emission_roi",
];

const TOP_CORRELATIONS: usize = 5;
const TOP_OUTLIERS: usize = 5;

/// Summary statistics per metric; metrics below `min_sample` values are left out.
pub fn headline_summary(frame: &MetricFrame, min_sample: usize) -> Result<BTreeMap<String, SummaryStats>> {
    let mut summary = BTreeMap::new();
    for metric in SUMMARY_METRICS {
        if let Some(summarized) = stats::summarize(&frame.present(metric)?, min_sample) {
            summary.insert(metric.to_string(), summarized);
        }
    }
    Ok(summary)
}

/// Everything the digest is composed from.
pub struct DigestInput<'a> {
    pub frame: &'a MetricFrame,
    pub summary: &'a BTreeMap<String, SummaryStats>,
    pub correlations: &'a [CorrelationResult],
    pub outliers: &'a [OutlierRecord],
    pub hot: &'a [HotEntity],
    pub risks: &'a [FarmingRisk],
}

fn label(entity_id: u32, name: Option<&str>) -> String {
    match name {
        Some(name) => format!("SN{} ({})", entity_id, name),
        None => format!("SN{}", entity_id),
    }
}

/// Compact plain-text summary handed to an external summarizer.
pub fn compose_digest(input: &DigestInput<'_>) -> String {
    let frame = input.frame;
    let entities: BTreeSet<u32> = frame.rows().iter().map(|r| r.entity_id).collect();
    let mut lines = vec![format!("Records: {} | Subnets: {}", frame.len(), entities.len())];
    if let Some((first, last)) = frame.date_range() {
        lines.push(format!("Date range: {} to {}", first, last));
    }

    lines.push(String::new());
    lines.push("Key metrics:".to_string());
    if input.summary.is_empty() {
        lines.push("  insufficient data".to_string());
    }
    for (metric, s) in input.summary {
        lines.push(format!(
            "  {}: mean {:.4}, median {:.4}, std {:.4}, range [{:.4}, {:.4}], n={}",
            metric, s.mean, s.median, s.std, s.min, s.max, s.count
        ));
    }

    lines.push(String::new());
    lines.push(format!("Significant correlations: {}", input.correlations.len()));
    for c in input.correlations.iter().take(TOP_CORRELATIONS) {
        lines.push(format!(
            "  {} vs {}: r={:+.3} ({:?}, {}), p={:.4}, n={}",
            c.metric_a,
            c.metric_b,
            c.r,
            c.strength(),
            c.direction(),
            c.p_value,
            c.sample_size
        ));
    }

    lines.push(String::new());
    lines.push(format!("Outliers: {}", input.outliers.len()));
    for o in input.outliers.iter().take(TOP_OUTLIERS) {
        lines.push(format!(
            "  {} {}={:.4} (z={:+.2}): {}",
            label(o.entity_id, o.name.as_deref()),
            o.metric,
            o.value,
            o.robust_z,
            o.reason
        ));
    }

    if !input.hot.is_empty() {
        lines.push(String::new());
        let hot: Vec<String> = input
            .hot
            .iter()
            .map(|h| format!("{} ({:+.2})", label(h.entity_id, h.name.as_deref()), h.hot_score))
            .collect();
        lines.push(format!("Hot subnets: {}", hot.join(", ")));
    }
    if !input.risks.is_empty() {
        let risks: Vec<String> = input
            .risks
            .iter()
            .map(|r| format!("{} {:?} ({:.2})", label(r.entity_id, r.name.as_deref()), r.level, r.score))
            .collect();
        lines.push(format!("Emission farming risk: {}", risks.join(", ")));
    }

    lines.join("\n")
}
