// crates/analysis/src/lib.rs
//! Statistical screening of a metric frame and the cache that fronts the
//! external summarizer.

pub mod cache;
pub mod correlation;
pub mod digest;
pub mod engine;
pub mod insights;
pub mod outliers;
pub mod rate_limiter;

pub use cache::{
    AnalysisCache, AnalysisStatus, AnalysisStore, CacheEntry, CachedAnalysis, Clock, InMemoryStore, ManualClock,
    SystemClock,
};
pub use correlation::{
    CorrelationMatrix, CorrelationResult, DEFAULT_METRIC_COLUMNS, Strength, correlation_matrix,
    significant_correlations,
};
pub use digest::{DigestInput, compose_digest, headline_summary};
pub use engine::{AnalysisEngine, AnalysisReport};
pub use insights::{FarmingRisk, HotEntity, RiskLevel, farming_risks, hot_entities};
pub use outliers::{OUTLIER_METRICS, OutlierRecord, detect_outliers, robust_z_scores};
pub use rate_limiter::{RateDecision, RateLimitState, RateLimiter, RateWindow};
