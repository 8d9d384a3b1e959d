// crates/features/src/lib.rs - Metric transforms and derived quantities
pub mod derived;
pub mod stats;
pub mod transforms;

pub use derived::{NetworkSample, derive_network_metrics, enrich_frame, validate_metrics};
pub use stats::{PearsonTest, SummaryStats};
pub use transforms::{
    clamp_pct, clipped_zscore, percentile_rank, sqrt_compress, sqrt_scaled, winsorize,
    winsorize_default, winsorized_zscores,
};
