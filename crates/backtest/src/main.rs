// crates/backtest/src/main.rs
use anyhow::{Context, bail};
use backtest::{JsonFileStore, SnapshotStore, run_backtests};
use common::config::DEFAULT_CONFIG_PATH;
use common::{AnalyticsConfig, Horizon};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        bail!("usage: backtest <snapshots.json> [horizon-days]");
    };
    let horizons = match args.next() {
        Some(days) => {
            let days: i64 = days.parse().with_context(|| format!("invalid horizon: {}", days))?;
            let horizon = Horizon::from_days(days).with_context(|| format!("unsupported horizon: {}d", days))?;
            vec![horizon]
        }
        None => Horizon::ALL.to_vec(),
    };

    let config = load_config()?;
    tracing::info!(
        "Backtest starting: formula {}, horizons {:?}",
        config.backtest.formula,
        horizons.iter().map(|h| h.to_string()).collect::<Vec<_>>()
    );

    let snapshots = JsonFileStore::new(&input)
        .load_range(None, None)
        .with_context(|| format!("failed to load snapshots from {}", input))?;
    let reports = run_backtests(snapshots, &horizons, &config)?;

    for report in &reports {
        tracing::info!(
            "{}: baseline {:.4}, optimized {:.4}, recommendation {:?}",
            report.horizon,
            report.baseline_correlation,
            report.optimization.correlation,
            report.recommendation
        );
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn load_config() -> anyhow::Result<AnalyticsConfig> {
    let path = std::env::var("ANALYTICS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        return Ok(AnalyticsConfig::load(&path)?);
    }

    tracing::warn!("Config {} not found, using defaults", path);
    let mut config = AnalyticsConfig::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
