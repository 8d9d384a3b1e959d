// crates/backtest/src/lib.rs
pub mod loader;
pub mod optimizer;
pub mod solver;

pub use loader::{BacktestFrame, DataSummary, InMemoryStore, JsonFileStore, SnapshotStore, forward_return};
pub use optimizer::{
    BacktestReport, OptimizationResult, Recommendation, WeightComparison, WeightOptimizer, optimize_weights,
    run_backtest, run_backtests,
};
pub use solver::{CappedSimplex, SolverOptions, SolverOutcome};
