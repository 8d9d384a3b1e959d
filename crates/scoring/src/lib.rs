// crates/scoring/src/lib.rs
//! Composite subnet scores.
//!
//! Each formula version is a static table of components (key, default
//! weight, core/optional, orientation) evaluated by one weighted-sum
//! calculator. Input builders turn a [`common::MetricSnapshot`] into the
//! 0..=100 sub-metric values a formula expects.

pub mod calculator;
pub mod formula;
pub mod inputs;

pub use calculator::{ScoreCalculator, ScoreInputs, compute_score, round_one_decimal};
pub use formula::{Component, Direction, Formula, Role, WeightVector};
pub use inputs::{apply_scores, build_inputs, score_snapshot, v11_inputs, v21_inputs};
