// crates/scoring/src/calculator.rs
use crate::formula::{Direction, Formula, WeightVector};
use common::{FormulaVersion, Result};
use features::clamp_pct;
use std::collections::BTreeMap;

/// Sub-metric key -> value pre-scaled to 0..=100, `None` when unavailable.
pub type ScoreInputs = BTreeMap<String, Option<f64>>;

/// Weighted-sum evaluator shared by every formula version.
#[derive(Debug, Clone, Copy)]
pub struct ScoreCalculator {
    formula: &'static Formula,
}

impl ScoreCalculator {
    pub fn new(version: FormulaVersion) -> Self {
        Self {
            formula: Formula::get(version),
        }
    }

    pub fn formula(&self) -> &'static Formula {
        self.formula
    }

    /// Inputs in formula order; unknown keys are ignored, non-finite values read as absent.
    pub fn align(&self, inputs: &ScoreInputs) -> Vec<Option<f64>> {
        self.formula
            .keys()
            .map(|key| inputs.get(key).copied().flatten().filter(|v| v.is_finite()))
            .collect()
    }

    /// Weights after moving the share of absent optional inputs onto the core inputs.
    ///
    /// Core inputs receive the freed weight in proportion to their own weight.
    /// Returns `None` when any core input is absent.
    pub fn effective_weights(&self, available: &[bool], weights: &[f64]) -> Option<Vec<f64>> {
        let components = self.formula.components;
        if available.len() != components.len() || weights.len() != components.len() {
            return None;
        }

        let mut freed = 0.0;
        let mut core_total = 0.0;
        let mut core_count = 0usize;
        for ((component, &present), &weight) in components.iter().zip(available).zip(weights) {
            if component.is_core() {
                if !present {
                    return None;
                }
                core_total += weight;
                core_count += 1;
            } else if !present {
                freed += weight;
            }
        }

        let effective = components
            .iter()
            .zip(available)
            .zip(weights)
            .map(|((component, &present), &weight)| {
                if component.is_core() {
                    if core_total > 0.0 {
                        weight + freed * weight / core_total
                    } else {
                        weight + freed / core_count as f64
                    }
                } else if present {
                    weight
                } else {
                    0.0
                }
            })
            .collect();
        Some(effective)
    }

    /// Clipped weighted sum before rounding.
    pub fn raw_score(&self, values: &[Option<f64>], weights: &[f64]) -> Option<f64> {
        let available: Vec<bool> = values.iter().map(Option::is_some).collect();
        let effective = self.effective_weights(&available, weights)?;

        let total: f64 = self
            .formula
            .components
            .iter()
            .zip(values)
            .zip(&effective)
            .filter_map(|((component, value), weight)| {
                let v = clamp_pct((*value)?);
                Some(match component.direction {
                    Direction::HigherIsBetter => v * weight,
                    Direction::Inverted => (100.0 - v) * weight,
                })
            })
            .sum();

        let (lo, hi) = self.formula.bounds;
        total.is_finite().then(|| total.clamp(lo, hi))
    }

    /// Score with the formula's default weights, rounded to one decimal.
    pub fn score(&self, inputs: &ScoreInputs) -> Option<f64> {
        let values = self.align(inputs);
        let score = self
            .raw_score(&values, &self.formula.default_weight_slice())
            .map(round_one_decimal);
        if score.is_none() {
            metrics::counter!("score_missing_core_total", "version" => self.formula.version.as_str()).increment(1);
        }
        score
    }

    /// Score with caller-supplied weights, rounded to one decimal.
    pub fn score_with(&self, inputs: &ScoreInputs, weights: &WeightVector) -> Result<Option<f64>> {
        let weights = weights.to_slice(self.formula)?;
        Ok(self.raw_score(&self.align(inputs), &weights).map(round_one_decimal))
    }
}

/// Composite score for `version`, or `None` when a core input is missing.
pub fn compute_score(version: FormulaVersion, inputs: &ScoreInputs) -> Option<f64> {
    ScoreCalculator::new(version).score(inputs)
}

pub fn round_one_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{V1_1, V2_1};

    fn inputs(pairs: &[(&str, Option<f64>)]) -> ScoreInputs {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn v11_full() -> ScoreInputs {
        inputs(&[
            ("stake_quality", Some(80.0)),
            ("consensus", Some(85.0)),
            ("trust", Some(80.0)),
            ("validator_util", Some(60.0)),
            ("inflation", Some(100.0)),
            ("momentum", Some(2.0)),
        ])
    }

    fn v21_full() -> ScoreInputs {
        inputs(&[
            ("stake_quality", Some(70.0)),
            ("active_validators", Some(50.0)),
            ("stake_hhi", Some(40.0)),
            ("market_cap", Some(60.0)),
            ("emission_efficiency", Some(30.0)),
            ("flow_velocity", Some(20.0)),
            ("root_prop_delta", Some(50.0)),
            ("sharpe", Some(55.0)),
            ("volume", Some(45.0)),
        ])
    }

    #[test]
    fn test_v11_all_inputs() {
        // 28 + 17 + 12 + 6 + 10 + 0.2
        assert_eq!(compute_score(FormulaVersion::V1_1, &v11_full()), Some(73.2));
    }

    #[test]
    fn test_v11_missing_inflation_goes_to_core() {
        let mut scored = v11_full();
        scored.insert("trust".into(), Some(75.0));
        scored.insert("inflation".into(), None);

        // core weights scaled by 1 / 0.7 * 0.8: 0.4, 0.2286, 0.1714
        let score = compute_score(FormulaVersion::V1_1, &scored).unwrap();
        assert_eq!(score, 70.5);
    }

    #[test]
    fn test_missing_core_voids_score() {
        let mut v11 = v11_full();
        v11.remove("consensus");
        assert_eq!(compute_score(FormulaVersion::V1_1, &v11), None);

        let mut v21 = v21_full();
        v21.insert("market_cap".into(), None);
        assert_eq!(compute_score(FormulaVersion::V2_1, &v21), None);

        let mut nan = v21_full();
        nan.insert("stake_hhi".into(), Some(f64::NAN));
        assert_eq!(compute_score(FormulaVersion::V2_1, &nan), None);
    }

    #[test]
    fn test_redistribution_sums_to_one_for_every_subset() {
        for formula in [&V1_1, &V2_1] {
            let calc = ScoreCalculator::new(formula.version);
            let defaults = formula.default_weight_slice();
            let optional: Vec<usize> = formula
                .components
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.is_core())
                .map(|(i, _)| i)
                .collect();

            for mask in 0u32..(1 << optional.len()) {
                let mut available = vec![true; formula.len()];
                for (bit, idx) in optional.iter().enumerate() {
                    if mask & (1 << bit) != 0 {
                        available[*idx] = false;
                    }
                }
                let effective = calc.effective_weights(&available, &defaults).unwrap();
                let total: f64 = effective.iter().sum();
                assert!((total - 1.0).abs() < 1e-9, "{} mask {} sums to {}", formula.version, mask, total);

                for (i, present) in available.iter().enumerate() {
                    if !present {
                        assert_eq!(effective[i], 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_core_split_unchanged_by_optional_inputs() {
        let calc = ScoreCalculator::new(FormulaVersion::V2_1);
        let defaults = V2_1.default_weight_slice();
        let all = vec![true; 9];
        let mut some_missing = all.clone();
        some_missing[5] = false;
        some_missing[7] = false;

        let full = calc.effective_weights(&all, &defaults).unwrap();
        let partial = calc.effective_weights(&some_missing, &defaults).unwrap();
        for (a, b) in [(0, 1), (0, 3), (2, 3)] {
            assert!((full[a] / full[b] - partial[a] / partial[b]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_score_bounds() {
        for formula in [&V1_1, &V2_1] {
            let calc = ScoreCalculator::new(formula.version);
            let keys: Vec<&str> = formula.keys().collect();
            for value in [-50.0, 0.0, 33.3, 100.0, 1e6] {
                let scored: ScoreInputs = keys.iter().map(|k| (k.to_string(), Some(value))).collect();
                let score = calc.score(&scored).unwrap();
                assert!(
                    (0.0..=100.0).contains(&score),
                    "{} score {} for input {}",
                    formula.version,
                    score,
                    value
                );
            }
        }
    }

    #[test]
    fn test_monotonicity() {
        for (formula, base) in [(&V1_1, v11_full()), (&V2_1, v21_full())] {
            let calc = ScoreCalculator::new(formula.version);
            let base_score = calc.score(&base).unwrap();

            for component in formula.components {
                let mut raised = base.clone();
                let current = raised[component.key].unwrap();
                raised.insert(component.key.to_string(), Some(current + 20.0));
                let score = calc.score(&raised).unwrap();
                match component.direction {
                    Direction::HigherIsBetter => {
                        assert!(score >= base_score, "{} {} lowered the score", formula.version, component.key)
                    }
                    Direction::Inverted => {
                        assert!(score <= base_score, "{} {} raised the score", formula.version, component.key)
                    }
                }
            }
        }
    }

    #[test]
    fn test_custom_weights() {
        let calc = ScoreCalculator::new(FormulaVersion::V2_1);
        let mut weights = V2_1.default_weights();
        assert_eq!(
            calc.score_with(&v21_full(), &weights).unwrap(),
            calc.score(&v21_full())
        );

        weights.set("unknown", 0.1);
        assert!(calc.score_with(&v21_full(), &weights).is_err());
    }
}
