// crates/scoring/src/formula.rs
use common::{Error, FormulaVersion, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a missing input voids the score or just drops out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Core,
    Optional,
}

/// Orientation of a sub-metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    /// Contributes `(100 - value) * weight`
    Inverted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub key: &'static str,
    pub default_weight: f64,
    pub role: Role,
    pub direction: Direction,
}

impl Component {
    const fn core(key: &'static str, default_weight: f64) -> Self {
        Self {
            key,
            default_weight,
            role: Role::Core,
            direction: Direction::HigherIsBetter,
        }
    }

    const fn optional(key: &'static str, default_weight: f64) -> Self {
        Self {
            key,
            default_weight,
            role: Role::Optional,
            direction: Direction::HigherIsBetter,
        }
    }

    const fn inverted(self) -> Self {
        Self {
            direction: Direction::Inverted,
            ..self
        }
    }

    pub fn is_core(&self) -> bool {
        self.role == Role::Core
    }
}

/// One score formula: its inputs, default weights and output bounds.
#[derive(Debug)]
pub struct Formula {
    pub version: FormulaVersion,
    pub components: &'static [Component],
    pub bounds: (f64, f64),
}

static V1_1_COMPONENTS: [Component; 6] = [
    Component::core("stake_quality", 0.35),
    Component::core("consensus", 0.20),
    Component::core("trust", 0.15),
    Component::optional("validator_util", 0.10),
    Component::optional("inflation", 0.10),
    Component::optional("momentum", 0.10),
];

static V2_1_COMPONENTS: [Component; 9] = [
    Component::core("stake_quality", 0.18),
    Component::core("active_validators", 0.10),
    Component::core("stake_hhi", 0.07).inverted(),
    Component::core("market_cap", 0.15),
    Component::optional("emission_efficiency", 0.10).inverted(),
    Component::optional("flow_velocity", 0.08),
    Component::optional("root_prop_delta", 0.07).inverted(),
    Component::optional("sharpe", 0.15),
    Component::optional("volume", 0.10),
];

pub static V1_1: Formula = Formula {
    version: FormulaVersion::V1_1,
    components: &V1_1_COMPONENTS,
    bounds: (0.0, 100.0),
};

pub static V2_1: Formula = Formula {
    version: FormulaVersion::V2_1,
    components: &V2_1_COMPONENTS,
    bounds: (0.0, 100.0),
};

impl Formula {
    pub fn get(version: FormulaVersion) -> &'static Formula {
        match version {
            FormulaVersion::V1_1 => &V1_1,
            FormulaVersion::V2_1 => &V2_1,
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.iter().map(|c| c.key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.components.iter().position(|c| c.key == key)
    }

    pub fn default_weight_slice(&self) -> Vec<f64> {
        self.components.iter().map(|c| c.default_weight).collect()
    }

    pub fn default_weights(&self) -> WeightVector {
        WeightVector::from_slice(self, &self.default_weight_slice())
    }
}

/// Named sub-metric weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightVector(BTreeMap<String, f64>);

impl WeightVector {
    /// Pair `weights` with the formula's keys in declaration order.
    pub fn from_slice(formula: &Formula, weights: &[f64]) -> Self {
        Self(
            formula
                .keys()
                .zip(weights)
                .map(|(k, w)| (k.to_string(), *w))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, weight: f64) {
        self.0.insert(key.into(), weight);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, w)| (k.as_str(), *w))
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    /// Weights in the formula's declaration order.
    ///
    /// The key set must match the formula exactly and every weight must be a
    /// finite non-negative number.
    pub fn to_slice(&self, formula: &Formula) -> Result<Vec<f64>> {
        if let Some(extra) = self.0.keys().find(|k| formula.position(k).is_none()) {
            return Err(Error::InvalidData(format!(
                "weight key {} is not part of formula {}",
                extra, formula.version
            )));
        }
        formula
            .keys()
            .map(|key| match self.get(key) {
                Some(w) if w.is_finite() && w >= 0.0 => Ok(w),
                Some(w) => Err(Error::InvalidData(format!("weight for {} must be non-negative, got {}", key, w))),
                None => Err(Error::InvalidData(format!(
                    "missing weight for {} in formula {}",
                    key, formula.version
                ))),
            })
            .collect()
    }
}
