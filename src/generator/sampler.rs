use std::collections::BTreeMap;

use rand::Rng;

use crate::types::VariableConstraint;

pub const DEFAULT_MAX_RETRIES: u32 = 100;

/// Lattices up to this size are enumerated instead of rejection-sampled when exclusions exist.
const ENUMERATION_LIMIT: u64 = 10_000;
const LATTICE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("variable {variable}: every value in [{min}, {max}] with step {step} is excluded")]
    DegenerateConstraint {
        variable: String,
        min: f64,
        max: f64,
        step: f64,
    },
    #[error("variable {variable}: {reason}")]
    InvalidConstraint {
        variable: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct ConstraintSampler {
    max_retries: u32,
}

impl Default for ConstraintSampler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl ConstraintSampler {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Draws every variable in name order so a seeded RNG gives a stable assignment.
    pub fn sample<R: Rng>(
        &self,
        variables: &BTreeMap<String, VariableConstraint>,
        rng: &mut R,
    ) -> Result<BTreeMap<String, f64>, SampleError> {
        let mut assignment = BTreeMap::new();
        for (name, constraint) in variables {
            let value = self.sample_value(name, constraint, rng)?;
            assignment.insert(name.clone(), value);
        }
        Ok(assignment)
    }

    pub fn sample_value<R: Rng>(
        &self,
        name: &str,
        constraint: &VariableConstraint,
        rng: &mut R,
    ) -> Result<f64, SampleError> {
        let steps = lattice_steps(name, constraint)?;

        if constraint.exclude.is_empty() {
            return Ok(lattice_point(constraint, rng.random_range(0..=steps)));
        }

        if steps < ENUMERATION_LIMIT {
            let allowed: Vec<f64> = (0..=steps)
                .map(|k| lattice_point(constraint, k))
                .filter(|v| !is_excluded(constraint, *v))
                .collect();
            if allowed.is_empty() {
                return Err(degenerate(name, constraint));
            }
            return Ok(allowed[rng.random_range(0..allowed.len())]);
        }

        for _ in 0..self.max_retries {
            let value = lattice_point(constraint, rng.random_range(0..=steps));
            if !is_excluded(constraint, value) {
                return Ok(value);
            }
        }
        Err(degenerate(name, constraint))
    }
}

/// Number of lattice points in the constraint, or `None` when the constraint is invalid.
pub fn lattice_size(constraint: &VariableConstraint) -> Option<u64> {
    lattice_steps("", constraint).ok().map(|steps| steps + 1)
}

pub fn is_on_lattice(constraint: &VariableConstraint, value: f64) -> bool {
    if value < constraint.min - LATTICE_EPSILON || value > constraint.max + LATTICE_EPSILON {
        return false;
    }
    let k = (value - constraint.min) / constraint.step;
    (k - k.round()).abs() < 1e-6
}

pub fn is_excluded(constraint: &VariableConstraint, value: f64) -> bool {
    constraint
        .exclude
        .iter()
        .any(|excluded| (excluded - value).abs() < LATTICE_EPSILON)
}

fn lattice_steps(name: &str, constraint: &VariableConstraint) -> Result<u64, SampleError> {
    let invalid = |reason: &'static str| SampleError::InvalidConstraint {
        variable: name.to_string(),
        reason,
    };

    if !constraint.min.is_finite() || !constraint.max.is_finite() || !constraint.step.is_finite() {
        return Err(invalid("bounds and step must be finite"));
    }
    if constraint.step <= 0.0 {
        return Err(invalid("step must be positive"));
    }
    if constraint.min > constraint.max {
        return Err(invalid("min exceeds max"));
    }

    let steps = ((constraint.max - constraint.min) / constraint.step + LATTICE_EPSILON).floor();
    if steps > u32::MAX as f64 {
        return Err(invalid("lattice too large"));
    }
    Ok(steps as u64)
}

fn lattice_point(constraint: &VariableConstraint, k: u64) -> f64 {
    let raw = constraint.min + k as f64 * constraint.step;
    (raw * 1e9).round() / 1e9
}

fn degenerate(name: &str, constraint: &VariableConstraint) -> SampleError {
    SampleError::DegenerateConstraint {
        variable: name.to_string(),
        min: constraint.min,
        max: constraint.max,
        step: constraint.step,
    }
}
