// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for model construction and integration

use core::fmt;

use serde::{Deserialize, Serialize};

/// What went wrong when a state left its physical range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceKind {
    /// NaN or ±inf
    NonFinite,
    /// Hemodynamic flow/volume/deoxyhemoglobin dropped to zero or below
    NonPositive,
    /// Gating variable clamped on every step of the run
    PersistentClamp,
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceKind::NonFinite => write!(f, "non-finite"),
            DivergenceKind::NonPositive => write!(f, "non-positive"),
            DivergenceKind::PersistentClamp => write!(f, "clamped on every step"),
        }
    }
}

/// Error taxonomy shared by the model math and the simulation engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Non-positive time constant / step size, malformed connectivity, bad regional parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// State left its physical range during integration
    #[error("Numerical divergence at step {step}, region {region}: {quantity} is {kind} ({value})")]
    NumericalDivergence {
        step: u64,
        region: usize,
        quantity: &'static str,
        value: f64,
        kind: DivergenceKind,
    },

    /// FIC trial budget exhausted without convergence
    #[error("FIC did not converge in {} region(s) after {trials} trial(s): {regions:?}", .regions.len())]
    FicFailed { regions: Vec<usize>, trials: u32 },

    /// Empty sampling window, step sizes that do not divide durations, ...
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        ModelError::Configuration(msg.into())
    }

    /// True for errors detected before any integration step runs
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            ModelError::InvalidParameter { .. } | ModelError::Configuration(_)
        )
    }
}

/// A single out-of-range state value, before the engine attaches step/region context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateViolation {
    pub quantity: &'static str,
    pub value: f64,
    pub kind: DivergenceKind,
}

impl StateViolation {
    pub fn non_finite(quantity: &'static str, value: f64) -> Self {
        Self {
            quantity,
            value,
            kind: DivergenceKind::NonFinite,
        }
    }

    pub fn non_positive(quantity: &'static str, value: f64) -> Self {
        Self {
            quantity,
            value,
            kind: DivergenceKind::NonPositive,
        }
    }

    /// Attach the step index and region
    pub fn at(self, step: u64, region: usize) -> ModelError {
        ModelError::NumericalDivergence {
            step,
            region,
            quantity: self.quantity,
            value: self.value,
            kind: self.kind,
        }
    }
}

pub type Result<T> = core::result::Result<T, ModelError>;
pub type Error = ModelError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_message_carries_context() {
        let err = ModelError::NumericalDivergence {
            step: 42,
            region: 7,
            quantity: "S_E",
            value: f64::NAN,
            kind: DivergenceKind::NonFinite,
        };
        let msg = err.to_string();
        assert!(msg.contains("step 42"));
        assert!(msg.contains("region 7"));
        assert!(msg.contains("S_E"));
        assert!(!err.is_pre_run());
    }

    #[test]
    fn test_violation_context() {
        let err = StateViolation::non_positive("f", -0.5).at(10, 2);
        match err {
            ModelError::NumericalDivergence {
                step,
                region,
                quantity,
                kind,
                ..
            } => {
                assert_eq!(step, 10);
                assert_eq!(region, 2);
                assert_eq!(quantity, "f");
                assert_eq!(kind, DivergenceKind::NonPositive);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fic_failed_message() {
        let err = ModelError::FicFailed {
            regions: vec![1, 3],
            trials: 5,
        };
        assert!(err.to_string().contains("2 region(s)"));
    }

    #[test]
    fn test_pre_run_classification() {
        assert!(ModelError::invalid_parameter("dt", "must be > 0").is_pre_run());
        assert!(ModelError::configuration("empty window").is_pre_run());
    }
}
