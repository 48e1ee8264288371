// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Traits implemented by every neural-mass model

use crate::constants::ModelConstants;
use crate::types::Real;

/// Per-region parameters of a model
pub trait ModelParameters: Clone + Send + Sync {
    /// Validate parameter ranges
    fn validate(&self) -> Result<(), &'static str>;

    /// Number of free parameters per region
    fn parameter_count() -> usize;
}

/// Neural mass per region, advanced with a fixed step.
///
/// Gating and noise come as (excitatory, inhibitory) pairs; single-population
/// models read the first element only.
pub trait NeuralMassModel<T: Real>: Send + Sync {
    /// Model-specific per-region parameters
    type Parameters: ModelParameters;

    /// Per-region output of one step
    type Step: Copy;

    /// Human-readable model name (for logs)
    fn model_name(&self) -> &'static str;

    /// Advance one region by one step.
    ///
    /// `coupling` is the network input `Σ_j W_ij·S_E,j`, `noise` the two
    /// standard-normal samples (excitatory, inhibitory) for this step.
    fn step_region(
        &self,
        constants: &ModelConstants<T>,
        params: &Self::Parameters,
        global_coupling: T,
        coupling: T,
        gating: (T, T),
        noise: (T, T),
    ) -> Self::Step;
}
