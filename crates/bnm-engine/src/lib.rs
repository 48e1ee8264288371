// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

// Manual `n % divisor == 0` used instead of `n.is_multiple_of(divisor)` for stable Rust
// compatibility.
#![allow(clippy::manual_is_multiple_of)]
/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # BNM Simulation Engine
//!
//! Stochastic integration of coupled reduced Wong-Wang networks, Feedback
//! Inhibition Control, Balloon-Windkessel hemodynamics and BOLD sampling.
//!
//! ## Timestep Discipline
//! - **Neural step**: `dt` (0.1 ms by default), Euler–Maruyama
//! - **Hemodynamic step**: `bw_dt` (1 ms by default), explicit Euler
//! - **BOLD output**: one sample per TR after the transient
//!
//! ## Architecture
//! - Pure Rust, generic over `f32` / `f64`
//! - Rayon for instance-level and (large networks) region-level parallelism
//! - Double-buffered node state, sequential commit
//! - Reproducible noise: one ChaCha8 stream per run / FIC trial

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bold_sampler;
pub mod connectome;
pub mod coupling;
pub mod error;
pub mod fic;
pub mod group;
pub mod hemodynamics;
pub mod neural_dynamics;
pub mod noise;
pub mod simulation;

pub use bold_sampler::{BoldSampler, BoldSeries, SamplingMode};
pub use connectome::{Connectome, ConnectomeOptions, EdgeDropout};
pub use coupling::{CouplingEngine, PARALLEL_REGION_THRESHOLD};
pub use error::SimulationError;
pub use fic::{
    analytic_weights, Direction, FicController, FicMode, FicReport, FicSettings, FicTrialRecord,
    RegionSearch, SearchPhase,
};
pub use group::{GroupRun, SimGroup};
pub use hemodynamics::{HemodynamicArray, HemodynamicConverter, HemodynamicDrive};
pub use neural_dynamics::{ClampMonitor, NeuralIntegrator, NodeStateArray, RegionalWeights};
pub use noise::{NoiseMode, NoiseSettings, NoiseSource, FIC_STREAM_BASE, MAIN_STREAM};
pub use simulation::{
    ExtendedOutput, RunSettings, SimulationDiagnostics, SimulationOutput, SimulationParameters,
    Simulator, StateMeans, StateSeries,
};

/// Simulation group statistics
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct GroupStats {
    pub total_instances: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Succeeded instances whose numerical FIC left regions unconverged
    pub fic_failures: u64,
    pub total_neural_steps: u64,
    /// Sum of per-instance run times
    pub total_processing_time_us: u64,
    pub wall_time_us: u64,
}

impl GroupStats {
    /// Get average processing time per succeeded instance (microseconds)
    pub fn avg_processing_time_us(&self) -> f64 {
        if self.succeeded == 0 {
            0.0
        } else {
            self.total_processing_time_us as f64 / self.succeeded as f64
        }
    }

    /// Get average neural steps per succeeded instance
    pub fn avg_steps_per_instance(&self) -> f64 {
        if self.succeeded == 0 {
            0.0
        } else {
            self.total_neural_steps as f64 / self.succeeded as f64
        }
    }

    /// Get neural steps per wall-clock second across the group
    pub fn steps_per_second(&self) -> f64 {
        if self.wall_time_us == 0 {
            0.0
        } else {
            self.total_neural_steps as f64 * 1e6 / self.wall_time_us as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_stats() {
        let stats = GroupStats {
            total_instances: 5,
            succeeded: 4,
            failed: 1,
            total_neural_steps: 40_000,
            total_processing_time_us: 2_000_000,
            wall_time_us: 1_000_000,
            ..Default::default()
        };

        assert_eq!(stats.avg_processing_time_us(), 500_000.0);
        assert_eq!(stats.avg_steps_per_instance(), 10_000.0);
        assert_eq!(stats.steps_per_second(), 40_000.0);
        assert_eq!(GroupStats::default().avg_steps_per_instance(), 0.0);
    }
}
