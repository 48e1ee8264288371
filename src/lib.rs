// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # BNM - Brain Network Model Simulation Core
//!
//! Whole-brain simulation of coupled reduced Wong-Wang excitatory/inhibitory
//! neural masses driving a Balloon-Windkessel hemodynamic model, with
//! Feedback Inhibition Control and TR-resolution BOLD output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bnm::prelude::*;
//! use std::sync::Arc;
//!
//! let config = bnm::config::load_config(None, None)?;
//! let setup = ModelSetup::from_config(&config)?;
//! let sc = bnm::setup::load_sc(&config.connectivity.sc_path)?;
//!
//! let constants = Arc::new(ModelConstants::<f64>::derive(&setup.base)?);
//! let simulator = Simulator::new(constants, Arc::new(setup.settings.clone()), sc)?;
//! let params = setup.parameters(InstanceId(0), simulator.n_regions());
//! let output = simulator.simulate(&params)?;
//! println!("{} BOLD samples", output.bold.n_samples());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Foundation: bnm-config, bnm-observability              │
//! │  (TOML + overrides, logging)                            │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Model math: bnm-neural                                 │
//! │  (constants, rWW transfer, Balloon-Windkessel)          │
//! └─────────────────────────────────────────────────────────┘
//!                         ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │  Engine: bnm-engine                                     │
//! │  (integration, FIC, hemodynamics, BOLD, groups)         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## License
//!
//! Apache-2.0

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export workspace crates
pub use bnm_config as config;
pub use bnm_engine as engine;
pub use bnm_neural as neural;
pub use bnm_observability as observability;

pub mod setup;

pub use setup::{load_sc, parse_sc, ModelSetup, SetupError};

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::engine::{
        FicMode, FicReport, FicSettings, GroupRun, GroupStats, RunSettings, SimGroup,
        SimulationError, SimulationOutput, SimulationParameters, Simulator,
    };
    pub use crate::neural::{
        BaseParameters, InstanceId, ModelConstants, ModelError, Precision, Real,
    };
    pub use crate::setup::{ModelSetup, SetupError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION, engine::VERSION);
    }
}
