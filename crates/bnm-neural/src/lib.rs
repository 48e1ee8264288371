// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Brain Network Model Math (Platform-Agnostic)
//!
//! All per-region math in one place, with no I/O and no threading:
//! - **Types**: precision trait (`Real`), IDs, error taxonomy
//! - **Constants**: `BaseParameters` → `ModelConstants<T>` derivation and steady states
//! - **Models**: reduced Wong-Wang E/I and excitatory-only neural masses, Balloon-Windkessel hemodynamics
//!
//! The simulation engine (`bnm-engine`) drives these models over a network.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod constants;
pub mod models;
pub mod types;

pub use constants::{
    BaseParameters, HemodynamicConstants, HemodynamicParameters, HemodynamicPreset,
    ModelConstants, SteadyState,
};
pub use models::{
    transfer_function, BalloonState, BalloonWindkessel, ExcRegionStep, ExcRegionalParameters,
    ModelParameters, NeuralMassModel, ReducedWongWang, ReducedWongWangExc, RegionStep,
    RegionalParameters,
};
pub use types::{
    DivergenceKind, Error, Hemisphere, InstanceId, ModelError, Precision, Real, RegionId,
    Result, StateViolation,
};
