// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neural-Mass Model Architecture
//!
//! Region dynamics are expressed through the `NeuralMassModel` trait
//! (`ReducedWongWang` E/I, `ReducedWongWangExc` excitatory-only) and the
//! hemodynamic forward model through `BalloonWindkessel`.
//!
//! ## Adding a New Neural-Mass Model
//!
//! 1. Create `src/models/your_model.rs`
//! 2. Implement `NeuralMassModel` trait
//! 3. Add tests
//! 4. Export in `mod.rs`

pub mod balloon;
pub mod rww;
pub mod rww_exc;
pub mod traits;

// Re-export core types
pub use balloon::{BalloonState, BalloonWindkessel};
pub use rww::{transfer_function, ReducedWongWang, RegionalParameters, RegionStep};
pub use rww_exc::{ExcRegionStep, ExcRegionalParameters, ReducedWongWangExc};
pub use traits::{ModelParameters, NeuralMassModel};
