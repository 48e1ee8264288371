// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neural-Mass Types Module
//!
//! Core type definitions shared by the model math and the simulation engine.

pub mod error;
pub mod ids;
pub mod numeric;

// Re-export commonly used types
pub use error::{DivergenceKind, Error, ModelError, Result, StateViolation};
pub use ids::{Hemisphere, InstanceId, RegionId};
pub use numeric::{Precision, Real};
