// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Numeric Precision
//!
//! Every state array, constant and output series is generic over `T: Real`.
//! The precision is picked once, when a simulator is instantiated, instead of
//! through a build-time switch.
//!
//! ```text
//! Real = f32  → half the memory traffic, ~1e-7 relative step error
//! Real = f64  → reference precision (default)
//! ```
//!
//! FIC steady-state math and statistics always run in `f64` regardless of `T`.

use core::fmt::{Debug, Display};
use core::iter::Sum;

use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Floating-point precision selector (used by configuration and logging)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit IEEE-754
    Single,
    /// 64-bit IEEE-754
    #[default]
    Double,
}

impl Display for Precision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Precision::Single => write!(f, "f32"),
            Precision::Double => write!(f, "f64"),
        }
    }
}

/// Scalar type used by the integration hot loop.
///
/// Thin layer over [`num_traits::Float`] that adds lossless-enough
/// conversions to/from `f64` (the precision of [`crate::BaseParameters`]).
pub trait Real:
    Float + Sum + Default + Debug + Display + Send + Sync + Serialize + 'static
{
    /// Precision tag for this type
    const PRECISION: Precision;

    /// Convert an `f64` literal/parameter into this precision
    fn from_real(value: f64) -> Self;

    /// Widen to `f64` (used for statistics and error reports)
    fn as_f64(self) -> f64;

    /// Threshold on |a·I − b| under which the transfer function switches to
    /// its series expansion
    fn singular_threshold() -> Self;
}

impl Real for f32 {
    const PRECISION: Precision = Precision::Single;

    #[inline(always)]
    fn from_real(value: f64) -> Self {
        value as f32
    }

    #[inline(always)]
    fn as_f64(self) -> f64 {
        self as f64
    }

    #[inline(always)]
    fn singular_threshold() -> Self {
        1e-2
    }
}

impl Real for f64 {
    const PRECISION: Precision = Precision::Double;

    #[inline(always)]
    fn from_real(value: f64) -> Self {
        value
    }

    #[inline(always)]
    fn as_f64(self) -> f64 {
        self
    }

    #[inline(always)]
    fn singular_threshold() -> Self {
        1e-4
    }
}
