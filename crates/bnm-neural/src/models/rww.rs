// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Reduced Wong-Wang E/I Model
//!
//! One excitatory and one inhibitory population per region.
//!
//! ## Model Dynamics
//!
//! ```text
//! Input currents:
//!     I_E = w_E·I_0 + w_EE·S_E + G·J_NMDA·Σ_j W_ij·S_E,j − w_IE·S_I + I_ext
//!     I_I = w_I·I_0 + w_EI·S_E − w_II·S_I
//!
//! Transfer function (per population):
//!     x = a·I − b
//!     r = x / (1 − exp(−d·x))          |x| ≥ threshold
//!     r = 1/d + x/2 + d·x²/12          |x| <  threshold
//!
//! Gating (Euler–Maruyama, step h):
//!     S_E ← S_E + h(−S_E/τ_E + (1 − S_E)·γ_E·r_E) + σ√h·ξ_E
//!     S_I ← S_I + h(−S_I/τ_I + γ_I·r_I)           + σ√h·ξ_I
//!     clamp both into [0, 1]
//! ```

use serde::{Deserialize, Serialize};

use super::traits::{ModelParameters, NeuralMassModel};
use crate::constants::ModelConstants;
use crate::types::{Real, StateViolation};

/// Firing rate (Hz) for `x = a·I − b`
#[inline(always)]
pub fn transfer_function<T: Real>(x: T, d: T, threshold: T) -> T {
    if x.abs() < threshold {
        let two = T::from_real(2.0);
        let twelve = T::from_real(12.0);
        T::one() / d + x / two + d * x * x / twelve
    } else {
        x / (T::one() - (-d * x).exp())
    }
}

/// Per-region local weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionalParameters<T: Real> {
    /// Local excitatory recurrence
    pub w_ee: T,
    /// Excitatory → inhibitory
    pub w_ei: T,
    /// Inhibitory → excitatory (the FIC-tuned weight)
    pub w_ie: T,
}

impl<T: Real> Default for RegionalParameters<T> {
    fn default() -> Self {
        Self {
            w_ee: T::from_real(0.21),
            w_ei: T::from_real(0.15),
            w_ie: T::from_real(1.0),
        }
    }
}

impl<T: Real> ModelParameters for RegionalParameters<T> {
    fn validate(&self) -> Result<(), &'static str> {
        if !(self.w_ee.is_finite() && self.w_ee >= T::zero()) {
            return Err("rWW: w_EE must be finite and >= 0");
        }
        if !(self.w_ei.is_finite() && self.w_ei >= T::zero()) {
            return Err("rWW: w_EI must be finite and >= 0");
        }
        // Negative w_IE is allowed (flagged as unstable by FIC)
        if !self.w_ie.is_finite() {
            return Err("rWW: w_IE must be finite");
        }
        Ok(())
    }

    fn parameter_count() -> usize {
        3 // w_EE + w_EI + w_IE
    }
}

/// Result of advancing one region by one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStep<T: Real> {
    pub i_e: T,
    pub i_i: T,
    pub r_e: T,
    pub r_i: T,
    /// Next excitatory gating (clamped when finite)
    pub s_e: T,
    /// Next inhibitory gating (clamped when finite)
    pub s_i: T,
    pub clamped_e: bool,
    pub clamped_i: bool,
}

impl<T: Real> RegionStep<T> {
    /// True when either gating variable hit a bound this step
    #[inline(always)]
    pub fn clamped(&self) -> bool {
        self.clamped_e || self.clamped_i
    }

    /// First non-finite quantity, in evaluation order
    pub fn check_finite(&self) -> Result<(), StateViolation> {
        let quantities = [
            ("I_E", self.i_e),
            ("I_I", self.i_i),
            ("r_E", self.r_e),
            ("r_I", self.r_i),
            ("S_E", self.s_e),
            ("S_I", self.s_i),
        ];
        for (name, value) in quantities {
            if !value.is_finite() {
                return Err(StateViolation::non_finite(name, value.as_f64()));
            }
        }
        Ok(())
    }
}

#[inline(always)]
fn clamp_unit<T: Real>(value: T) -> (T, bool) {
    if !value.is_finite() {
        // Left unclamped so the divergence check sees it
        return (value, false);
    }
    if value < T::zero() {
        (T::zero(), true)
    } else if value > T::one() {
        (T::one(), true)
    } else {
        (value, false)
    }
}

/// Reduced Wong-Wang (Deco 2014) E/I neural-mass model
#[derive(Debug, Clone, Copy, Default)]
pub struct ReducedWongWang;

impl ReducedWongWang {
    pub fn new() -> Self {
        Self
    }

    /// Excitatory input current
    #[inline(always)]
    pub fn excitatory_current<T: Real>(
        k: &ModelConstants<T>,
        params: &RegionalParameters<T>,
        global_coupling: T,
        coupling: T,
        s_e: T,
        s_i: T,
    ) -> T {
        k.w_e_i0 + params.w_ee * s_e + global_coupling * k.j_nmda * coupling
            - params.w_ie * s_i
            + k.i_ext
    }

    /// Inhibitory input current
    #[inline(always)]
    pub fn inhibitory_current<T: Real>(
        k: &ModelConstants<T>,
        params: &RegionalParameters<T>,
        s_e: T,
        s_i: T,
    ) -> T {
        k.w_i_i0 + params.w_ei * s_e - k.w_ii * s_i
    }
}

impl<T: Real> NeuralMassModel<T> for ReducedWongWang {
    type Parameters = RegionalParameters<T>;
    type Step = RegionStep<T>;

    fn model_name(&self) -> &'static str {
        "Reduced Wong-Wang E/I (rWW)"
    }

    #[inline(always)]
    fn step_region(
        &self,
        k: &ModelConstants<T>,
        params: &RegionalParameters<T>,
        global_coupling: T,
        coupling: T,
        gating: (T, T),
        noise: (T, T),
    ) -> RegionStep<T> {
        let (s_e, s_i) = gating;

        let i_e = Self::excitatory_current(k, params, global_coupling, coupling, s_e, s_i);
        let i_i = Self::inhibitory_current(k, params, s_e, s_i);

        let r_e = transfer_function(k.a_e * i_e - k.b_e, k.d_e, k.singular_threshold);
        let r_i = transfer_function(k.a_i * i_i - k.b_i, k.d_i, k.singular_threshold);

        let ds_e = -s_e * k.inv_tau_e + (T::one() - s_e) * k.gamma_e * r_e;
        let ds_i = -s_i * k.inv_tau_i + k.gamma_i * r_i;

        let (s_e_next, clamped_e) =
            clamp_unit(s_e + k.dt * ds_e + k.sigma_sqrt_dt * noise.0);
        let (s_i_next, clamped_i) =
            clamp_unit(s_i + k.dt * ds_i + k.sigma_sqrt_dt * noise.1);

        RegionStep {
            i_e,
            i_i,
            r_e,
            r_i,
            s_e: s_e_next,
            s_i: s_i_next,
            clamped_e,
            clamped_i,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BaseParameters;
    use crate::types::DivergenceKind;

    fn constants() -> ModelConstants<f64> {
        ModelConstants::derive(&BaseParameters::default()).unwrap()
    }

    #[test]
    fn test_transfer_function_continuous_at_singularity() {
        let d: f64 = 0.16;
        let below = transfer_function(0.99e-4, d, 1e-4);
        let above = transfer_function(1.01e-4, d, 1e-4);
        assert!((below - above).abs() < 1e-8);
        assert!((transfer_function(0.0, d, 1e-4) - 1.0 / d).abs() < 1e-12);
    }

    #[test]
    fn test_transfer_function_f32_threshold() {
        let r = transfer_function(0.0f32, 0.087, 1e-2);
        assert!((r - 1.0 / 0.087).abs() < 1e-3);
    }

    #[test]
    fn test_isolated_region_holds_steady_state() {
        let k = constants();
        let model = ReducedWongWang::new();
        let params = RegionalParameters::<f64>::default();
        let s = (k.steady.s_e, k.steady.s_i);

        let step = model.step_region(&k, &params, 0.5, 0.0, s, (0.0, 0.0));
        assert!((step.r_e - k.steady.r_e).abs() < 1e-6);
        assert!((step.r_i - k.steady.r_i).abs() < 1e-6);
        assert!((step.s_e - s.0).abs() < 1e-9);
        assert!((step.s_i - s.1).abs() < 1e-9);
        assert!(!step.clamped());
    }

    #[test]
    fn test_gating_clamped_into_unit_interval() {
        let k = constants();
        let model = ReducedWongWang::new();
        let params = RegionalParameters::<f64>::default();

        let up = model.step_region(&k, &params, 0.0, 0.0, (0.999, 0.5), (1e4, 0.0));
        assert_eq!(up.s_e, 1.0);
        assert!(up.clamped_e);

        let down = model.step_region(&k, &params, 0.0, 0.0, (0.01, 0.001), (0.0, -1e4));
        assert_eq!(down.s_i, 0.0);
        assert!(down.clamped_i);
    }

    #[test]
    fn test_non_finite_coupling_reported() {
        let k = constants();
        let model = ReducedWongWang::new();
        let params = RegionalParameters::<f64>::default();

        let step = model.step_region(&k, &params, 0.5, f64::NAN, (0.1, 0.1), (0.0, 0.0));
        let violation = step.check_finite().unwrap_err();
        assert_eq!(violation.quantity, "I_E");
        assert_eq!(violation.kind, DivergenceKind::NonFinite);
    }

    #[test]
    fn test_regional_parameters_validation() {
        assert!(RegionalParameters::<f64>::default().validate().is_ok());
        let bad = RegionalParameters {
            w_ee: -0.1,
            ..RegionalParameters::<f64>::default()
        };
        assert!(bad.validate().is_err());
        let negative_w_ie = RegionalParameters {
            w_ie: -0.5,
            ..RegionalParameters::<f64>::default()
        };
        assert!(negative_w_ie.validate().is_ok());
        assert_eq!(RegionalParameters::<f64>::parameter_count(), 3);
    }
}
