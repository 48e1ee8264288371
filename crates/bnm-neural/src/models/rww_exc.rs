// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Reduced Wong-Wang Excitatory Model (rWWEx)
//!
//! A single excitatory population per region (Deco 2013). No inhibitory
//! pool, so there is nothing for FIC to tune.
//!
//! ## Model Dynamics
//!
//! ```text
//! Input current:
//!     I = w·J_N·S + G·J_N·Σ_j W_ij·S_j + I_0 + I_ext
//!
//! Transfer function:
//!     r = H(a·I − b, d)           (same form as the E/I model)
//!
//! Gating (Euler–Maruyama, step h):
//!     S ← S + h(−S/τ + (1 − S)·γ·r) + σ√h·ξ
//!     clamp into [0, 1]
//! ```
//!
//! Only the first element of the gating and noise pairs passed through
//! `NeuralMassModel::step_region` is used.

use serde::{Deserialize, Serialize};

use super::rww::transfer_function;
use super::traits::{ModelParameters, NeuralMassModel};
use crate::constants::ModelConstants;
use crate::types::{Real, StateViolation};

/// Fixed constants of the excitatory-only model (time in ms)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReducedWongWangExc<T: Real> {
    pub a: T,
    pub b: T,
    pub d: T,
    /// NMDA coupling J_N (nA)
    pub j_n: T,
    /// Kinetic parameter γ (per ms)
    pub gamma: T,
    /// 1/τ (per ms)
    pub inv_tau: T,
}

impl<T: Real> Default for ReducedWongWangExc<T> {
    fn default() -> Self {
        Self {
            a: T::from_real(270.0),
            b: T::from_real(108.0),
            d: T::from_real(0.154),
            j_n: T::from_real(0.2609),
            gamma: T::from_real(0.641 / 1000.0),
            inv_tau: T::from_real(1.0 / 100.0),
        }
    }
}

impl<T: Real> ReducedWongWangExc<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input current of one region
    #[inline(always)]
    pub fn current(
        &self,
        k: &ModelConstants<T>,
        params: &ExcRegionalParameters<T>,
        global_coupling: T,
        coupling: T,
        s: T,
    ) -> T {
        params.w * self.j_n * s + global_coupling * self.j_n * coupling + params.i0 + k.i_ext
    }

    /// Gating that makes `dS/dt` vanish at rate `r`
    pub fn gating_at_rate(&self, r: T) -> T {
        let drive = self.gamma * r / self.inv_tau;
        drive / (T::one() + drive)
    }
}

/// Per-region parameters of the excitatory-only model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExcRegionalParameters<T: Real> {
    /// Local excitatory recurrence
    pub w: T,
    /// External input current (nA)
    pub i0: T,
    /// Noise amplitude
    pub sigma: T,
}

impl<T: Real> Default for ExcRegionalParameters<T> {
    fn default() -> Self {
        Self {
            w: T::from_real(0.9),
            i0: T::from_real(0.3),
            sigma: T::from_real(0.001),
        }
    }
}

impl<T: Real> ModelParameters for ExcRegionalParameters<T> {
    fn validate(&self) -> Result<(), &'static str> {
        if !(self.w.is_finite() && self.w >= T::zero()) {
            return Err("rWWEx: w must be finite and >= 0");
        }
        if !self.i0.is_finite() {
            return Err("rWWEx: I0 must be finite");
        }
        if !(self.sigma.is_finite() && self.sigma >= T::zero()) {
            return Err("rWWEx: sigma must be finite and >= 0");
        }
        Ok(())
    }

    fn parameter_count() -> usize {
        3 // w + I0 + sigma
    }
}

/// Result of advancing one excitatory-only region by one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcRegionStep<T: Real> {
    pub i: T,
    pub r: T,
    /// Next gating (clamped when finite)
    pub s: T,
    pub clamped: bool,
}

impl<T: Real> ExcRegionStep<T> {
    pub fn check_finite(&self) -> Result<(), StateViolation> {
        for (name, value) in [("I", self.i), ("r", self.r), ("S", self.s)] {
            if !value.is_finite() {
                return Err(StateViolation::non_finite(name, value.as_f64()));
            }
        }
        Ok(())
    }
}

impl<T: Real> NeuralMassModel<T> for ReducedWongWangExc<T> {
    type Parameters = ExcRegionalParameters<T>;
    type Step = ExcRegionStep<T>;

    fn model_name(&self) -> &'static str {
        "Reduced Wong-Wang excitatory (rWWEx)"
    }

    #[inline(always)]
    fn step_region(
        &self,
        k: &ModelConstants<T>,
        params: &ExcRegionalParameters<T>,
        global_coupling: T,
        coupling: T,
        gating: (T, T),
        noise: (T, T),
    ) -> ExcRegionStep<T> {
        let s = gating.0;
        let i = self.current(k, params, global_coupling, coupling, s);
        let r = transfer_function(self.a * i - self.b, self.d, k.singular_threshold);
        let ds = -s * self.inv_tau + (T::one() - s) * self.gamma * r;

        let next = s + k.dt * ds + params.sigma * k.sqrt_dt * noise.0;
        let (s_next, clamped) = if !next.is_finite() {
            (next, false)
        } else if next < T::zero() {
            (T::zero(), true)
        } else if next > T::one() {
            (T::one(), true)
        } else {
            (next, false)
        };

        ExcRegionStep {
            i,
            r,
            s: s_next,
            clamped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BaseParameters;

    fn constants() -> ModelConstants<f64> {
        ModelConstants::derive(&BaseParameters::default()).unwrap()
    }

    /// Noise-free trajectory of an uncoupled region
    fn settle(model: &ReducedWongWangExc<f64>, params: &ExcRegionalParameters<f64>, steps: usize) -> ExcRegionStep<f64> {
        let k = constants();
        let mut step = model.step_region(&k, params, 0.0, 0.0, (0.1, 0.0), (0.0, 0.0));
        for _ in 1..steps {
            step = model.step_region(&k, params, 0.0, 0.0, (step.s, 0.0), (0.0, 0.0));
        }
        step
    }

    #[test]
    fn test_uncoupled_region_settles_on_fixed_point() {
        let model = ReducedWongWangExc::<f64>::new();
        let params = ExcRegionalParameters::default();

        // 3 s of 0.1 ms steps
        let last = settle(&model, &params, 30_000);
        assert!(last.r > 0.0);
        assert!(!last.clamped);
        assert!((last.s - model.gating_at_rate(last.r)).abs() < 1e-6);
    }

    #[test]
    fn test_network_input_raises_rate() {
        let k = constants();
        let model = ReducedWongWangExc::<f64>::new();
        let params = ExcRegionalParameters::default();

        let alone = model.step_region(&k, &params, 0.5, 0.0, (0.2, 0.0), (0.0, 0.0));
        let driven = model.step_region(&k, &params, 0.5, 0.4, (0.2, 0.0), (0.0, 0.0));
        assert!(driven.i > alone.i);
        assert!(driven.r > alone.r);
        assert!((driven.i - alone.i - 0.5 * 0.2609 * 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_noise_scales_with_regional_sigma() {
        let k = constants();
        let model = ReducedWongWangExc::<f64>::new();
        let quiet = ExcRegionalParameters {
            sigma: 0.0,
            ..Default::default()
        };
        let noisy = ExcRegionalParameters {
            sigma: 0.01,
            ..Default::default()
        };

        let a = model.step_region(&k, &quiet, 0.0, 0.0, (0.2, 0.0), (1.0, 0.0));
        let b = model.step_region(&k, &noisy, 0.0, 0.0, (0.2, 0.0), (1.0, 0.0));
        assert!((b.s - a.s - 0.01 * 0.1f64.sqrt()).abs() < 1e-12);

        let clamped = model.step_region(&k, &noisy, 0.0, 0.0, (0.001, 0.0), (-1e4, 0.0));
        assert_eq!(clamped.s, 0.0);
        assert!(clamped.clamped);
    }

    #[test]
    fn test_non_finite_coupling_reported() {
        let k = constants();
        let model = ReducedWongWangExc::<f64>::new();
        let step = model.step_region(
            &k,
            &ExcRegionalParameters::default(),
            0.5,
            f64::NAN,
            (0.1, 0.0),
            (0.0, 0.0),
        );
        assert_eq!(step.check_finite().unwrap_err().quantity, "I");
    }

    #[test]
    fn test_exc_parameters_validation() {
        assert!(ExcRegionalParameters::<f64>::default().validate().is_ok());
        let bad = ExcRegionalParameters {
            sigma: -0.1,
            ..ExcRegionalParameters::<f64>::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!(ExcRegionalParameters::<f64>::parameter_count(), 3);
    }

    #[test]
    fn test_models_share_the_trait() {
        fn name<M: NeuralMassModel<f64>>(model: &M) -> &'static str {
            model.model_name()
        }
        assert_ne!(
            name(&ReducedWongWangExc::<f64>::new()),
            name(&crate::models::ReducedWongWang::new())
        );
    }
}
