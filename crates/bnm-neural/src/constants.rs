// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Model Constants
//!
//! `BaseParameters` holds the physical constants of the reduced Wong-Wang
//! model and the Balloon-Windkessel model exactly as they are written in the
//! literature (time constants in seconds, kinetic rates per second).
//! `ModelConstants<T>` is derived from them once per parameter set and holds
//! every quantity the integration loop needs, already converted to
//! milliseconds and to the run precision:
//!
//! ```text
//! BaseParameters (f64, seconds) ──derive()──► ModelConstants<T> (ms, T)
//!                                               ├─ dt, √dt, dt/τ, dt·γ, σ√dt
//!                                               ├─ w_E·I_0, w_I·I_0
//!                                               ├─ SteadyState (f64, seconds)
//!                                               └─ HemodynamicConstants<T>
//! ```
//!
//! Steady-state references are solved here (bisection with a fixed iteration
//! count) so the result is bit-reproducible for identical inputs.

use serde::{Deserialize, Serialize};

use crate::models::rww::transfer_function;
use crate::types::{ModelError, Real, Result};

/// Iterations used by every steady-state bisection
pub const BISECTION_ITERATIONS: u32 = 200;

/// Balloon-Windkessel BOLD coefficient set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "preset", rename_all = "snake_case")]
pub enum HemodynamicPreset {
    /// k1 = 7ρ, k2 = 2, k3 = 2ρ − 0.2
    #[default]
    Friston2003,
    /// Field-strength dependent 3 T coefficients:
    /// k1 = 4.3·ϑ0·ρ·TE, k2 = ε·r0·ρ·TE, k3 = 1 − ε
    #[serde(rename = "heinzle2016_3t")]
    Heinzle2016ThreeTesla,
    /// Explicit coefficients
    Custom { k1: f64, k2: f64, k3: f64 },
}

impl HemodynamicPreset {
    /// Resolve (k1, k2, k3) for a resting oxygen extraction fraction `rho`
    pub fn coefficients(&self, rho: f64) -> (f64, f64, f64) {
        match *self {
            HemodynamicPreset::Friston2003 => (7.0 * rho, 2.0, 2.0 * rho - 0.2),
            HemodynamicPreset::Heinzle2016ThreeTesla => {
                const FIELD_T: f64 = 3.0;
                const ECHO_TIME_S: f64 = 0.03;
                const INTRAVASCULAR_RELAXATION_HZ: f64 = 110.0;
                const VASCULAR_SIGNAL_RATIO: f64 = 0.47;
                let frequency_offset = 28.265 * FIELD_T;
                (
                    4.3 * frequency_offset * rho * ECHO_TIME_S,
                    VASCULAR_SIGNAL_RATIO * INTRAVASCULAR_RELAXATION_HZ * rho * ECHO_TIME_S,
                    1.0 - VASCULAR_SIGNAL_RATIO,
                )
            }
            HemodynamicPreset::Custom { k1, k2, k3 } => (k1, k2, k3),
        }
    }
}

/// Balloon-Windkessel physical constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HemodynamicParameters {
    /// Resting oxygen extraction fraction
    pub rho: f64,
    /// Grubb's exponent
    pub alpha: f64,
    /// Hemodynamic transit time (s)
    pub tau: f64,
    /// Rate of flow-dependent elimination (1/s)
    pub gamma: f64,
    /// Rate of signal decay (1/s)
    pub kappa: f64,
    /// Resting blood volume fraction
    pub v0: f64,
    /// Integration step (s)
    pub bw_dt_s: f64,
    pub preset: HemodynamicPreset,
}

impl Default for HemodynamicParameters {
    fn default() -> Self {
        Self {
            rho: 0.34,
            alpha: 0.32,
            tau: 0.98,
            gamma: 1.0 / 0.41,
            kappa: 1.0 / 0.65,
            v0: 0.02,
            bw_dt_s: 0.001,
            preset: HemodynamicPreset::Friston2003,
        }
    }
}

/// Physical constants of the reduced Wong-Wang E/I model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseParameters {
    /// Neural integration step (ms)
    pub dt_ms: f64,
    /// NMDA coupling scale
    pub j_nmda: f64,
    pub a_e: f64,
    pub b_e: f64,
    pub d_e: f64,
    pub a_i: f64,
    pub b_i: f64,
    pub d_i: f64,
    /// Excitatory kinetic rate (1/s)
    pub gamma_e_s: f64,
    /// Inhibitory kinetic rate (1/s)
    pub gamma_i_s: f64,
    /// Excitatory gating time constant (s)
    pub tau_e_s: f64,
    /// Inhibitory gating time constant (s)
    pub tau_i_s: f64,
    /// Noise amplitude (nA)
    pub sigma: f64,
    /// Baseline input current (nA)
    pub i_0: f64,
    pub w_e: f64,
    pub w_i: f64,
    pub w_ii: f64,
    /// External input current (nA)
    pub i_ext: f64,
    /// Target excitatory firing rate used by FIC (Hz)
    pub target_rate_e: f64,
    /// `w_EI` at which the inhibitory steady state is referenced
    pub reference_w_ei: f64,
    pub hemodynamics: HemodynamicParameters,
}

impl Default for BaseParameters {
    fn default() -> Self {
        Self {
            dt_ms: 0.1,
            j_nmda: 0.15,
            a_e: 310.0,
            b_e: 125.0,
            d_e: 0.16,
            a_i: 615.0,
            b_i: 177.0,
            d_i: 0.087,
            gamma_e_s: 0.641,
            gamma_i_s: 1.0,
            tau_e_s: 0.1,
            tau_i_s: 0.01,
            sigma: 0.01,
            i_0: 0.382,
            w_e: 1.0,
            w_i: 0.7,
            w_ii: 1.0,
            i_ext: 0.0,
            target_rate_e: 3.0773270642,
            reference_w_ei: 0.15,
            hemodynamics: HemodynamicParameters::default(),
        }
    }
}

impl BaseParameters {
    /// Reject non-positive time constants, step sizes, gains and rates
    pub fn validate(&self) -> Result<()> {
        let strictly_positive = [
            ("dt_ms", self.dt_ms),
            ("a_e", self.a_e),
            ("d_e", self.d_e),
            ("a_i", self.a_i),
            ("d_i", self.d_i),
            ("gamma_e_s", self.gamma_e_s),
            ("gamma_i_s", self.gamma_i_s),
            ("tau_e_s", self.tau_e_s),
            ("tau_i_s", self.tau_i_s),
            ("target_rate_e", self.target_rate_e),
            ("hemodynamics.alpha", self.hemodynamics.alpha),
            ("hemodynamics.tau", self.hemodynamics.tau),
            ("hemodynamics.gamma", self.hemodynamics.gamma),
            ("hemodynamics.kappa", self.hemodynamics.kappa),
            ("hemodynamics.v0", self.hemodynamics.v0),
            ("hemodynamics.bw_dt_s", self.hemodynamics.bw_dt_s),
        ];
        for (name, value) in strictly_positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ModelError::invalid_parameter(
                    name,
                    format!("must be finite and > 0, got {value}"),
                ));
            }
        }

        let non_negative = [
            ("j_nmda", self.j_nmda),
            ("sigma", self.sigma),
            ("w_e", self.w_e),
            ("w_i", self.w_i),
            ("w_ii", self.w_ii),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ModelError::invalid_parameter(
                    name,
                    format!("must be finite and >= 0, got {value}"),
                ));
            }
        }

        for (name, value) in [
            ("b_e", self.b_e),
            ("b_i", self.b_i),
            ("i_0", self.i_0),
            ("i_ext", self.i_ext),
            ("reference_w_ei", self.reference_w_ei),
        ] {
            if !value.is_finite() {
                return Err(ModelError::invalid_parameter(name, "must be finite"));
            }
        }

        let rho = self.hemodynamics.rho;
        if !(rho > 0.0 && rho < 1.0) {
            return Err(ModelError::invalid_parameter(
                "hemodynamics.rho",
                format!("must lie in (0, 1), got {rho}"),
            ));
        }

        let (k1, k2, k3) = self.hemodynamics.preset.coefficients(rho);
        if !(k1.is_finite() && k2.is_finite() && k3.is_finite()) {
            return Err(ModelError::invalid_parameter(
                "hemodynamics.preset",
                "k1, k2 and k3 must be finite",
            ));
        }

        Ok(())
    }
}

/// Steady-state references (always f64, seconds-valued kinetics)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SteadyState {
    pub r_e: f64,
    pub r_i: f64,
    pub i_e: f64,
    pub i_i: f64,
    pub s_e: f64,
    pub s_i: f64,
    pub tau_e_s: f64,
    pub tau_i_s: f64,
    pub gamma_e_s: f64,
    pub gamma_i_s: f64,
}

/// Precomputed Balloon-Windkessel coefficients
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HemodynamicConstants<T: Real> {
    /// Step (s)
    pub bw_dt: T,
    pub rho: T,
    pub alpha: T,
    pub tau: T,
    pub gamma: T,
    pub kappa: T,
    pub v0: T,
    pub k1: T,
    pub k2: T,
    pub k3: T,
    pub inv_alpha: T,
    pub inv_tau: T,
    pub one_minus_rho: T,
    pub bw_dt_over_tau: T,
    pub v0_k1: T,
    pub v0_k2: T,
    pub v0_k3: T,
}

impl<T: Real> HemodynamicConstants<T> {
    fn derive(p: &HemodynamicParameters) -> Self {
        let (k1, k2, k3) = p.preset.coefficients(p.rho);
        let c = T::from_real;
        Self {
            bw_dt: c(p.bw_dt_s),
            rho: c(p.rho),
            alpha: c(p.alpha),
            tau: c(p.tau),
            gamma: c(p.gamma),
            kappa: c(p.kappa),
            v0: c(p.v0),
            k1: c(k1),
            k2: c(k2),
            k3: c(k3),
            inv_alpha: c(1.0 / p.alpha),
            inv_tau: c(1.0 / p.tau),
            one_minus_rho: c(1.0 - p.rho),
            bw_dt_over_tau: c(p.bw_dt_s / p.tau),
            v0_k1: c(p.v0 * k1),
            v0_k2: c(p.v0 * k2),
            v0_k3: c(p.v0 * k3),
        }
    }
}

/// Everything the integration loop reads, derived once per parameter set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConstants<T: Real> {
    /// Step (ms)
    pub dt: T,
    pub sqrt_dt: T,
    pub j_nmda: T,
    pub a_e: T,
    pub b_e: T,
    pub d_e: T,
    pub a_i: T,
    pub b_i: T,
    pub d_i: T,
    /// Kinetic rates (1/ms)
    pub gamma_e: T,
    pub gamma_i: T,
    /// Time constants (ms)
    pub tau_e: T,
    pub tau_i: T,
    pub inv_tau_e: T,
    pub inv_tau_i: T,
    pub sigma: T,
    pub i_0: T,
    pub w_e: T,
    pub w_i: T,
    pub w_ii: T,
    pub i_ext: T,
    pub w_e_i0: T,
    pub w_i_i0: T,
    pub dt_over_tau_e: T,
    pub dt_over_tau_i: T,
    pub dt_gamma_e: T,
    pub dt_gamma_i: T,
    pub sigma_sqrt_dt: T,
    /// Series-expansion switch for the transfer function
    pub singular_threshold: T,
    pub steady: SteadyState,
    pub hemo: HemodynamicConstants<T>,
    /// Parameters these constants were derived from
    pub base: BaseParameters,
}

impl<T: Real> ModelConstants<T> {
    /// Derive all constants from `base`
    pub fn derive(base: &BaseParameters) -> Result<Self> {
        base.validate()?;

        let steady = solve_steady_state(base)?;
        let c = T::from_real;

        let tau_e_ms = base.tau_e_s * 1000.0;
        let tau_i_ms = base.tau_i_s * 1000.0;
        let gamma_e_ms = base.gamma_e_s / 1000.0;
        let gamma_i_ms = base.gamma_i_s / 1000.0;
        let sqrt_dt = base.dt_ms.sqrt();

        Ok(Self {
            dt: c(base.dt_ms),
            sqrt_dt: c(sqrt_dt),
            j_nmda: c(base.j_nmda),
            a_e: c(base.a_e),
            b_e: c(base.b_e),
            d_e: c(base.d_e),
            a_i: c(base.a_i),
            b_i: c(base.b_i),
            d_i: c(base.d_i),
            gamma_e: c(gamma_e_ms),
            gamma_i: c(gamma_i_ms),
            tau_e: c(tau_e_ms),
            tau_i: c(tau_i_ms),
            inv_tau_e: c(1.0 / tau_e_ms),
            inv_tau_i: c(1.0 / tau_i_ms),
            sigma: c(base.sigma),
            i_0: c(base.i_0),
            w_e: c(base.w_e),
            w_i: c(base.w_i),
            w_ii: c(base.w_ii),
            i_ext: c(base.i_ext),
            w_e_i0: c(base.w_e * base.i_0),
            w_i_i0: c(base.w_i * base.i_0),
            dt_over_tau_e: c(base.dt_ms / tau_e_ms),
            dt_over_tau_i: c(base.dt_ms / tau_i_ms),
            dt_gamma_e: c(base.dt_ms * gamma_e_ms),
            dt_gamma_i: c(base.dt_ms * gamma_i_ms),
            sigma_sqrt_dt: c(base.sigma * sqrt_dt),
            singular_threshold: T::singular_threshold(),
            steady,
            hemo: HemodynamicConstants::derive(&base.hemodynamics),
            base: *base,
        })
    }

    /// Neural steps per hemodynamic step
    pub fn steps_per_bw_step(&self) -> Result<u64> {
        steps_per_interval(self.base.hemodynamics.bw_dt_s * 1000.0, self.base.dt_ms, "bw_dt")
    }

    /// Neural steps per millisecond of simulated time
    pub fn steps_per_msec(&self) -> Result<u64> {
        steps_per_interval(1.0, self.base.dt_ms, "1 ms")
    }
}

/// Number of `step`-sized steps in `interval`, rejecting non-whole multiples
pub fn steps_per_interval(interval: f64, step: f64, what: &str) -> Result<u64> {
    if !(interval > 0.0 && step > 0.0) {
        return Err(ModelError::configuration(format!(
            "{what}: interval {interval} and step {step} must both be > 0"
        )));
    }
    let ratio = interval / step;
    let rounded = ratio.round();
    if rounded < 1.0 || (ratio - rounded).abs() > 1e-6 * rounded.max(1.0) {
        return Err(ModelError::configuration(format!(
            "{what} ({interval}) is not a whole multiple of the step ({step})"
        )));
    }
    Ok(rounded as u64)
}

/// Excitatory steady-state gating from a rate (Hz) and seconds-valued kinetics
pub fn excitatory_gating(rate: f64, tau_s: f64, gamma_s: f64) -> f64 {
    let rgt = rate * gamma_s * tau_s;
    rgt / (1.0 + rgt)
}

/// Deterministic bisection for a root of `f` on `[lo, hi]`.
///
/// Requires a sign change over the bracket.
pub fn bisect<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64, name: &str) -> Result<f64> {
    let mut f_lo = f(lo);
    let f_hi = f(hi);
    if !(f_lo.is_finite() && f_hi.is_finite()) || f_lo * f_hi > 0.0 {
        return Err(ModelError::invalid_parameter(
            name,
            format!("no root bracketed in [{lo}, {hi}]"),
        ));
    }
    if f_lo == 0.0 {
        return Ok(lo);
    }
    if f_hi == 0.0 {
        return Ok(hi);
    }
    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 {
            return Ok(mid);
        }
        if (f_mid < 0.0) == (f_lo < 0.0) {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// Current at which the transfer function `H(a·I − b)` reaches `rate`
pub fn invert_transfer(rate: f64, a: f64, b: f64, d: f64, name: &str) -> Result<f64> {
    if !(rate > 0.0) {
        return Err(ModelError::invalid_parameter(name, "rate must be > 0"));
    }
    // H is increasing in x = a·I − b; H(−50/d) ≈ 0 and H(x) ≥ x for x > 0
    let x_lo = -50.0 / d;
    let x_hi = rate + 1.0;
    let x = bisect(
        |x| transfer_function(x, d, 1e-4) - rate,
        x_lo,
        x_hi,
        name,
    )?;
    Ok((x + b) / a)
}

/// Solve the inhibitory self-consistency equation
///
/// `I_I = w_I·I_0 + w_EI·S_E − w_II·τ_I·γ_I·H_I(I_I)`
///
/// Returns `(I_I, r_I, S_I)`.
pub fn solve_inhibitory(base: &BaseParameters, w_ei: f64, s_e: f64) -> Result<(f64, f64, f64)> {
    let drive = base.w_i * base.i_0 + w_ei * s_e;
    let feedback = base.w_ii * base.tau_i_s * base.gamma_i_s;
    let h_i = |current: f64| transfer_function(base.a_i * current - base.b_i, base.d_i, 1e-4);

    // g is strictly decreasing; g(hi) <= 0 and g(lo) >= 1
    let hi = drive;
    let lo = drive - feedback * h_i(hi) - 1.0;
    let i_i = bisect(|i| drive - feedback * h_i(i) - i, lo, hi, "w_ei")?;
    let r_i = h_i(i_i);
    let s_i = base.tau_i_s * base.gamma_i_s * r_i;
    Ok((i_i, r_i, s_i))
}

fn solve_steady_state(base: &BaseParameters) -> Result<SteadyState> {
    let r_e = base.target_rate_e;
    let i_e = invert_transfer(r_e, base.a_e, base.b_e, base.d_e, "target_rate_e")?;
    let s_e = excitatory_gating(r_e, base.tau_e_s, base.gamma_e_s);
    let (i_i, r_i, s_i) = solve_inhibitory(base, base.reference_w_ei, s_e)?;

    Ok(SteadyState {
        r_e,
        r_i,
        i_e,
        i_i,
        s_e,
        s_i,
        tau_e_s: base.tau_e_s,
        tau_i_s: base.tau_i_s,
        gamma_e_s: base.gamma_e_s,
        gamma_i_s: base.gamma_i_s,
    })
}
