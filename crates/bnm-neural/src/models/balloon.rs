// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Balloon-Windkessel Hemodynamic Model
//!
//! ```text
//! x  ← x  + h(drive − κ·x − γ(f − 1))
//! f  ← f  + h·x
//! nu ← nu + (h/τ)(f − nu^{1/α})
//! q  ← q  + (h/τ)(f(1 − (1 − ρ)^{1/f})/ρ − nu^{1/α}·q/nu)
//!
//! BOLD = V_0·k1·(1 − q) + V_0·k2·(1 − q/nu) + V_0·k3·(1 − nu)
//! ```
//!
//! Every right-hand side reads the previous step's values.

use serde::Serialize;

use crate::constants::HemodynamicConstants;
use crate::types::{Real, StateViolation};

/// Hemodynamic state of one region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BalloonState<T: Real> {
    /// Vasodilatory (flow-inducing) signal
    pub x: T,
    /// Blood inflow
    pub f: T,
    /// Blood volume
    pub nu: T,
    /// Deoxyhemoglobin content
    pub q: T,
}

impl<T: Real> Default for BalloonState<T> {
    fn default() -> Self {
        Self {
            x: T::zero(),
            f: T::one(),
            nu: T::one(),
            q: T::one(),
        }
    }
}

/// Explicit-Euler Balloon-Windkessel integrator
#[derive(Debug, Clone, Copy, Default)]
pub struct BalloonWindkessel;

impl BalloonWindkessel {
    pub fn new() -> Self {
        Self
    }

    /// Advance one hemodynamic step
    #[inline]
    pub fn step<T: Real>(
        &self,
        hemo: &HemodynamicConstants<T>,
        state: &BalloonState<T>,
        drive: T,
    ) -> Result<BalloonState<T>, StateViolation> {
        let BalloonState { x, f, nu, q } = *state;
        let h = hemo.bw_dt;
        let one = T::one();

        let nu_pow = nu.powf(hemo.inv_alpha);
        let extraction = one - hemo.one_minus_rho.powf(one / f);

        let next = BalloonState {
            x: x + h * (drive - hemo.kappa * x - hemo.gamma * (f - one)),
            f: f + h * x,
            nu: nu + hemo.bw_dt_over_tau * (f - nu_pow),
            q: q + hemo.bw_dt_over_tau * (f * extraction / hemo.rho - nu_pow * q / nu),
        };
        next.check()?;
        Ok(next)
    }

    /// BOLD signal of a state
    #[inline]
    pub fn bold<T: Real>(&self, hemo: &HemodynamicConstants<T>, state: &BalloonState<T>) -> T {
        let one = T::one();
        hemo.v0_k1 * (one - state.q)
            + hemo.v0_k2 * (one - state.q / state.nu)
            + hemo.v0_k3 * (one - state.nu)
    }
}

impl<T: Real> BalloonState<T> {
    fn check(&self) -> Result<(), StateViolation> {
        let quantities = [("x", self.x), ("f", self.f), ("nu", self.nu), ("q", self.q)];
        for (name, value) in quantities {
            if !value.is_finite() {
                return Err(StateViolation::non_finite(name, value.as_f64()));
            }
        }
        for (name, value) in &quantities[1..] {
            if *value <= T::zero() {
                return Err(StateViolation::non_positive(name, value.as_f64()));
            }
        }
        Ok(())
    }
}
