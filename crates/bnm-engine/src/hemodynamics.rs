// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Hemodynamic Converter
//!
//! Runs the Balloon-Windkessel model for every region once per `bw_dt`
//! (every `bw_dt / dt` neural steps), driven by the excitatory gating
//! (default) or the excitatory rate, and exposes the current BOLD value.

use std::sync::Arc;

use bnm_neural::{BalloonState, BalloonWindkessel, ModelConstants, Real, Result};
use serde::{Deserialize, Serialize};

use crate::neural_dynamics::NodeStateArray;

/// Neural quantity fed into the hemodynamic model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HemodynamicDrive {
    /// `S_E`
    #[default]
    ExcitatoryGating,
    /// `r_E`
    ExcitatoryRate,
}

/// Hemodynamic state of every region, structure-of-arrays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HemodynamicArray<T: Real> {
    pub x: Vec<T>,
    pub f: Vec<T>,
    pub nu: Vec<T>,
    pub q: Vec<T>,
}

impl<T: Real> HemodynamicArray<T> {
    /// Baseline: `x = 0`, `f = nu = q = 1`
    pub fn baseline(n: usize) -> Self {
        let b = BalloonState::<T>::default();
        Self {
            x: vec![b.x; n],
            f: vec![b.f; n],
            nu: vec![b.nu; n],
            q: vec![b.q; n],
        }
    }

    #[inline(always)]
    fn get(&self, i: usize) -> BalloonState<T> {
        BalloonState {
            x: self.x[i],
            f: self.f[i],
            nu: self.nu[i],
            q: self.q[i],
        }
    }

    #[inline(always)]
    fn set(&mut self, i: usize, s: &BalloonState<T>) {
        self.x[i] = s.x;
        self.f[i] = s.f;
        self.nu[i] = s.nu;
        self.q[i] = s.q;
    }
}

/// Per-instance hemodynamic integrator
pub struct HemodynamicConverter<T: Real> {
    constants: Arc<ModelConstants<T>>,
    model: BalloonWindkessel,
    drive: HemodynamicDrive,
    state: HemodynamicArray<T>,
    bold: Vec<T>,
    steps: u64,
}

impl<T: Real> HemodynamicConverter<T> {
    pub fn new(constants: Arc<ModelConstants<T>>, n: usize, drive: HemodynamicDrive) -> Self {
        Self {
            constants,
            model: BalloonWindkessel::new(),
            drive,
            state: HemodynamicArray::baseline(n),
            bold: vec![T::zero(); n],
            steps: 0,
        }
    }

    /// Advance every region by one `bw_dt`; `neural_step` is used for error context
    pub fn step(&mut self, neural: &NodeStateArray<T>, neural_step: u64) -> Result<&[T]> {
        let drive = match self.drive {
            HemodynamicDrive::ExcitatoryGating => &neural.s_e,
            HemodynamicDrive::ExcitatoryRate => &neural.r_e,
        };
        let hemo = &self.constants.hemo;
        for (i, &u) in drive.iter().enumerate() {
            let next = self
                .model
                .step(hemo, &self.state.get(i), u)
                .map_err(|v| v.at(neural_step, i))?;
            self.bold[i] = self.model.bold(hemo, &next);
            self.state.set(i, &next);
        }
        self.steps += 1;
        Ok(&self.bold)
    }

    /// BOLD after the last step
    pub fn bold(&self) -> &[T] {
        &self.bold
    }

    pub fn state(&self) -> &HemodynamicArray<T> {
        &self.state
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnm_neural::{BaseParameters, DivergenceKind, ModelError};

    fn constants() -> Arc<ModelConstants<f64>> {
        Arc::new(ModelConstants::derive(&BaseParameters::default()).unwrap())
    }

    #[test]
    fn test_zero_drive_keeps_baseline() {
        let k = constants();
        let mut converter = HemodynamicConverter::new(k.clone(), 2, HemodynamicDrive::default());
        let mut neural = NodeStateArray::at_steady_state(2, &k);
        neural.s_e = vec![0.0; 2];
        for step in 0..100 {
            converter.step(&neural, step).unwrap();
        }
        for &b in converter.bold() {
            assert!(b.abs() < 1e-9);
        }
        assert_eq!(converter.steps_taken(), 100);
    }

    #[test]
    fn test_drive_selection() {
        let k = constants();
        let neural = NodeStateArray::at_steady_state(1, &k);
        let mut gating = HemodynamicConverter::new(k.clone(), 1, HemodynamicDrive::ExcitatoryGating);
        let mut rate = HemodynamicConverter::new(k, 1, HemodynamicDrive::ExcitatoryRate);
        gating.step(&neural, 0).unwrap();
        rate.step(&neural, 0).unwrap();
        // x after one step equals h·drive from baseline
        assert!((gating.state().x[0] - 0.001 * neural.s_e[0]).abs() < 1e-12);
        assert!((rate.state().x[0] - 0.001 * neural.r_e[0]).abs() < 1e-12);
    }

    #[test]
    fn test_divergence_carries_neural_step_and_region() {
        let k = constants();
        let mut converter = HemodynamicConverter::new(k.clone(), 2, HemodynamicDrive::default());
        let mut neural = NodeStateArray::at_steady_state(2, &k);
        neural.s_e[1] = f64::NAN;
        let err = converter.step(&neural, 90).unwrap_err();
        assert!(matches!(
            err,
            ModelError::NumericalDivergence {
                step: 90,
                region: 1,
                quantity: "x",
                kind: DivergenceKind::NonFinite,
                ..
            }
        ));
    }
}
