// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Feedback Inhibition Control (FIC)
//!
//! Tunes `w_IE` per region so the excitatory rate sits at the steady-state
//! target `r_E_ss`.
//!
//! ## Analytic
//! ```text
//! S_I  from  I_I = w_I·I_0 + w_EI·S_E_ss − w_II·τ_I·γ_I·H_I(I_I)
//! w_IE = (w_E·I_0 + w_EE·S_E_ss + G·J_NMDA·S_E_ss·Σ_j W_ij + I_ext − I_E_ss) / S_I
//! ```
//!
//! ## Numerical (per-region state machine)
//! ```text
//!            ┌──────────── |rate − target| ≤ tol ──────────► Converged
//! Searching ─┤
//!            ├──────────── trials == max_trials ───────────► Failed
//!            └─ rate > target → w += step, else w −= step
//!               (step halves first when the direction reverses)
//! ```
//! Every trial is a whole-network sub-simulation in scratch state, starting
//! from the steady-state references, with its own noise stream
//! (`FIC_STREAM_BASE + trial`). Converged regions keep their weight frozen
//! while the others continue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bnm_neural::constants::{solve_inhibitory, steps_per_interval};
use bnm_neural::{InstanceId, ModelConstants, ModelError, Real, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connectome::Connectome;
use crate::error::{InstanceContext, SimulationError};
use crate::neural_dynamics::{NeuralIntegrator, RegionalWeights};
use crate::noise::{NoiseSettings, NoiseSource, FIC_STREAM_BASE};

/// How `w_IE` is determined before the main run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FicMode {
    /// Caller-supplied `w_IE` is used unchanged
    Disabled,
    /// Closed-form weights only
    Analytic,
    /// Analytic start, then simulate-and-adjust
    #[default]
    Numerical,
}

/// FIC configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FicSettings {
    pub mode: FicMode,
    pub max_trials: u32,
    /// Initial search step for `w_IE`
    pub initial_delta: f64,
    /// Accepted |mean r_E − target| (Hz)
    pub tolerance_hz: f64,
    pub trial_duration_ms: f64,
    /// Rate averaging window `[start, end)` within a trial (ms)
    pub sampling_start_ms: f64,
    pub sampling_end_ms: f64,
    /// Log every trial at `info` instead of `debug`
    pub verbose: bool,
}

impl Default for FicSettings {
    fn default() -> Self {
        Self {
            mode: FicMode::Numerical,
            max_trials: 5,
            initial_delta: 0.02,
            tolerance_hz: 1.0,
            trial_duration_ms: 10_000.0,
            sampling_start_ms: 1_000.0,
            sampling_end_ms: 10_000.0,
            verbose: false,
        }
    }
}

impl FicSettings {
    /// Check numerical-mode settings against the step size
    pub fn validate(&self, dt_ms: f64) -> Result<()> {
        if self.mode != FicMode::Numerical {
            return Ok(());
        }
        if self.max_trials < 1 {
            return Err(ModelError::configuration(
                "fic.max_trials must be >= 1 when numerical FIC is enabled",
            ));
        }
        if !(self.initial_delta.is_finite() && self.initial_delta > 0.0) {
            return Err(ModelError::configuration("fic.initial_delta must be > 0"));
        }
        if !(self.tolerance_hz.is_finite() && self.tolerance_hz >= 0.0) {
            return Err(ModelError::configuration("fic.tolerance_hz must be >= 0"));
        }
        let (start, end) = self.window_steps(dt_ms)?;
        let trial = steps_per_interval(self.trial_duration_ms, dt_ms, "fic.trial_duration_ms")?;
        if start >= end || end > trial {
            return Err(ModelError::configuration(format!(
                "FIC sampling window [{}, {}) ms must be non-empty and lie within the {} ms trial",
                self.sampling_start_ms, self.sampling_end_ms, self.trial_duration_ms
            )));
        }
        Ok(())
    }

    /// Sampling window in steps: `[start, end)`
    pub fn window_steps(&self, dt_ms: f64) -> Result<(u64, u64)> {
        let start = if self.sampling_start_ms == 0.0 {
            0
        } else {
            steps_per_interval(self.sampling_start_ms, dt_ms, "fic.sampling_start_ms")?
        };
        let end = steps_per_interval(self.sampling_end_ms, dt_ms, "fic.sampling_end_ms")?;
        Ok((start, end))
    }
}

/// Phase of one region's search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Searching,
    Converged,
    Failed,
}

/// Direction of the last weight move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// Damped-bisection search state of one region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSearch {
    weight: f64,
    step: f64,
    last_direction: Option<Direction>,
    trials: u32,
    phase: SearchPhase,
    last_rate: Option<f64>,
}

impl RegionSearch {
    pub fn new(initial_weight: f64, initial_delta: f64) -> Self {
        Self {
            weight: initial_weight,
            step: initial_delta,
            last_direction: None,
            trials: 0,
            phase: SearchPhase::Searching,
            last_rate: None,
        }
    }

    /// Feed the mean rate measured with the current weight.
    ///
    /// Frozen regions (converged or failed) ignore further observations.
    pub fn observe(&mut self, rate: f64, target: f64, tolerance: f64, max_trials: u32) -> SearchPhase {
        if self.phase != SearchPhase::Searching {
            return self.phase;
        }
        self.trials += 1;
        self.last_rate = Some(rate);

        if (rate - target).abs() <= tolerance {
            self.phase = SearchPhase::Converged;
        } else if self.trials >= max_trials {
            self.phase = SearchPhase::Failed;
        } else {
            let direction = if rate > target {
                Direction::Up
            } else {
                Direction::Down
            };
            if self.last_direction.is_some_and(|last| last != direction) {
                self.step *= 0.5;
            }
            match direction {
                Direction::Up => self.weight += self.step,
                Direction::Down => self.weight -= self.step,
            }
            self.last_direction = Some(direction);
        }
        self.phase
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn trials(&self) -> u32 {
        self.trials
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }
}

/// Weights used and rates measured in one numerical trial
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FicTrialRecord {
    pub trial: u32,
    pub weights: Vec<f64>,
    pub rates: Vec<f64>,
}

/// Outcome of the FIC phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FicReport {
    pub mode: FicMode,
    /// Final `w_IE` per region
    pub weights: Vec<f64>,
    /// Per-region phase (numerical mode only)
    pub phases: Vec<SearchPhase>,
    /// Trials run (0 for analytic)
    pub trials: u32,
    /// Rate measured in each region's last trial (numerical mode only)
    pub measured_rates: Vec<f64>,
    /// Regions whose analytic weight is negative
    pub unstable_regions: Vec<usize>,
    pub failed_regions: Vec<usize>,
    pub history: Vec<FicTrialRecord>,
}

impl FicReport {
    pub fn unstable(&self) -> bool {
        !self.unstable_regions.is_empty()
    }

    pub fn failed(&self) -> bool {
        !self.failed_regions.is_empty()
    }
}

/// Closed-form `w_IE` for every region
pub fn analytic_weights<T: Real>(
    constants: &ModelConstants<T>,
    connectome: &Connectome,
    global_coupling: f64,
    w_ee: &[f64],
    w_ei: &[f64],
) -> Result<Vec<f64>> {
    let base = &constants.base;
    let ss = &constants.steady;
    let n = connectome.n_regions();
    if w_ee.len() != n || w_ei.len() != n {
        return Err(ModelError::invalid_parameter(
            "regional weights",
            format!("expected {n} regions"),
        ));
    }

    (0..n)
        .map(|i| {
            let s_i = if w_ei[i] == base.reference_w_ei {
                ss.s_i
            } else {
                solve_inhibitory(base, w_ei[i], ss.s_e)?.2
            };
            let numerator = base.w_e * base.i_0
                + w_ee[i] * ss.s_e
                + global_coupling * base.j_nmda * ss.s_e * connectome.in_strength(i)
                + base.i_ext
                - ss.i_e;
            Ok(numerator / s_i)
        })
        .collect()
}

/// Runs analytic and numerical FIC for one instance
pub struct FicController<T: Real> {
    constants: Arc<ModelConstants<T>>,
    connectome: Arc<Connectome>,
    settings: FicSettings,
    noise: NoiseSettings,
    sync_msec: bool,
    velocity: Option<f64>,
}

impl<T: Real> FicController<T> {
    pub fn new(
        constants: Arc<ModelConstants<T>>,
        connectome: Arc<Connectome>,
        settings: FicSettings,
        noise: NoiseSettings,
        sync_msec: bool,
    ) -> Self {
        Self {
            constants,
            connectome,
            settings,
            noise,
            sync_msec,
            velocity: None,
        }
    }

    /// Conduction velocity for trials on a connectome with distances
    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Determine `w_IE`; `None` when FIC is disabled
    pub fn run(
        &self,
        instance: InstanceId,
        global_coupling: f64,
        w_ee: &[f64],
        w_ei: &[f64],
        cancel: &AtomicBool,
    ) -> std::result::Result<Option<FicReport>, SimulationError> {
        if self.settings.mode == FicMode::Disabled {
            return Ok(None);
        }
        self.settings
            .validate(self.constants.base.dt_ms)
            .for_instance(instance)?;

        let initial = analytic_weights(&self.constants, &self.connectome, global_coupling, w_ee, w_ei)
            .for_instance(instance)?;
        let unstable_regions: Vec<usize> = initial
            .iter()
            .enumerate()
            .filter(|(_, &w)| w < 0.0)
            .map(|(i, _)| i)
            .collect();
        if !unstable_regions.is_empty() {
            warn!(
                target: "bnm-engine",
                "[FIC] {}: analytic w_IE is negative in {} region(s): {:?}",
                instance,
                unstable_regions.len(),
                unstable_regions
            );
        }

        if self.settings.mode == FicMode::Analytic {
            return Ok(Some(FicReport {
                mode: FicMode::Analytic,
                weights: initial,
                phases: Vec::new(),
                trials: 0,
                measured_rates: Vec::new(),
                unstable_regions,
                failed_regions: Vec::new(),
                history: Vec::new(),
            }));
        }

        self.search(instance, global_coupling, w_ee, w_ei, initial, unstable_regions, cancel)
            .map(Some)
    }

    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        instance: InstanceId,
        global_coupling: f64,
        w_ee: &[f64],
        w_ei: &[f64],
        initial: Vec<f64>,
        unstable_regions: Vec<usize>,
        cancel: &AtomicBool,
    ) -> std::result::Result<FicReport, SimulationError> {
        let target = self.constants.steady.r_e;
        let s = &self.settings;
        let mut searches: Vec<RegionSearch> = initial
            .iter()
            .map(|&w| RegionSearch::new(w, s.initial_delta))
            .collect();
        let mut weights =
            RegionalWeights::<T>::from_f64(w_ee, w_ei, &initial).for_instance(instance)?;
        let mut history = Vec::new();
        let mut trial = 0u32;

        while searches.iter().any(|r| r.phase() == SearchPhase::Searching) {
            let trial_weights: Vec<f64> = searches.iter().map(|r| r.weight()).collect();
            for (i, &w) in trial_weights.iter().enumerate() {
                weights.set_w_ie(i, w);
            }

            let rates = self.run_trial(instance, trial, global_coupling, &weights, cancel)?;
            for (search, &rate) in searches.iter_mut().zip(&rates) {
                search.observe(rate, target, s.tolerance_hz, s.max_trials);
            }

            let converged = count_phase(&searches, SearchPhase::Converged);
            let failed = count_phase(&searches, SearchPhase::Failed);
            let searching = searches.len() - converged - failed;
            if s.verbose {
                info!(
                    target: "bnm-engine",
                    "[FIC] {} trial {}: {} searching, {} converged, {} failed",
                    instance, trial, searching, converged, failed
                );
            } else {
                debug!(
                    target: "bnm-engine",
                    "[FIC] {} trial {}: {} searching, {} converged, {} failed",
                    instance, trial, searching, converged, failed
                );
            }

            history.push(FicTrialRecord {
                trial,
                weights: trial_weights,
                rates,
            });
            trial += 1;
        }

        let failed_regions: Vec<usize> = searches
            .iter()
            .enumerate()
            .filter(|(_, r)| r.phase() == SearchPhase::Failed)
            .map(|(i, _)| i)
            .collect();
        if !failed_regions.is_empty() {
            warn!(
                target: "bnm-engine",
                "[FIC] {}: no convergence after {} trial(s) in {} region(s): {:?}",
                instance,
                trial,
                failed_regions.len(),
                failed_regions
            );
        }

        Ok(FicReport {
            mode: FicMode::Numerical,
            weights: searches.iter().map(|r| r.weight()).collect(),
            phases: searches.iter().map(|r| r.phase()).collect(),
            trials: trial,
            measured_rates: searches
                .iter()
                .map(|r| r.last_rate().unwrap_or(f64::NAN))
                .collect(),
            unstable_regions,
            failed_regions,
            history,
        })
    }

    /// Mean `r_E` per region over the sampling window of trial `trial`
    fn run_trial(
        &self,
        instance: InstanceId,
        trial: u32,
        global_coupling: f64,
        weights: &RegionalWeights<T>,
        cancel: &AtomicBool,
    ) -> std::result::Result<Vec<f64>, SimulationError> {
        let dt_ms = self.constants.base.dt_ms;
        let n = self.connectome.n_regions();
        let (start, end) = self.settings.window_steps(dt_ms).for_instance(instance)?;

        let mut integrator = NeuralIntegrator::with_conduction(
            self.constants.clone(),
            &self.connectome,
            global_coupling,
            self.velocity,
            self.sync_msec,
        )
        .for_instance(instance)?;
        let mut noise = NoiseSource::new(&self.noise, FIC_STREAM_BASE + trial as u64, n, dt_ms)
            .for_instance(instance)?;

        let mut sums = vec![0.0f64; n];
        // Steps after the window cannot change the measurement
        for step in 0..end {
            if cancel.load(Ordering::Relaxed) {
                return Err(SimulationError::Cancelled { instance, step });
            }
            integrator.step(weights, &mut noise).for_instance(instance)?;
            if step >= start {
                for (sum, &r) in sums.iter_mut().zip(&integrator.state().r_e) {
                    *sum += r.as_f64();
                }
            }
        }

        let samples = (end - start) as f64;
        Ok(sums.into_iter().map(|s| s / samples).collect())
    }
}

fn count_phase(searches: &[RegionSearch], phase: SearchPhase) -> usize {
    searches.iter().filter(|r| r.phase() == phase).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnm_neural::BaseParameters;
    use ndarray::array;

    fn constants() -> Arc<ModelConstants<f64>> {
        Arc::new(ModelConstants::derive(&BaseParameters::default()).unwrap())
    }

    // ===========================================================================
    // RegionSearch state machine
    // ===========================================================================

    #[test]
    fn test_converges_when_within_tolerance() {
        let mut search = RegionSearch::new(1.0, 0.02);
        assert_eq!(search.observe(3.2, 3.0, 0.5, 5), SearchPhase::Converged);
        assert_eq!(search.weight(), 1.0);
        assert_eq!(search.trials(), 1);
    }

    #[test]
    fn test_rate_above_target_raises_weight() {
        let mut search = RegionSearch::new(1.0, 0.02);
        search.observe(5.0, 3.0, 0.5, 5);
        assert!((search.weight() - 1.02).abs() < 1e-15);
        assert_eq!(search.last_direction(), Some(Direction::Up));
        search.observe(1.0, 3.0, 0.5, 5);
        // reversal: step halves before moving down
        assert_eq!(search.step(), 0.01);
        assert!((search.weight() - 1.01).abs() < 1e-15);
    }

    #[test]
    fn test_step_kept_without_reversal() {
        let mut search = RegionSearch::new(1.0, 0.02);
        search.observe(1.0, 3.0, 0.5, 5);
        search.observe(1.0, 3.0, 0.5, 5);
        assert_eq!(search.step(), 0.02);
        assert!((search.weight() - 0.96).abs() < 1e-15);
    }

    #[test]
    fn test_fails_at_budget_keeping_last_weight() {
        let mut search = RegionSearch::new(1.0, 0.02);
        assert_eq!(search.observe(9.0, 3.0, 0.5, 2), SearchPhase::Searching);
        let tried = search.weight();
        assert_eq!(search.observe(9.0, 3.0, 0.5, 2), SearchPhase::Failed);
        assert_eq!(search.weight(), tried);
        assert_eq!(search.trials(), 2);
        // Frozen
        assert_eq!(search.observe(3.0, 3.0, 0.5, 2), SearchPhase::Failed);
        assert_eq!(search.trials(), 2);
    }

    #[test]
    fn test_single_trial_budget() {
        let mut search = RegionSearch::new(1.0, 0.02);
        assert_eq!(search.observe(9.0, 3.0, 0.5, 1), SearchPhase::Failed);
        assert_eq!(search.weight(), 1.0);
    }

    // ===========================================================================
    // Analytic FIC
    // ===========================================================================

    #[test]
    fn test_analytic_isolated_default_region_is_one() {
        let k = constants();
        let c = Connectome::isolated(3).unwrap();
        let w = analytic_weights(&k, &c, 0.5, &[0.21; 3], &[0.15; 3]).unwrap();
        for wi in w {
            assert!((wi - 1.0).abs() < 1e-6, "w_IE = {wi}");
        }
    }

    #[test]
    fn test_analytic_grows_with_in_strength() {
        let k = constants();
        let c = Connectome::new(array![[0.0, 1.0], [0.2, 0.0]], &Default::default()).unwrap();
        let w = analytic_weights(&k, &c, 0.5, &[0.21; 2], &[0.15; 2]).unwrap();
        assert!(w[0] > w[1]);
        assert!(w[1] > 1.0);
        // Δw = G·J·S_E_ss·ΔΣW / S_I_ss
        let expected = 0.5 * 0.15 * k.steady.s_e * 0.8 / k.steady.s_i;
        assert!((w[0] - w[1] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_analytic_negative_marks_unstable() {
        // Inhibiting external input leaves too little excitation at w_EE = 0.21
        let base = BaseParameters {
            i_ext: -0.05,
            ..Default::default()
        };
        let k = Arc::new(ModelConstants::<f64>::derive(&base).unwrap());
        let c = Connectome::isolated(2).unwrap();
        let controller = FicController::new(
            k,
            Arc::new(c),
            FicSettings {
                mode: FicMode::Analytic,
                ..Default::default()
            },
            NoiseSettings::default(),
            false,
        );
        let report = controller
            .run(InstanceId(0), 0.0, &[1.0, 0.21], &[0.15, 0.15], &AtomicBool::new(false))
            .unwrap()
            .unwrap();
        assert!(report.weights[1] < 0.0);
        assert_eq!(report.unstable_regions, vec![1]);
        assert!(report.unstable());
        assert_eq!(report.trials, 0);
    }

    #[test]
    fn test_disabled_returns_none() {
        let controller = FicController::new(
            constants(),
            Arc::new(Connectome::isolated(1).unwrap()),
            FicSettings {
                mode: FicMode::Disabled,
                ..Default::default()
            },
            NoiseSettings::default(),
            false,
        );
        let out = controller
            .run(InstanceId(0), 0.5, &[0.21], &[0.15], &AtomicBool::new(false))
            .unwrap();
        assert!(out.is_none());
    }

    // ===========================================================================
    // Settings validation
    // ===========================================================================

    #[test]
    fn test_settings_validation() {
        assert!(FicSettings::default().validate(0.1).is_ok());
        let zero_budget = FicSettings {
            max_trials: 0,
            ..Default::default()
        };
        assert!(zero_budget.validate(0.1).is_err());
        let window_outside_trial = FicSettings {
            sampling_end_ms: 12_000.0,
            ..Default::default()
        };
        assert!(window_outside_trial.validate(0.1).is_err());
        let empty_window = FicSettings {
            sampling_start_ms: 5_000.0,
            sampling_end_ms: 5_000.0,
            ..Default::default()
        };
        assert!(empty_window.validate(0.1).is_err());
        // Analytic mode does not use the trial settings
        let analytic = FicSettings {
            mode: FicMode::Analytic,
            max_trials: 0,
            ..Default::default()
        };
        assert!(analytic.validate(0.1).is_ok());
    }

    #[test]
    fn test_run_rejects_empty_window_before_any_trial() {
        let controller = FicController::new(
            constants(),
            Arc::new(Connectome::isolated(1).unwrap()),
            FicSettings {
                sampling_start_ms: 5_000.0,
                sampling_end_ms: 5_000.0,
                ..Default::default()
            },
            NoiseSettings::default(),
            false,
        );
        // Cancel flag set: reaching a trial would report Cancelled instead
        let err = controller
            .run(InstanceId(3), 0.5, &[0.21], &[0.15], &AtomicBool::new(true))
            .unwrap_err();
        assert_eq!(err.instance(), InstanceId(3));
        assert!(matches!(
            err.model_error(),
            Some(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn test_cancel_inside_trial() {
        let controller = FicController::new(
            constants(),
            Arc::new(Connectome::isolated(1).unwrap()),
            FicSettings::default(),
            NoiseSettings::default(),
            false,
        );
        let err = controller
            .run(InstanceId(2), 0.5, &[0.21], &[0.15], &AtomicBool::new(true))
            .unwrap_err();
        assert_eq!(
            err,
            SimulationError::Cancelled {
                instance: InstanceId(2),
                step: 0
            }
        );
    }
}
