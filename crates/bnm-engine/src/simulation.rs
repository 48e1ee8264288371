// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Simulation Run
//!
//! One instance = one parameter set integrated over the full duration:
//!
//! ```text
//! FIC (analytic / numerical trials in scratch state)
//!   │ w_IE
//!   ▼
//! for t in 0..duration/dt:
//!     neural step ──(every bw_dt)──► hemodynamic step ──► BOLD sampler
//!          └──(after transient)──► extended output
//! ```
//!
//! A [`Simulator`] holds everything that is shared between instances
//! (constants, run settings, connectome) behind `Arc`s; every call to
//! [`Simulator::simulate`] owns its own mutable state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bnm_neural::constants::steps_per_interval;
use bnm_neural::{InstanceId, ModelConstants, ModelError, Real, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bold_sampler::{BoldSampler, BoldSeries, SamplingMode};
use crate::connectome::{Connectome, ConnectomeOptions};
use crate::error::{InstanceContext, SimulationError};
use crate::fic::{FicController, FicMode, FicReport, FicSettings};
use crate::hemodynamics::{HemodynamicConverter, HemodynamicDrive};
use crate::neural_dynamics::{NeuralIntegrator, NodeStateArray, RegionalWeights};
use crate::noise::{NoiseMode, NoiseSettings, NoiseSource, MAIN_STREAM};

/// Per-run configuration, immutable and shared by every instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Simulated duration (s)
    pub duration_s: f64,
    /// BOLD output interval (s)
    pub tr_s: f64,
    /// Initial BOLD window discarded as transient (s)
    pub bold_remove_s: f64,
    pub sampling_mode: SamplingMode,
    pub fic: FicSettings,
    pub connectivity: ConnectomeOptions,
    /// Recompute coupling once per millisecond instead of every step
    pub sync_msec: bool,
    pub hemodynamic_drive: HemodynamicDrive,
    pub noise: NoiseSettings,
    /// Per-region state means over the post-transient window
    pub extended_output: bool,
    /// TR-sampled state time series (requires `extended_output`)
    pub extended_output_ts: bool,
    pub sim_verbose: bool,
    /// Simulated time between progress messages (ms)
    pub progress_interval_ms: f64,
    /// Turn FIC non-convergence into an error
    pub abort_on_fic_failure: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            duration_s: 60.0,
            tr_s: 1.0,
            bold_remove_s: 30.0,
            sampling_mode: SamplingMode::Decimate,
            fic: FicSettings::default(),
            connectivity: ConnectomeOptions::default(),
            sync_msec: false,
            hemodynamic_drive: HemodynamicDrive::default(),
            noise: NoiseSettings::default(),
            extended_output: true,
            extended_output_ts: false,
            sim_verbose: false,
            progress_interval_ms: 500.0,
            abort_on_fic_failure: false,
        }
    }
}

impl RunSettings {
    /// Check durations, windows and step multiples against `dt` (ms) and `bw_dt` (s)
    pub fn validate(&self, dt_ms: f64, bw_dt_s: f64) -> Result<()> {
        if !(self.duration_s.is_finite() && self.duration_s > 0.0) {
            return Err(ModelError::configuration(format!(
                "duration must be > 0 s, got {}",
                self.duration_s
            )));
        }
        let duration_ms = self.duration_s * 1000.0;
        steps_per_interval(duration_ms, dt_ms, "duration")?;
        steps_per_interval(self.duration_s, bw_dt_s, "duration")?;
        steps_per_interval(self.tr_s, bw_dt_s, "TR")?;

        if !(self.bold_remove_s >= 0.0 && self.bold_remove_s < self.duration_s) {
            return Err(ModelError::configuration(format!(
                "BOLD transient ({} s) must lie in [0, duration = {} s)",
                self.bold_remove_s, self.duration_s
            )));
        }
        if self.bold_remove_s > 0.0 {
            steps_per_interval(self.bold_remove_s * 1000.0, dt_ms, "BOLD transient")?;
            steps_per_interval(self.bold_remove_s, bw_dt_s, "BOLD transient")?;
        }

        self.fic.validate(dt_ms)?;
        if self.fic.mode == FicMode::Numerical && self.fic.sampling_end_ms > duration_ms {
            return Err(ModelError::configuration(format!(
                "FIC sampling window ends at {} ms, after the {} ms run",
                self.fic.sampling_end_ms, duration_ms
            )));
        }

        if self.sim_verbose {
            steps_per_interval(self.progress_interval_ms, dt_ms, "progress interval")?;
        }
        if self.extended_output_ts && !self.extended_output {
            return Err(ModelError::configuration(
                "extended_output_ts requires extended_output",
            ));
        }
        if let NoiseMode::Segmented { segment_ms } = self.noise.mode {
            if !(segment_ms.is_finite() && segment_ms > 0.0) {
                return Err(ModelError::configuration(format!(
                    "noise segment must be > 0 ms, got {segment_ms}"
                )));
            }
        }
        Ok(())
    }
}

/// Parameter set of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub id: InstanceId,
    /// Global coupling `G`
    pub g: f64,
    pub w_ee: Vec<f64>,
    pub w_ei: Vec<f64>,
    /// Ignored (and may be empty) when FIC is enabled
    pub w_ie: Vec<f64>,
    /// Conduction velocity (m/s); used only with a distance matrix
    #[serde(default = "default_velocity")]
    pub v: f64,
}

fn default_velocity() -> f64 {
    SimulationParameters::DEFAULT_V
}

impl SimulationParameters {
    pub const DEFAULT_G: f64 = 0.5;
    pub const DEFAULT_W_EE: f64 = 0.21;
    pub const DEFAULT_W_EI: f64 = 0.15;
    pub const DEFAULT_W_IE: f64 = 1.0;
    pub const DEFAULT_V: f64 = 1.0;

    /// Same regional weights in every region
    pub fn homogeneous(id: InstanceId, n_regions: usize, g: f64) -> Self {
        Self {
            id,
            g,
            w_ee: vec![Self::DEFAULT_W_EE; n_regions],
            w_ei: vec![Self::DEFAULT_W_EI; n_regions],
            w_ie: vec![Self::DEFAULT_W_IE; n_regions],
            v: Self::DEFAULT_V,
        }
    }

    pub fn validate(&self, n_regions: usize, fic: FicMode) -> Result<()> {
        if !self.g.is_finite() {
            return Err(ModelError::invalid_parameter("G", "must be finite"));
        }
        if self.v.is_nan() || self.v < 0.0 {
            return Err(ModelError::invalid_parameter("v", "must be >= 0"));
        }
        let check = |name: &str, values: &[f64]| -> Result<()> {
            if values.len() != n_regions {
                return Err(ModelError::invalid_parameter(
                    name,
                    format!("expected {n_regions} values, got {}", values.len()),
                ));
            }
            Ok(())
        };
        check("w_EE", &self.w_ee)?;
        check("w_EI", &self.w_ei)?;
        if fic == FicMode::Disabled {
            check("w_IE", &self.w_ie)?;
        }
        Ok(())
    }
}

/// Per-region means of the neural state over the post-transient window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMeans {
    pub i_e: Vec<f64>,
    pub i_i: Vec<f64>,
    pub r_e: Vec<f64>,
    pub r_i: Vec<f64>,
    pub s_e: Vec<f64>,
    pub s_i: Vec<f64>,
}

/// TR-sampled neural state, each shaped (samples × regions)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSeries<T: Real> {
    pub i_e: Array2<T>,
    pub i_i: Array2<T>,
    pub r_e: Array2<T>,
    pub r_i: Array2<T>,
    pub s_e: Array2<T>,
    pub s_i: Array2<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtendedOutput<T: Real> {
    pub means: StateMeans,
    pub time_series: Option<StateSeries<T>>,
}

/// Run counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationDiagnostics {
    pub neural_steps: u64,
    pub hemodynamic_steps: u64,
    /// Clamp events per region (main run only)
    pub clamp_events: Vec<u64>,
    pub elapsed_us: u64,
}

impl SimulationDiagnostics {
    pub fn total_clamps(&self) -> u64 {
        self.clamp_events.iter().sum()
    }
}

/// Everything one instance produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationOutput<T: Real> {
    pub instance: InstanceId,
    pub bold: BoldSeries<T>,
    /// `w_IE` used by the main run
    pub w_ie: Vec<f64>,
    pub fic: Option<FicReport>,
    pub diagnostics: SimulationDiagnostics,
    pub extended: Option<ExtendedOutput<T>>,
}

/// Running sums of the six state quantities (order: I_E, I_I, r_E, r_I, S_E, S_I)
struct ExtendedRecorder<T: Real> {
    sums: [Vec<f64>; 6],
    samples: u64,
    rows: Option<[Vec<T>; 6]>,
}

fn quantities<T: Real>(state: &NodeStateArray<T>) -> [&[T]; 6] {
    [
        state.i_e.as_slice(),
        state.i_i.as_slice(),
        state.r_e.as_slice(),
        state.r_i.as_slice(),
        state.s_e.as_slice(),
        state.s_i.as_slice(),
    ]
}

impl<T: Real> ExtendedRecorder<T> {
    fn new(n: usize, time_series: bool, expected_rows: usize) -> Self {
        Self {
            sums: std::array::from_fn(|_| vec![0.0; n]),
            samples: 0,
            rows: time_series
                .then(|| std::array::from_fn(|_| Vec::with_capacity(expected_rows * n))),
        }
    }

    fn accumulate(&mut self, state: &NodeStateArray<T>) {
        for (sum, values) in self.sums.iter_mut().zip(quantities(state)) {
            for (s, &v) in sum.iter_mut().zip(values) {
                *s += v.as_f64();
            }
        }
        self.samples += 1;
    }

    fn sample_row(&mut self, state: &NodeStateArray<T>) {
        if let Some(rows) = &mut self.rows {
            for (row, values) in rows.iter_mut().zip(quantities(state)) {
                row.extend_from_slice(values);
            }
        }
    }

    fn finish(self, n: usize) -> Result<ExtendedOutput<T>> {
        let samples = self.samples.max(1) as f64;
        let [i_e, i_i, r_e, r_i, s_e, s_i] = self
            .sums
            .map(|sum| sum.into_iter().map(|s| s / samples).collect::<Vec<_>>());
        let means = StateMeans {
            i_e,
            i_i,
            r_e,
            r_i,
            s_e,
            s_i,
        };

        let time_series = match self.rows {
            Some(rows) => {
                let shape = |v: Vec<T>| {
                    let len = if n == 0 { 0 } else { v.len() / n };
                    Array2::from_shape_vec((len, n), v).map_err(|e| {
                        ModelError::configuration(format!("state series shape: {e}"))
                    })
                };
                let [i_e, i_i, r_e, r_i, s_e, s_i] = rows;
                Some(StateSeries {
                    i_e: shape(i_e)?,
                    i_i: shape(i_i)?,
                    r_e: shape(r_e)?,
                    r_i: shape(r_i)?,
                    s_e: shape(s_e)?,
                    s_i: shape(s_i)?,
                })
            }
            None => None,
        };

        Ok(ExtendedOutput { means, time_series })
    }
}

/// Step counts of one run, derived from settings and constants
struct RunPlan {
    total_steps: u64,
    steps_per_bw: u64,
    transient_steps: u64,
    steps_per_tr: u64,
    progress_steps: u64,
}

impl RunPlan {
    fn new<T: Real>(constants: &ModelConstants<T>, settings: &RunSettings) -> Result<Self> {
        let dt_ms = constants.base.dt_ms;
        let transient_steps = if settings.bold_remove_s == 0.0 {
            0
        } else {
            steps_per_interval(settings.bold_remove_s * 1000.0, dt_ms, "BOLD transient")?
        };
        let progress_steps = if settings.sim_verbose {
            steps_per_interval(settings.progress_interval_ms, dt_ms, "progress interval")?
        } else {
            u64::MAX
        };
        Ok(Self {
            total_steps: steps_per_interval(settings.duration_s * 1000.0, dt_ms, "duration")?,
            steps_per_bw: constants.steps_per_bw_step()?,
            transient_steps,
            steps_per_tr: steps_per_interval(settings.tr_s * 1000.0, dt_ms, "TR")?,
            progress_steps,
        })
    }
}

/// Shared, read-only context for running instances
pub struct Simulator<T: Real> {
    constants: Arc<ModelConstants<T>>,
    settings: Arc<RunSettings>,
    connectome: Arc<Connectome>,
}

impl<T: Real> Simulator<T> {
    /// Validate settings and build the effective connectome from `sc`
    pub fn new(
        constants: Arc<ModelConstants<T>>,
        settings: Arc<RunSettings>,
        sc: Array2<f64>,
    ) -> Result<Self> {
        let connectome = Arc::new(Connectome::new(sc, &settings.connectivity)?);
        Self::with_connectome(constants, settings, connectome)
    }

    /// Use an already built connectome
    pub fn with_connectome(
        constants: Arc<ModelConstants<T>>,
        settings: Arc<RunSettings>,
        connectome: Arc<Connectome>,
    ) -> Result<Self> {
        settings.validate(constants.base.dt_ms, constants.base.hemodynamics.bw_dt_s)?;
        if connectome.has_delays() && !settings.sync_msec {
            info!(
                target: "bnm-engine",
                "Conduction delays enabled: coupling is synced every 1 ms"
            );
        }
        info!(
            target: "bnm-engine",
            "Simulator ready: {} regions, {} edges, {} s at dt = {} ms ({}), FIC {:?}",
            connectome.n_regions(),
            connectome.edge_count(),
            settings.duration_s,
            constants.base.dt_ms,
            T::PRECISION,
            settings.fic.mode
        );
        Ok(Self {
            constants,
            settings,
            connectome,
        })
    }

    pub fn constants(&self) -> &Arc<ModelConstants<T>> {
        &self.constants
    }

    pub fn settings(&self) -> &Arc<RunSettings> {
        &self.settings
    }

    pub fn connectome(&self) -> &Arc<Connectome> {
        &self.connectome
    }

    pub fn n_regions(&self) -> usize {
        self.connectome.n_regions()
    }

    /// Run one instance to completion
    pub fn simulate(
        &self,
        params: &SimulationParameters,
    ) -> std::result::Result<SimulationOutput<T>, SimulationError> {
        self.simulate_cancellable(params, &AtomicBool::new(false))
    }

    /// Run one instance, stopping at the next step boundary once `cancel` is set
    pub fn simulate_cancellable(
        &self,
        params: &SimulationParameters,
        cancel: &AtomicBool,
    ) -> std::result::Result<SimulationOutput<T>, SimulationError> {
        let started = Instant::now();
        let id = params.id;
        let s = &*self.settings;
        let n = self.n_regions();
        let dt_ms = self.constants.base.dt_ms;

        params.validate(n, s.fic.mode).for_instance(id)?;
        let plan = RunPlan::new(&self.constants, s).for_instance(id)?;

        let fic = FicController::new(
            self.constants.clone(),
            self.connectome.clone(),
            s.fic,
            s.noise,
            s.sync_msec,
        )
        .with_velocity(params.v)
        .run(id, params.g, &params.w_ee, &params.w_ei, cancel)?;

        if let Some(report) = &fic {
            if s.abort_on_fic_failure && report.failed() {
                return Err(SimulationError::model(
                    id,
                    ModelError::FicFailed {
                        regions: report.failed_regions.clone(),
                        trials: report.trials,
                    },
                ));
            }
        }
        let w_ie = match &fic {
            Some(report) => report.weights.clone(),
            None => params.w_ie.clone(),
        };

        let weights =
            RegionalWeights::<T>::from_f64(&params.w_ee, &params.w_ei, &w_ie).for_instance(id)?;
        let mut integrator = NeuralIntegrator::with_conduction(
            self.constants.clone(),
            &self.connectome,
            params.g,
            Some(params.v),
            s.sync_msec,
        )
        .for_instance(id)?;
        let mut noise =
            NoiseSource::new(&s.noise, MAIN_STREAM, n, dt_ms).for_instance(id)?;
        let mut hemo = HemodynamicConverter::new(self.constants.clone(), n, s.hemodynamic_drive);
        let mut sampler = BoldSampler::new(
            n,
            self.constants.base.hemodynamics.bw_dt_s,
            s.tr_s,
            s.bold_remove_s,
            s.duration_s,
            s.sampling_mode,
        )
        .for_instance(id)?;
        let mut extended = s
            .extended_output
            .then(|| ExtendedRecorder::new(n, s.extended_output_ts, sampler.expected_len()));

        debug!(
            target: "bnm-engine",
            "[SIM] {}: {} steps, hemodynamics every {} steps, BOLD factor {}",
            id,
            plan.total_steps,
            plan.steps_per_bw,
            sampler.factor()
        );

        for t in 0..plan.total_steps {
            if cancel.load(Ordering::Relaxed) {
                return Err(SimulationError::Cancelled { instance: id, step: t });
            }
            integrator.step(&weights, &mut noise).for_instance(id)?;
            let done = t + 1;

            if done % plan.steps_per_bw == 0 {
                let bold = hemo.step(integrator.state(), t).for_instance(id)?;
                sampler.push(bold);
            }

            if let Some(recorder) = &mut extended {
                if done > plan.transient_steps {
                    recorder.accumulate(integrator.state());
                    if (done - plan.transient_steps) % plan.steps_per_tr == 0 {
                        recorder.sample_row(integrator.state());
                    }
                }
            }

            if done % plan.progress_steps == 0 {
                info!(
                    target: "bnm-engine",
                    "[SIM] {}: {:.1} / {:.1} s simulated",
                    id,
                    done as f64 * dt_ms / 1000.0,
                    s.duration_s
                );
            }
        }

        integrator.check_persistent_clamp().for_instance(id)?;
        let bold = sampler.finish().for_instance(id)?;
        let extended = extended.map(|r| r.finish(n)).transpose().for_instance(id)?;

        let diagnostics = SimulationDiagnostics {
            neural_steps: integrator.steps_taken(),
            hemodynamic_steps: hemo.steps_taken(),
            clamp_events: integrator.clamps().counts().to_vec(),
            elapsed_us: started.elapsed().as_micros() as u64,
        };
        debug!(
            target: "bnm-engine",
            "[SIM] {} done in {} us: {} BOLD samples, {} clamp events",
            id,
            diagnostics.elapsed_us,
            bold.n_samples(),
            diagnostics.total_clamps()
        );

        Ok(SimulationOutput {
            instance: id,
            bold,
            w_ie,
            fic,
            diagnostics,
            extended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnm_neural::{BaseParameters, DivergenceKind};
    use ndarray::array;

    fn constants() -> Arc<ModelConstants<f64>> {
        Arc::new(ModelConstants::derive(&BaseParameters::default()).unwrap())
    }

    /// 2 s run, 1 s transient, TR 0.5 s, FIC disabled
    fn short_settings() -> RunSettings {
        RunSettings {
            duration_s: 2.0,
            tr_s: 0.5,
            bold_remove_s: 1.0,
            fic: FicSettings {
                mode: FicMode::Disabled,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn two_regions() -> Array2<f64> {
        array![[0.0, 0.5], [0.5, 0.0]]
    }

    // ===========================================================================
    // Settings
    // ===========================================================================

    #[test]
    fn test_default_settings_are_valid() {
        assert!(RunSettings::default().validate(0.1, 0.001).is_ok());
    }

    #[test]
    fn test_fic_window_beyond_duration_rejected() {
        let settings = RunSettings {
            duration_s: 5.0,
            bold_remove_s: 1.0,
            ..Default::default()
        };
        // default FIC window ends at 10 s
        let err = settings.validate(0.1, 0.001).unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
    }

    #[test]
    fn test_transient_must_be_inside_run() {
        let mut settings = short_settings();
        settings.bold_remove_s = 2.0;
        assert!(settings.validate(0.1, 0.001).is_err());
        settings.bold_remove_s = -1.0;
        assert!(settings.validate(0.1, 0.001).is_err());
    }

    #[test]
    fn test_non_multiple_tr_rejected() {
        let mut settings = short_settings();
        settings.tr_s = 0.0005;
        assert!(settings.validate(0.1, 0.001).is_err());
    }

    #[test]
    fn test_time_series_requires_extended_output() {
        let mut settings = short_settings();
        settings.extended_output = false;
        settings.extended_output_ts = true;
        assert!(settings.validate(0.1, 0.001).is_err());
    }

    #[test]
    fn test_parameter_lengths_checked() {
        let params = SimulationParameters::homogeneous(InstanceId(0), 3, 0.5);
        assert!(params.validate(3, FicMode::Disabled).is_ok());
        assert!(params.validate(4, FicMode::Numerical).is_err());

        let mut no_w_ie = params.clone();
        no_w_ie.w_ie.clear();
        assert!(no_w_ie.validate(3, FicMode::Numerical).is_ok());
        assert!(no_w_ie.validate(3, FicMode::Disabled).is_err());
    }

    // ===========================================================================
    // Runs
    // ===========================================================================

    #[test]
    fn test_run_shapes_and_counters() {
        let mut settings = short_settings();
        settings.extended_output_ts = true;
        let sim = Simulator::new(constants(), Arc::new(settings), two_regions()).unwrap();
        let out = sim
            .simulate(&SimulationParameters::homogeneous(InstanceId(3), 2, 0.5))
            .unwrap();

        assert_eq!(out.instance, InstanceId(3));
        assert_eq!(out.bold.n_samples(), 2);
        assert_eq!(out.bold.n_regions(), 2);
        assert_eq!(out.diagnostics.neural_steps, 20_000);
        assert_eq!(out.diagnostics.hemodynamic_steps, 2_000);
        assert_eq!(out.w_ie, vec![1.0, 1.0]);
        assert!(out.fic.is_none());

        let ext = out.extended.unwrap();
        assert_eq!(ext.means.r_e.len(), 2);
        let ts = ext.time_series.unwrap();
        assert_eq!(ts.r_e.dim(), (2, 2));
        for &s in &ext.means.s_e {
            assert!(s > 0.0 && s < 1.0);
        }
    }

    #[test]
    fn test_analytic_fic_weights_are_used() {
        let mut settings = short_settings();
        settings.fic.mode = FicMode::Analytic;
        let sim = Simulator::new(constants(), Arc::new(settings), two_regions()).unwrap();
        let mut params = SimulationParameters::homogeneous(InstanceId(0), 2, 0.5);
        params.w_ie.clear();
        let out = sim.simulate(&params).unwrap();
        let report = out.fic.unwrap();
        assert_eq!(out.w_ie, report.weights);
        assert!(out.w_ie[0] > 1.0);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let sim = Simulator::new(constants(), Arc::new(short_settings()), two_regions()).unwrap();
        let params = SimulationParameters::homogeneous(InstanceId(0), 2, 0.5);
        let a = sim.simulate(&params).unwrap();
        let b = sim.simulate(&params).unwrap();
        assert_eq!(a.bold, b.bold);
        assert_eq!(a.extended, b.extended);
    }

    #[test]
    fn test_cancel_before_first_step() {
        let sim = Simulator::new(constants(), Arc::new(short_settings()), two_regions()).unwrap();
        let err = sim
            .simulate_cancellable(
                &SimulationParameters::homogeneous(InstanceId(7), 2, 0.5),
                &AtomicBool::new(true),
            )
            .unwrap_err();
        assert_eq!(
            err,
            SimulationError::Cancelled {
                instance: InstanceId(7),
                step: 0
            }
        );
    }

    #[test]
    fn test_divergence_is_attributed_to_instance() {
        let base = BaseParameters {
            sigma: 1.0e5,
            ..Default::default()
        };
        let k = Arc::new(ModelConstants::<f64>::derive(&base).unwrap());
        let sim = Simulator::new(k, Arc::new(short_settings()), two_regions()).unwrap();
        let err = sim
            .simulate(&SimulationParameters::homogeneous(InstanceId(5), 2, 0.5))
            .unwrap_err();
        assert_eq!(err.instance(), InstanceId(5));
        assert!(matches!(
            err.model_error(),
            Some(ModelError::NumericalDivergence {
                kind: DivergenceKind::PersistentClamp,
                ..
            })
        ));
    }

    #[test]
    fn test_delayed_run_differs_from_instantaneous() {
        let mut delayed = short_settings();
        delayed.sync_msec = true;
        let mut instant = delayed.clone();
        delayed.connectivity.distances = Some(array![[0.0, 40.0], [40.0, 0.0]]);
        instant.connectivity.distances = Some(Array2::zeros((2, 2)));

        let params = SimulationParameters::homogeneous(InstanceId(0), 2, 0.5);
        let a = Simulator::new(constants(), Arc::new(delayed), two_regions())
            .unwrap()
            .simulate(&params)
            .unwrap();
        let b = Simulator::new(constants(), Arc::new(instant.clone()), two_regions())
            .unwrap()
            .simulate(&params)
            .unwrap();
        assert_ne!(a.bold, b.bold);

        // Zero-length fibers reduce to per-millisecond instantaneous coupling
        instant.connectivity.distances = None;
        let c = Simulator::new(constants(), Arc::new(instant), two_regions())
            .unwrap()
            .simulate(&params)
            .unwrap();
        assert_eq!(b.bold, c.bold);
    }

    #[test]
    fn test_delays_need_positive_velocity() {
        let mut settings = short_settings();
        settings.connectivity.distances = Some(array![[0.0, 40.0], [40.0, 0.0]]);
        let sim = Simulator::new(constants(), Arc::new(settings), two_regions()).unwrap();
        let mut params = SimulationParameters::homogeneous(InstanceId(2), 2, 0.5);
        params.v = 0.0;
        let err = sim.simulate(&params).unwrap_err();
        assert!(matches!(
            err.model_error(),
            Some(ModelError::InvalidParameter { name, .. }) if name == "v"
        ));

        params.v = -1.0;
        assert!(params.validate(2, FicMode::Disabled).is_err());
    }

    #[test]
    fn test_output_serializes() {
        let sim = Simulator::new(constants(), Arc::new(short_settings()), two_regions()).unwrap();
        let out = sim
            .simulate(&SimulationParameters::homogeneous(InstanceId(0), 2, 0.5))
            .unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert!(json.get("bold").is_some());
        assert!(json.get("diagnostics").is_some());
    }
}
