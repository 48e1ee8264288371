// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neural Dynamics
//!
//! Euler–Maruyama integration of the coupled reduced Wong-Wang network.
//!
//! ## Performance Critical Path
//! One call to [`NeuralIntegrator::step`] runs per 0.1 ms of simulated time,
//! for every instance and every FIC trial.
//!
//! ## Step Structure
//! 1. **Coupling**: `c = W · S_E` from the committed (front) state, every step
//!    or once per millisecond (`sync_msec`, always on with conduction delays)
//! 2. **Noise**: two samples per region, drawn sequentially (thread-count independent)
//! 3. **Update**: every region reads only the front buffer (Rayon for large networks)
//! 4. **Commit**: sequential scan for divergence and clamps, write the back
//!    buffer, swap. The lowest failing region is the one reported

use std::sync::{Arc, OnceLock};

use bnm_neural::{
    ModelConstants, ModelError, ModelParameters, NeuralMassModel, Real, ReducedWongWang,
    RegionStep, RegionalParameters, Result,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::trace;

use crate::connectome::Connectome;
use crate::coupling::{CouplingEngine, PARALLEL_REGION_THRESHOLD};
use crate::noise::NoiseSource;

/// Runtime-gated tracing config for clamp events.
/// Enable with:
/// - BNM_TRACE_CLAMPS=1
///   Optional filter:
/// - BNM_TRACE_REGION=<usize region index>
struct ClampTraceCfg {
    enabled: bool,
    region_filter: Option<usize>,
}

fn clamp_trace_cfg() -> &'static ClampTraceCfg {
    static CFG: OnceLock<ClampTraceCfg> = OnceLock::new();
    CFG.get_or_init(|| {
        let enabled = std::env::var("BNM_TRACE_CLAMPS")
            .ok()
            .as_deref()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let region_filter = std::env::var("BNM_TRACE_REGION").ok().and_then(|v| v.parse().ok());

        ClampTraceCfg {
            enabled,
            region_filter,
        }
    })
}

/// Per-region state, structure-of-arrays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStateArray<T: Real> {
    pub s_e: Vec<T>,
    pub s_i: Vec<T>,
    pub i_e: Vec<T>,
    pub i_i: Vec<T>,
    pub r_e: Vec<T>,
    pub r_i: Vec<T>,
}

impl<T: Real> NodeStateArray<T> {
    /// All regions at the steady-state references
    pub fn at_steady_state(n: usize, constants: &ModelConstants<T>) -> Self {
        let ss = &constants.steady;
        Self {
            s_e: vec![T::from_real(ss.s_e); n],
            s_i: vec![T::from_real(ss.s_i); n],
            i_e: vec![T::from_real(ss.i_e); n],
            i_i: vec![T::from_real(ss.i_i); n],
            r_e: vec![T::from_real(ss.r_e); n],
            r_i: vec![T::from_real(ss.r_i); n],
        }
    }

    pub fn len(&self) -> usize {
        self.s_e.len()
    }

    pub fn is_empty(&self) -> bool {
        self.s_e.is_empty()
    }

    #[inline(always)]
    fn write(&mut self, i: usize, step: &RegionStep<T>) {
        self.s_e[i] = step.s_e;
        self.s_i[i] = step.s_i;
        self.i_e[i] = step.i_e;
        self.i_i[i] = step.i_i;
        self.r_e[i] = step.r_e;
        self.r_i[i] = step.r_i;
    }
}

/// Local weights of every region (`w_IE` is the only one FIC changes)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalWeights<T: Real> {
    pub w_ee: Vec<T>,
    pub w_ei: Vec<T>,
    pub w_ie: Vec<T>,
}

impl<T: Real> RegionalWeights<T> {
    /// Convert and validate per-region weights
    pub fn from_f64(w_ee: &[f64], w_ei: &[f64], w_ie: &[f64]) -> Result<Self> {
        let n = w_ee.len();
        if w_ei.len() != n || w_ie.len() != n {
            return Err(ModelError::invalid_parameter(
                "regional weights",
                format!(
                    "length mismatch: w_ee {}, w_ei {}, w_ie {}",
                    n,
                    w_ei.len(),
                    w_ie.len()
                ),
            ));
        }
        let convert = |v: &[f64]| v.iter().map(|&x| T::from_real(x)).collect::<Vec<T>>();
        let weights = Self {
            w_ee: convert(w_ee),
            w_ei: convert(w_ei),
            w_ie: convert(w_ie),
        };
        for i in 0..n {
            weights
                .region(i)
                .validate()
                .map_err(|reason| ModelError::invalid_parameter(format!("region {i}"), reason))?;
        }
        Ok(weights)
    }

    pub fn len(&self) -> usize {
        self.w_ee.len()
    }

    pub fn is_empty(&self) -> bool {
        self.w_ee.is_empty()
    }

    #[inline(always)]
    pub fn region(&self, i: usize) -> RegionalParameters<T> {
        RegionalParameters {
            w_ee: self.w_ee[i],
            w_ei: self.w_ei[i],
            w_ie: self.w_ie[i],
        }
    }

    /// Replace `w_IE` of one region
    pub fn set_w_ie(&mut self, i: usize, value: f64) {
        self.w_ie[i] = T::from_real(value);
    }
}

/// Counts clamp events per region over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClampMonitor {
    counts: Vec<u64>,
    steps: u64,
}

impl ClampMonitor {
    pub fn new(n: usize) -> Self {
        Self {
            counts: vec![0; n],
            steps: 0,
        }
    }

    #[inline(always)]
    fn record(&mut self, region: usize) {
        self.counts[region] += 1;
    }

    #[inline(always)]
    fn end_step(&mut self) {
        self.steps += 1;
    }

    /// Clamp events per region
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Lowest region that clamped on every observed step
    pub fn persistent_region(&self) -> Option<usize> {
        if self.steps == 0 {
            return None;
        }
        self.counts.iter().position(|&c| c == self.steps)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

/// Network integrator for one instance (owns its node state)
pub struct NeuralIntegrator<T: Real> {
    constants: Arc<ModelConstants<T>>,
    model: ReducedWongWang,
    coupling: CouplingEngine<T>,
    global_coupling: T,
    /// Recompute coupling every `sync_every` steps
    sync_every: u64,
    front: NodeStateArray<T>,
    back: NodeStateArray<T>,
    coupling_buf: Vec<T>,
    noise_buf: Vec<T>,
    step_buf: Vec<RegionStep<T>>,
    parallel_threshold: usize,
    step_index: u64,
    clamps: ClampMonitor,
}

impl<T: Real> NeuralIntegrator<T> {
    /// Integrator starting from the steady-state references
    pub fn new(
        constants: Arc<ModelConstants<T>>,
        connectome: &Connectome,
        global_coupling: f64,
        sync_msec: bool,
    ) -> Result<Self> {
        Self::with_conduction(constants, connectome, global_coupling, None, sync_msec)
    }

    /// Integrator whose coupling is delayed by `distance / velocity` when the
    /// connectome carries distances. Delays force once-per-millisecond sync.
    pub fn with_conduction(
        constants: Arc<ModelConstants<T>>,
        connectome: &Connectome,
        global_coupling: f64,
        velocity: Option<f64>,
        sync_msec: bool,
    ) -> Result<Self> {
        if !global_coupling.is_finite() {
            return Err(ModelError::invalid_parameter("G", "must be finite"));
        }
        let n = connectome.n_regions();
        let coupling = match (connectome.has_delays(), velocity) {
            (false, _) => CouplingEngine::new(connectome),
            (true, Some(v)) => CouplingEngine::delayed(connectome, v)?,
            (true, None) => {
                return Err(ModelError::invalid_parameter(
                    "v",
                    "conduction velocity is required when distances are given",
                ))
            }
        };
        let sync_every = if sync_msec || coupling.is_delayed() {
            constants.steps_per_msec()?
        } else {
            1
        };
        let front = NodeStateArray::at_steady_state(n, &constants);
        Ok(Self {
            coupling,
            model: ReducedWongWang::new(),
            global_coupling: T::from_real(global_coupling),
            sync_every,
            back: front.clone(),
            front,
            coupling_buf: vec![T::zero(); n],
            noise_buf: vec![T::zero(); 2 * n],
            step_buf: Vec::with_capacity(n),
            parallel_threshold: PARALLEL_REGION_THRESHOLD,
            step_index: 0,
            clamps: ClampMonitor::new(n),
            constants,
        })
    }

    /// Override the parallel threshold (benchmarks and tests)
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self.coupling = self.coupling.with_parallel_threshold(threshold);
        self
    }

    /// Committed state after the last step
    pub fn state(&self) -> &NodeStateArray<T> {
        &self.front
    }

    pub fn steps_taken(&self) -> u64 {
        self.step_index
    }

    pub fn clamps(&self) -> &ClampMonitor {
        &self.clamps
    }

    pub fn n_regions(&self) -> usize {
        self.front.len()
    }

    /// Advance every region by one step
    pub fn step(&mut self, weights: &RegionalWeights<T>, noise: &mut NoiseSource<T>) -> Result<()> {
        let n = self.front.len();
        let step = self.step_index;

        if step % self.sync_every == 0 {
            self.coupling.advance(&self.front.s_e, &mut self.coupling_buf);
        }
        noise.fill(&mut self.noise_buf);

        let k = &*self.constants;
        let model = &self.model;
        let front = &self.front;
        let coupling = &self.coupling_buf;
        let xi = &self.noise_buf;
        let g = self.global_coupling;
        let update = |i: usize| {
            model.step_region(
                k,
                &weights.region(i),
                g,
                coupling[i],
                (front.s_e[i], front.s_i[i]),
                (xi[2 * i], xi[2 * i + 1]),
            )
        };

        if n >= self.parallel_threshold {
            (0..n)
                .into_par_iter()
                .map(update)
                .collect_into_vec(&mut self.step_buf);
        } else {
            self.step_buf.clear();
            self.step_buf.extend((0..n).map(update));
        }

        let trace_cfg = clamp_trace_cfg();
        for (i, result) in self.step_buf.iter().enumerate() {
            result.check_finite().map_err(|v| v.at(step, i))?;
            if result.clamped() {
                self.clamps.record(i);
                if trace_cfg.enabled && trace_cfg.region_filter.map_or(true, |r| r == i) {
                    trace!(
                        target: "bnm-engine",
                        "[CLAMP] step={} region={} S_E={} S_I={}",
                        step,
                        i,
                        result.s_e,
                        result.s_i
                    );
                }
            }
            self.back.write(i, result);
        }

        std::mem::swap(&mut self.front, &mut self.back);
        self.clamps.end_step();
        self.step_index += 1;
        Ok(())
    }

    /// Fail with `PersistentClamp` if some region clamped on every step so far
    pub fn check_persistent_clamp(&self) -> Result<()> {
        match self.clamps.persistent_region() {
            Some(region) => Err(ModelError::NumericalDivergence {
                step: self.step_index.saturating_sub(1),
                region,
                quantity: "S_E/S_I",
                value: self.clamps.counts()[region] as f64,
                kind: bnm_neural::DivergenceKind::PersistentClamp,
            }),
            None => Ok(()),
        }
    }
}
