// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Simulation Group
//!
//! Runs many parameter sets against one [`Simulator`] in parallel. Instances
//! share the simulator read-only and own everything they mutate, so a
//! diverging or cancelled instance only affects its own result slot.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use bnm_neural::{ModelError, Real, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::SimulationError;
use crate::simulation::{SimulationOutput, SimulationParameters, Simulator};
use crate::GroupStats;

/// Per-instance results in input order, plus batch statistics
pub struct GroupRun<T: Real> {
    pub results: Vec<std::result::Result<SimulationOutput<T>, SimulationError>>,
    pub stats: GroupStats,
}

/// Parallel batch runner
pub struct SimGroup<T: Real> {
    simulator: Arc<Simulator<T>>,
    /// Dedicated pool when a core limit is set; otherwise the global Rayon pool
    pool: Option<rayon::ThreadPool>,
}

impl<T: Real> SimGroup<T> {
    /// `max_cores = 0` uses the global Rayon pool
    pub fn new(simulator: Arc<Simulator<T>>, max_cores: usize) -> Result<Self> {
        let pool = if max_cores == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(max_cores)
                .thread_name(|i| format!("bnm-sim-{i}"))
                .build()
                .map_err(|e| ModelError::configuration(format!("thread pool: {e}")))?;
            Some(pool)
        };
        Ok(Self { simulator, pool })
    }

    pub fn simulator(&self) -> &Arc<Simulator<T>> {
        &self.simulator
    }

    /// Worker threads available to the batch
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    pub fn run(&self, params: &[SimulationParameters]) -> GroupRun<T> {
        self.run_cancellable(params, &AtomicBool::new(false))
    }

    /// Run every parameter set; setting `cancel` stops all running instances
    /// at their next step boundary
    pub fn run_cancellable(&self, params: &[SimulationParameters], cancel: &AtomicBool) -> GroupRun<T> {
        let started = Instant::now();
        info!(
            target: "bnm-engine",
            "[GROUP] running {} instance(s) on {} thread(s)",
            params.len(),
            self.threads()
        );

        let simulator = &self.simulator;
        let run_all = || {
            params
                .par_iter()
                .map(|p| simulator.simulate_cancellable(p, cancel))
                .collect::<Vec<_>>()
        };
        let results = match &self.pool {
            Some(pool) => pool.install(run_all),
            None => run_all(),
        };

        let mut stats = GroupStats {
            total_instances: results.len() as u64,
            wall_time_us: started.elapsed().as_micros() as u64,
            ..Default::default()
        };
        for result in &results {
            match result {
                Ok(out) => {
                    stats.succeeded += 1;
                    stats.total_neural_steps += out.diagnostics.neural_steps;
                    stats.total_processing_time_us += out.diagnostics.elapsed_us;
                    if out.fic.as_ref().is_some_and(|f| f.failed()) {
                        stats.fic_failures += 1;
                    }
                }
                Err(SimulationError::Cancelled { .. }) => stats.cancelled += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(target: "bnm-engine", "[GROUP] {}", e);
                }
            }
        }

        info!(
            target: "bnm-engine",
            "[GROUP] done: {} ok, {} failed, {} cancelled in {} us",
            stats.succeeded,
            stats.failed,
            stats.cancelled,
            stats.wall_time_us
        );
        GroupRun { results, stats }
    }
}
