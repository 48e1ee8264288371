// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Network Coupling Engine
//!
//! Computes `c_i = Σ_j W_ij · S_E,j` for every target region from the
//! effective CSR edge list.
//!
//! ## Strategy
//! 1. **Gather**: each target reads its own incoming row (no scatter, no atomics)
//! 2. **Rayon**: rows are split across threads once the region count is large
//! 3. **Read-only input**: `S_E` comes from the committed (front) buffer only
//!
//! ## Conduction delays
//! With a distance matrix, edge `j → i` carries `S_E,j(t − d_ij / v)`, the
//! delay rounded to whole milliseconds. A ring buffer keeps one `S_E` row per
//! millisecond:
//!
//! ```text
//! history: [row 0][row 1] ... [row depth-1]      depth = max delay + 1
//!                    ▲ head (newest)
//! delay d  →  row (head − d) mod depth
//! ```

use bnm_neural::{ModelError, Real, Result};
use rayon::prelude::*;

use crate::connectome::Connectome;

/// Region count at which per-step work is split across the rayon pool
pub const PARALLEL_REGION_THRESHOLD: usize = 256;

/// Per-millisecond `S_E` history read by delayed edges
#[derive(Debug, Clone)]
struct DelayLine<T: Real> {
    /// Whole-millisecond delay per effective edge (CSR order)
    edge_delays: Vec<u32>,
    history: Vec<T>,
    depth: usize,
    n: usize,
    head: usize,
    primed: bool,
}

impl<T: Real> DelayLine<T> {
    fn new(edge_delays: Vec<u32>, n: usize) -> Self {
        let depth = edge_delays.iter().copied().max().unwrap_or(0) as usize + 1;
        Self {
            edge_delays,
            history: vec![T::zero(); depth * n],
            depth,
            n,
            head: 0,
            primed: false,
        }
    }

    /// Record the newest millisecond; the first row also fills the past
    fn push(&mut self, s_e: &[T]) {
        if !self.primed {
            for row in self.history.chunks_exact_mut(self.n) {
                row.copy_from_slice(s_e);
            }
            self.primed = true;
            return;
        }
        self.head = (self.head + 1) % self.depth;
        let start = self.head * self.n;
        self.history[start..start + self.n].copy_from_slice(s_e);
    }

    #[inline(always)]
    fn at(&self, delay_ms: u32, source: u32) -> T {
        let row = (self.head + self.depth - delay_ms as usize) % self.depth;
        self.history[row * self.n + source as usize]
    }
}

/// Precision-converted CSR coupling operator
#[derive(Debug, Clone)]
pub struct CouplingEngine<T: Real> {
    row_ptr: Vec<usize>,
    sources: Vec<u32>,
    values: Vec<T>,
    delays: Option<DelayLine<T>>,
    parallel_threshold: usize,
}

impl<T: Real> CouplingEngine<T> {
    /// Instantaneous coupling; edge distances, if any, are ignored
    pub fn new(connectome: &Connectome) -> Self {
        let (row_ptr, sources, values) = connectome.csr();
        Self {
            row_ptr: row_ptr.to_vec(),
            sources: sources.to_vec(),
            values: values.iter().map(|&w| T::from_real(w)).collect(),
            delays: None,
            parallel_threshold: PARALLEL_REGION_THRESHOLD,
        }
    }

    /// Delayed coupling at conduction velocity `velocity` (m/s, i.e. mm/ms)
    pub fn delayed(connectome: &Connectome, velocity: f64) -> Result<Self> {
        let distances = connectome.edge_distances().ok_or_else(|| {
            ModelError::invalid_parameter("sc_dist", "connectome has no distance matrix")
        })?;
        if !(velocity.is_finite() && velocity > 0.0) {
            return Err(ModelError::invalid_parameter(
                "v",
                format!("conduction velocity must be > 0 with delays, got {velocity}"),
            ));
        }
        let edge_delays = distances
            .iter()
            .map(|&d| {
                let ms = (d / velocity).round();
                if ms > u32::MAX as f64 {
                    Err(ModelError::invalid_parameter(
                        "v",
                        format!("delay of {ms} ms is out of range"),
                    ))
                } else {
                    Ok(ms as u32)
                }
            })
            .collect::<Result<Vec<u32>>>()?;

        let mut engine = Self::new(connectome);
        engine.delays = Some(DelayLine::new(edge_delays, connectome.n_regions()));
        Ok(engine)
    }

    /// Override the parallel threshold (benchmarks and tests)
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn n_regions(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    pub fn is_delayed(&self) -> bool {
        self.delays.is_some()
    }

    /// Longest edge delay in milliseconds (0 without delays)
    pub fn max_delay_ms(&self) -> usize {
        self.delays.as_ref().map_or(0, |line| line.depth - 1)
    }

    #[inline(always)]
    fn row_sum(&self, target: usize, s_e: &[T]) -> T {
        let start = self.row_ptr[target];
        let end = self.row_ptr[target + 1];
        self.sources[start..end]
            .iter()
            .zip(&self.values[start..end])
            .fold(T::zero(), |acc, (&j, &w)| acc + w * s_e[j as usize])
    }

    #[inline(always)]
    fn delayed_row_sum(&self, target: usize, line: &DelayLine<T>) -> T {
        let start = self.row_ptr[target];
        let end = self.row_ptr[target + 1];
        (start..end).fold(T::zero(), |acc, e| {
            acc + self.values[e] * line.at(line.edge_delays[e], self.sources[e])
        })
    }

    fn fill<F>(&self, out: &mut [T], row: F)
    where
        F: Fn(usize) -> T + Sync + Send,
    {
        if out.len() >= self.parallel_threshold {
            out.par_iter_mut().enumerate().for_each(|(i, c)| *c = row(i));
        } else {
            for (i, c) in out.iter_mut().enumerate() {
                *c = row(i);
            }
        }
    }

    /// Write the instantaneous coupling input of every region into `out`
    pub fn compute(&self, s_e: &[T], out: &mut [T]) {
        debug_assert_eq!(s_e.len(), out.len());
        self.fill(out, |i| self.row_sum(i, s_e));
    }

    /// Record `s_e` as the newest millisecond (delayed engines) and write the
    /// coupling input of every region into `out`
    pub fn advance(&mut self, s_e: &[T], out: &mut [T]) {
        debug_assert_eq!(s_e.len(), out.len());
        if let Some(line) = self.delays.as_mut() {
            line.push(s_e);
        }
        match &self.delays {
            None => self.compute(s_e, out),
            Some(line) => self.fill(out, |i| self.delayed_row_sum(i, line)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectome::ConnectomeOptions;
    use ndarray::{array, Array2};

    #[test]
    fn test_weighted_sum_row_is_target() {
        let sc = array![[0.0, 2.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.5, 0.0]];
        let c = Connectome::new(sc, &ConnectomeOptions::default()).unwrap();
        let engine = CouplingEngine::<f64>::new(&c);
        let s_e = [0.1, 0.2, 0.4];
        let mut out = [0.0; 3];
        engine.compute(&s_e, &mut out);
        assert!((out[0] - 0.4).abs() < 1e-12);
        assert!((out[1] - 0.5).abs() < 1e-12);
        assert!((out[2] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let n = 64;
        let sc = Array2::from_shape_fn((n, n), |(i, j)| ((i * 7 + j * 3) % 11) as f64 / 10.0);
        let c = Connectome::new(sc, &ConnectomeOptions::default()).unwrap();
        let sequential = CouplingEngine::<f32>::new(&c).with_parallel_threshold(usize::MAX);
        let parallel = CouplingEngine::<f32>::new(&c).with_parallel_threshold(1);
        let s_e: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();
        let mut a = vec![0.0f32; n];
        let mut b = vec![0.0f32; n];
        sequential.compute(&s_e, &mut a);
        parallel.compute(&s_e, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_isolated_regions_have_zero_input() {
        let c = Connectome::isolated(4).unwrap();
        let engine = CouplingEngine::<f64>::new(&c);
        let mut out = [1.0; 4];
        engine.compute(&[0.5; 4], &mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(engine.n_regions(), 4);
    }

    fn delayed_pair(distance_mm: f64, velocity: f64) -> CouplingEngine<f64> {
        // Region 0 receives from region 1 over `distance_mm`; region 1 from 0 instantly
        let options = ConnectomeOptions {
            distances: Some(array![[0.0, distance_mm], [0.0, 0.0]]),
            ..Default::default()
        };
        let c = Connectome::new(array![[0.0, 2.0], [1.0, 0.0]], &options).unwrap();
        CouplingEngine::delayed(&c, velocity).unwrap()
    }

    #[test]
    fn test_delayed_source_reaches_target_after_delay() {
        // 6 mm at 2 m/s = 3 ms
        let mut engine = delayed_pair(6.0, 2.0);
        assert_eq!(engine.max_delay_ms(), 3);
        let mut out = [0.0; 2];

        engine.advance(&[0.1, 0.1], &mut out);
        assert_eq!(out, [0.2, 0.1]);

        // Source 1 jumps at 1 ms
        engine.advance(&[0.5, 0.9], &mut out);
        assert_eq!(out[0], 0.2);
        assert_eq!(out[1], 0.5);
        engine.advance(&[0.5, 0.9], &mut out);
        assert_eq!(out[0], 0.2);
        engine.advance(&[0.5, 0.9], &mut out);
        assert_eq!(out[0], 0.2);

        // 1 ms + 3 ms
        engine.advance(&[0.5, 0.9], &mut out);
        assert!((out[0] - 1.8).abs() < 1e-15);
    }

    #[test]
    fn test_zero_delay_matches_instantaneous() {
        let mut delayed = delayed_pair(0.0, 1.0);
        let c = Connectome::new(array![[0.0, 2.0], [1.0, 0.0]], &ConnectomeOptions::default())
            .unwrap();
        let instant = CouplingEngine::<f64>::new(&c);
        let mut a = [0.0; 2];
        let mut b = [0.0; 2];
        for s_e in [[0.1, 0.2], [0.3, 0.7], [0.6, 0.4]] {
            delayed.advance(&s_e, &mut a);
            instant.compute(&s_e, &mut b);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_delay_rounds_to_whole_milliseconds() {
        assert_eq!(delayed_pair(7.0, 2.0).max_delay_ms(), 4);
        assert_eq!(delayed_pair(7.4, 2.0).max_delay_ms(), 4);
        assert_eq!(delayed_pair(1.4, 2.0).max_delay_ms(), 1);
    }

    #[test]
    fn test_delayed_requires_distances_and_positive_velocity() {
        let plain = Connectome::isolated(2).unwrap();
        assert!(CouplingEngine::<f64>::delayed(&plain, 1.0).is_err());

        let options = ConnectomeOptions {
            distances: Some(Array2::zeros((2, 2))),
            ..Default::default()
        };
        let c = Connectome::new(array![[0.0, 1.0], [1.0, 0.0]], &options).unwrap();
        assert!(CouplingEngine::<f64>::delayed(&c, 0.0).is_err());
        assert!(CouplingEngine::<f64>::delayed(&c, f64::NAN).is_err());
        assert!(CouplingEngine::<f64>::delayed(&c, 0.5).is_ok());
    }
}
