// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Noise Streams
//!
//! Instance-local standard-normal samples, two per region per step
//! (`ξ_E`, `ξ_I`). Every source is a `ChaCha8Rng` seeded from the run seed
//! and a *stream id*, so the main run and each FIC trial draw from
//! independent, reproducible streams:
//!
//! ```text
//! stream 0                    → main integration
//! stream FIC_STREAM_BASE + k  → FIC trial k
//! ```
//!
//! In segmented mode a fixed-length noise segment is generated once and
//! replayed; every repetition after the first reads it with regions and
//! time points reshuffled.

use bnm_neural::{ModelError, Real, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Stream id of the main integration
pub const MAIN_STREAM: u64 = 0;

/// First stream id used by FIC trials
pub const FIC_STREAM_BASE: u64 = 1 << 32;

/// How noise samples are produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NoiseMode {
    /// Fresh samples for every step of the run
    #[default]
    Streamed,
    /// One segment of `segment_ms`, replayed with reshuffled regions and time points
    Segmented { segment_ms: f64 },
}

/// Seed and mode shared by every stream of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    pub seed: u64,
    pub mode: NoiseMode,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            seed: 410,
            mode: NoiseMode::Streamed,
        }
    }
}

enum Source<T: Real> {
    Streamed,
    Segmented {
        /// `steps × regions × 2`, row-major
        segment: Vec<T>,
        steps: usize,
        region_order: Vec<usize>,
        time_order: Vec<usize>,
        position: usize,
    },
}

/// Per-instance noise generator
pub struct NoiseSource<T: Real> {
    rng: ChaCha8Rng,
    n_regions: usize,
    source: Source<T>,
}

fn seeded(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

#[inline(always)]
fn sample<T: Real>(rng: &mut ChaCha8Rng) -> T {
    let z: f64 = rng.sample(StandardNormal);
    T::from_real(z)
}

impl<T: Real> NoiseSource<T> {
    /// Build the source for `stream`; `dt_ms` sizes the segment in segmented mode
    pub fn new(settings: &NoiseSettings, stream: u64, n_regions: usize, dt_ms: f64) -> Result<Self> {
        let mut rng = seeded(settings.seed, stream);
        let source = match settings.mode {
            NoiseMode::Streamed => Source::Streamed,
            NoiseMode::Segmented { segment_ms } => {
                let steps = (segment_ms / dt_ms).round();
                if !(segment_ms.is_finite() && steps >= 1.0) {
                    return Err(ModelError::configuration(format!(
                        "noise segment of {segment_ms} ms is shorter than one step ({dt_ms} ms)"
                    )));
                }
                let steps = steps as usize;
                let len = steps * n_regions * 2;
                let segment = (0..len).map(|_| sample::<T>(&mut rng)).collect();
                Source::Segmented {
                    segment,
                    steps,
                    region_order: (0..n_regions).collect(),
                    time_order: (0..steps).collect(),
                    position: 0,
                }
            }
        };
        Ok(Self {
            rng,
            n_regions,
            source,
        })
    }

    /// Fill `out` with `(ξ_E, ξ_I)` pairs for one step: `out[2i]`, `out[2i + 1]`
    pub fn fill(&mut self, out: &mut [T]) {
        debug_assert_eq!(out.len(), self.n_regions * 2);
        match &mut self.source {
            Source::Streamed => {
                for x in out.iter_mut() {
                    *x = sample(&mut self.rng);
                }
            }
            Source::Segmented {
                segment,
                steps,
                region_order,
                time_order,
                position,
            } => {
                if *position == *steps {
                    region_order.shuffle(&mut self.rng);
                    time_order.shuffle(&mut self.rng);
                    *position = 0;
                }
                let row = time_order[*position] * self.n_regions * 2;
                for (i, &src) in region_order.iter().enumerate() {
                    out[2 * i] = segment[row + 2 * src];
                    out[2 * i + 1] = segment[row + 2 * src + 1];
                }
                *position += 1;
            }
        }
    }
}
