// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # BOLD Sampler
//!
//! Streams the full-resolution BOLD signal (one value per region per
//! `bw_dt`) into a TR-resolution series:
//!
//! ```text
//! |── transient ──|── TR ──|── TR ──|── TR ──|─ partial ─|
//!   discarded        emit     emit     emit    discarded
//! ```
//!
//! Output length is `floor((duration − transient) / TR)`.

use bnm_neural::constants::steps_per_interval;
use bnm_neural::{ModelError, Real, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How one TR interval is reduced to one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Last sample of the interval
    #[default]
    Decimate,
    /// Mean over the interval
    Average,
}

/// BOLD time series at TR resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoldSeries<T: Real> {
    /// Shape: (samples, regions)
    pub data: Array2<T>,
    /// Sampling interval (s)
    pub tr_s: f64,
}

impl<T: Real> BoldSeries<T> {
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_regions(&self) -> usize {
        self.data.ncols()
    }
}

/// Streaming transient removal and subsampling
#[derive(Debug, Clone)]
pub struct BoldSampler<T: Real> {
    n_regions: usize,
    mode: SamplingMode,
    /// BOLD samples per TR
    factor: u64,
    transient_samples: u64,
    expected_len: usize,
    tr_s: f64,
    seen: u64,
    in_interval: u64,
    acc: Vec<T>,
    rows: Vec<T>,
}

impl<T: Real> BoldSampler<T> {
    /// Validate the sampling window and allocate the output
    pub fn new(
        n_regions: usize,
        bw_dt_s: f64,
        tr_s: f64,
        transient_s: f64,
        duration_s: f64,
        mode: SamplingMode,
    ) -> Result<Self> {
        let window_s = duration_s - transient_s;
        if !(transient_s >= 0.0 && window_s > 0.0) {
            return Err(ModelError::configuration(format!(
                "BOLD sampling window is empty: duration {duration_s} s, transient {transient_s} s"
            )));
        }
        let factor = steps_per_interval(tr_s, bw_dt_s, "TR")?;
        let total = steps_per_interval(duration_s, bw_dt_s, "duration")?;
        let transient_samples = if transient_s == 0.0 {
            0
        } else {
            steps_per_interval(transient_s, bw_dt_s, "BOLD transient")?
        };

        let window = total - transient_samples;
        let expected_len = (window / factor) as usize;
        if expected_len == 0 {
            warn!(
                target: "bnm-engine",
                "BOLD window of {} s is shorter than one TR ({} s); output will be empty",
                window_s,
                tr_s
            );
        }

        Ok(Self {
            n_regions,
            mode,
            factor,
            transient_samples,
            expected_len,
            tr_s,
            seen: 0,
            in_interval: 0,
            acc: vec![T::zero(); n_regions],
            rows: Vec::with_capacity(expected_len * n_regions),
        })
    }

    /// Number of samples the finished series will hold
    pub fn expected_len(&self) -> usize {
        self.expected_len
    }

    pub fn factor(&self) -> u64 {
        self.factor
    }

    fn emitted(&self) -> usize {
        if self.n_regions == 0 {
            0
        } else {
            self.rows.len() / self.n_regions
        }
    }

    /// Feed one full-resolution BOLD sample for every region
    pub fn push(&mut self, bold: &[T]) {
        debug_assert_eq!(bold.len(), self.n_regions);
        self.seen += 1;
        if self.seen <= self.transient_samples || self.emitted() >= self.expected_len {
            return;
        }

        self.in_interval += 1;
        if self.mode == SamplingMode::Average {
            for (a, &b) in self.acc.iter_mut().zip(bold) {
                *a = *a + b;
            }
        }

        if self.in_interval == self.factor {
            match self.mode {
                SamplingMode::Decimate => self.rows.extend_from_slice(bold),
                SamplingMode::Average => {
                    let denom = T::from_real(self.factor as f64);
                    self.rows.extend(self.acc.iter().map(|&a| a / denom));
                    self.acc.iter_mut().for_each(|a| *a = T::zero());
                }
            }
            self.in_interval = 0;
        }
    }

    /// Assemble the series; fails if fewer samples than planned were pushed
    pub fn finish(self) -> Result<BoldSeries<T>> {
        let emitted = self.emitted();
        if emitted != self.expected_len {
            return Err(ModelError::configuration(format!(
                "BOLD sampler received {} of {} planned samples",
                emitted, self.expected_len
            )));
        }
        let data = Array2::from_shape_vec((emitted, self.n_regions), self.rows)
            .map_err(|e| ModelError::configuration(format!("BOLD series shape: {e}")))?;
        Ok(BoldSeries {
            data,
            tr_s: self.tr_s,
        })
    }
}
