// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Structural Connectome
//!
//! Validates the structural connectivity (SC) matrix and builds the
//! *effective* edge list used for coupling:
//!
//! ```text
//! W (n × n, row = target, column = source)
//!   │  drop zero weights
//!   │  drop cross-hemisphere edges      (include_interhemispheric = false)
//!   │  apply edge dropout policy        (threshold / seeded Bernoulli)
//!   ▼
//! CSR rows: target i → [(source j, W_ij, D_ij)]
//! ```
//!
//! An optional distance matrix `D` (mm, same layout as `W`) enables
//! conduction delays; its entries are carried along the effective edges.
//!
//! The connectome is immutable after construction and shared read-only
//! (`Arc`) by every simulation instance.

use bnm_neural::{Hemisphere, ModelError, Result};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Structural edge dropout policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EdgeDropout {
    /// Keep every non-zero edge
    #[default]
    None,
    /// Drop edges with weight strictly below `min_weight`
    BelowThreshold { min_weight: f64 },
    /// Drop each edge independently with `probability` (seeded, reproducible)
    Random { probability: f64, seed: u64 },
}

/// How the effective coupling graph is derived from the SC matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectomeOptions {
    /// Keep edges between left and right hemisphere
    pub include_interhemispheric: bool,
    /// Explicit hemisphere labels; `None` means first half left, second half right
    pub hemispheres: Option<Vec<Hemisphere>>,
    pub dropout: EdgeDropout,
    /// Inter-regional fiber lengths (mm); `Some` enables conduction delays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distances: Option<Array2<f64>>,
}

impl Default for ConnectomeOptions {
    fn default() -> Self {
        Self {
            include_interhemispheric: true,
            hemispheres: None,
            dropout: EdgeDropout::None,
            distances: None,
        }
    }
}

/// Validated SC matrix plus its effective sparse form
#[derive(Debug, Clone)]
pub struct Connectome {
    weights: Array2<f64>,
    hemispheres: Vec<Hemisphere>,
    /// CSR row offsets (len = n + 1)
    row_ptr: Vec<usize>,
    /// Source region per effective edge
    sources: Vec<u32>,
    /// Weight per effective edge
    values: Vec<f64>,
    /// Distance per effective edge (mm)
    edge_distances: Option<Vec<f64>>,
    /// Σ_j effective W_ij per target
    in_strength: Vec<f64>,
    self_connections: usize,
}

impl Connectome {
    /// Validate `weights` and build the effective edge list
    pub fn new(weights: Array2<f64>, options: &ConnectomeOptions) -> Result<Self> {
        let (rows, cols) = weights.dim();
        if rows == 0 || rows != cols {
            return Err(ModelError::invalid_parameter(
                "sc",
                format!("connectivity must be a non-empty square matrix, got {rows}x{cols}"),
            ));
        }
        if rows > u32::MAX as usize {
            return Err(ModelError::invalid_parameter("sc", "too many regions"));
        }
        let n = rows;

        if let Some(((i, j), w)) = weights
            .indexed_iter()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(ModelError::invalid_parameter(
                "sc",
                format!("weight ({i}, {j}) must be finite and >= 0, got {w}"),
            ));
        }

        let hemispheres = match &options.hemispheres {
            Some(labels) if labels.len() != n => {
                return Err(ModelError::invalid_parameter(
                    "hemispheres",
                    format!("expected {n} labels, got {}", labels.len()),
                ));
            }
            Some(labels) => labels.clone(),
            None => default_hemispheres(n),
        };

        match options.dropout {
            EdgeDropout::Random { probability, .. } if !(0.0..=1.0).contains(&probability) => {
                return Err(ModelError::invalid_parameter(
                    "dropout.probability",
                    format!("must lie in [0, 1], got {probability}"),
                ));
            }
            EdgeDropout::BelowThreshold { min_weight } if !min_weight.is_finite() => {
                return Err(ModelError::invalid_parameter(
                    "dropout.min_weight",
                    "must be finite",
                ));
            }
            _ => {}
        }

        if let Some(distances) = &options.distances {
            if distances.dim() != (n, n) {
                return Err(ModelError::invalid_parameter(
                    "sc_dist",
                    format!(
                        "distance matrix must match the {n}x{n} SC, got {}x{}",
                        distances.nrows(),
                        distances.ncols()
                    ),
                ));
            }
            if let Some(((i, j), d)) = distances
                .indexed_iter()
                .find(|(_, d)| !(d.is_finite() && **d >= 0.0))
            {
                return Err(ModelError::invalid_parameter(
                    "sc_dist",
                    format!("distance ({i}, {j}) must be finite and >= 0, got {d}"),
                ));
            }
        }

        let self_connections = (0..n).filter(|&i| weights[[i, i]] != 0.0).count();
        if self_connections > 0 {
            warn!(
                target: "bnm-engine",
                "SC diagonal has {} non-zero self-connection(s); they are kept in the coupling term",
                self_connections
            );
        }

        let mut dropout_rng = match options.dropout {
            EdgeDropout::Random { seed, .. } => Some(ChaCha8Rng::seed_from_u64(seed)),
            _ => None,
        };

        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut sources = Vec::new();
        let mut values = Vec::new();
        let mut edge_distances = options.distances.as_ref().map(|_| Vec::new());
        let mut in_strength = vec![0.0; n];
        let mut dropped = 0usize;
        row_ptr.push(0);

        for i in 0..n {
            for j in 0..n {
                let w = weights[[i, j]];
                if w == 0.0 {
                    continue;
                }
                if !options.include_interhemispheric && hemispheres[i] != hemispheres[j] {
                    continue;
                }
                let keep = match (options.dropout, dropout_rng.as_mut()) {
                    (EdgeDropout::BelowThreshold { min_weight }, _) => w >= min_weight,
                    (EdgeDropout::Random { probability, .. }, Some(rng)) => {
                        rng.gen::<f64>() >= probability
                    }
                    _ => true,
                };
                if !keep {
                    dropped += 1;
                    continue;
                }
                sources.push(j as u32);
                values.push(w);
                if let (Some(edges), Some(distances)) = (&mut edge_distances, &options.distances) {
                    edges.push(distances[[i, j]]);
                }
                in_strength[i] += w;
            }
            row_ptr.push(sources.len());
        }

        debug!(
            target: "bnm-engine",
            "Connectome: {} regions, {} effective edges, {} dropped, delays {}",
            n,
            sources.len(),
            dropped,
            if edge_distances.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            weights,
            hemispheres,
            row_ptr,
            sources,
            values,
            edge_distances,
            in_strength,
            self_connections,
        })
    }

    /// `n` regions without any edges
    pub fn isolated(n: usize) -> Result<Self> {
        Self::new(Array2::zeros((n, n)), &ConnectomeOptions::default())
    }

    pub fn n_regions(&self) -> usize {
        self.in_strength.len()
    }

    pub fn edge_count(&self) -> usize {
        self.sources.len()
    }

    /// Raw (validated) SC matrix
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn hemispheres(&self) -> &[Hemisphere] {
        &self.hemispheres
    }

    /// Σ_j W_ij over the effective edges of target `i`
    pub fn in_strength(&self, region: usize) -> f64 {
        self.in_strength[region]
    }

    pub fn self_connections(&self) -> usize {
        self.self_connections
    }

    /// Effective incoming edges `(source, weight)` of target `region`
    pub fn incoming(&self, region: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[region]..self.row_ptr[region + 1];
        self.sources[range.clone()]
            .iter()
            .zip(&self.values[range])
            .map(|(&j, &w)| (j as usize, w))
    }

    /// True when a distance matrix was supplied
    pub fn has_delays(&self) -> bool {
        self.edge_distances.is_some()
    }

    /// Distance (mm) per effective edge, in CSR order
    pub fn edge_distances(&self) -> Option<&[f64]> {
        self.edge_distances.as_deref()
    }

    /// CSR view: `(row_ptr, sources, values)`
    pub fn csr(&self) -> (&[usize], &[u32], &[f64]) {
        (&self.row_ptr, &self.sources, &self.values)
    }
}

fn default_hemispheres(n: usize) -> Vec<Hemisphere> {
    (0..n)
        .map(|i| {
            if i < n / 2 {
                Hemisphere::Left
            } else {
                Hemisphere::Right
            }
        })
        .collect()
}
