// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `bnm_configuration.toml`. Enumerated options are kept as strings here and
//! checked by [`crate::validate_config`]; the simulator maps them onto its
//! own types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BnmConfig {
    pub system: SystemConfig,
    pub simulation: SimulationConfig,
    pub model: ModelConfig,
    pub hemodynamics: HemodynamicsConfig,
    pub fic: FicConfig,
    pub connectivity: ConnectivityConfig,
    pub noise: NoiseConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// System-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub max_cores: usize,
    /// "double" or "single"
    pub precision: String,
    pub data_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_cores: 0, // 0 = auto-detect
            precision: "double".to_string(),
            data_dir: PathBuf::from(""),
        }
    }
}

/// Run length, output resolution and integration options
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub duration_s: f64,
    pub tr_s: f64,
    pub bold_remove_s: f64,
    /// "decimate" or "average"
    pub sampling_mode: String,
    pub dt_ms: f64,
    pub sync_msec: bool,
    pub global_coupling: f64,
    /// Conduction velocity (m/s); used only with `connectivity.sc_dist_path`
    pub conduction_velocity: f64,
    pub sim_verbose: bool,
    pub progress_interval_ms: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_s: 60.0,
            tr_s: 1.0,
            bold_remove_s: 30.0,
            sampling_mode: "decimate".to_string(),
            dt_ms: 0.1,
            sync_msec: false,
            global_coupling: 0.5,
            conduction_velocity: 1.0,
            sim_verbose: false,
            progress_interval_ms: 500.0,
        }
    }
}

/// Reduced Wong-Wang physical constants and default regional weights
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    pub j_nmda: f64,
    pub a_e: f64,
    pub b_e: f64,
    pub d_e: f64,
    pub a_i: f64,
    pub b_i: f64,
    pub d_i: f64,
    pub gamma_e_s: f64,
    pub gamma_i_s: f64,
    pub tau_e_s: f64,
    pub tau_i_s: f64,
    pub sigma: f64,
    pub i_0: f64,
    pub w_e: f64,
    pub w_i: f64,
    pub w_ii: f64,
    pub i_ext: f64,
    pub target_rate_e: f64,
    pub reference_w_ei: f64,
    pub w_ee: f64,
    pub w_ei: f64,
    /// Used only when FIC is disabled
    pub w_ie: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            j_nmda: 0.15,
            a_e: 310.0,
            b_e: 125.0,
            d_e: 0.16,
            a_i: 615.0,
            b_i: 177.0,
            d_i: 0.087,
            gamma_e_s: 0.641,
            gamma_i_s: 1.0,
            tau_e_s: 0.1,
            tau_i_s: 0.01,
            sigma: 0.01,
            i_0: 0.382,
            w_e: 1.0,
            w_i: 0.7,
            w_ii: 1.0,
            i_ext: 0.0,
            target_rate_e: 3.0773270642,
            reference_w_ei: 0.15,
            w_ee: 0.21,
            w_ei: 0.15,
            w_ie: 1.0,
        }
    }
}

/// Balloon-Windkessel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HemodynamicsConfig {
    pub bw_dt_s: f64,
    /// "excitatory_gating" or "excitatory_rate"
    pub drive: String,
    /// "friston2003", "heinzle2016-3t" or "custom"
    pub preset: String,
    pub rho: f64,
    pub alpha: f64,
    pub tau: f64,
    pub gamma: f64,
    pub kappa: f64,
    pub v0: f64,
    /// Required with the "custom" preset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k3: Option<f64>,
}

impl Default for HemodynamicsConfig {
    fn default() -> Self {
        Self {
            bw_dt_s: 0.001,
            drive: "excitatory_gating".to_string(),
            preset: "friston2003".to_string(),
            rho: 0.34,
            alpha: 0.32,
            tau: 0.98,
            gamma: 1.0 / 0.41,
            kappa: 1.0 / 0.65,
            v0: 0.02,
            k1: None,
            k2: None,
            k3: None,
        }
    }
}

/// Feedback inhibition control configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FicConfig {
    /// "disabled", "analytic" or "numerical"
    pub mode: String,
    pub max_trials: u32,
    pub initial_delta: f64,
    pub tolerance_hz: f64,
    pub trial_duration_ms: f64,
    pub sampling_start_ms: f64,
    pub sampling_end_ms: f64,
    pub verbose: bool,
    pub abort_on_failure: bool,
}

impl Default for FicConfig {
    fn default() -> Self {
        Self {
            mode: "numerical".to_string(),
            max_trials: 5,
            initial_delta: 0.02,
            tolerance_hz: 1.0,
            trial_duration_ms: 10_000.0,
            sampling_start_ms: 1_000.0,
            sampling_end_ms: 10_000.0,
            verbose: false,
            abort_on_failure: false,
        }
    }
}

/// Structural connectivity input and edge selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Whitespace-separated square matrix, one row (target region) per line
    pub sc_path: PathBuf,
    /// Fiber length matrix (mm), same layout as the SC; enables conduction delays
    pub sc_dist_path: PathBuf,
    pub include_interhemispheric: bool,
    /// "left"/"right" per region; empty = first half left
    pub hemispheres: Vec<String>,
    /// "none", "below_threshold" or "random"
    pub dropout: String,
    pub dropout_min_weight: f64,
    pub dropout_probability: f64,
    pub dropout_seed: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            sc_path: PathBuf::from(""),
            sc_dist_path: PathBuf::from(""),
            include_interhemispheric: true,
            hemispheres: Vec::new(),
            dropout: "none".to_string(),
            dropout_min_weight: 0.0,
            dropout_probability: 0.0,
            dropout_seed: 0,
        }
    }
}

/// Noise generation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub seed: u64,
    /// "streamed" or "segmented"
    pub mode: String,
    pub segment_ms: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            seed: 410,
            mode: "streamed".to_string(),
            segment_ms: 30_000.0,
        }
    }
}

/// Output selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub extended_output: bool,
    pub extended_output_ts: bool,
    /// Where the run tool writes its JSON summary; empty = stdout
    pub summary_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            extended_output: true,
            extended_output_ts: false,
            summary_path: PathBuf::from(""),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub global_log_level: String,
    /// "text" or "json"
    pub format: String,
    /// Directory for daily-rolling log files; empty = console only
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_log_level: "info".to_string(),
            format: "text".to_string(),
            log_dir: PathBuf::from(""),
        }
    }
}
