// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration → engine wiring
//!
//! Maps a [`BnmConfig`] onto the engine's typed settings and loads
//! structural connectivity from whitespace-separated text.
//!
//! ```text
//! BnmConfig ─┬→ BaseParameters        (model + hemodynamics + dt)
//!            ├→ RunSettings           (simulation, fic, connectivity + distances, noise, output)
//!            ├→ SimulationParameters  (G and default regional weights)
//!            └→ Precision
//! ```

use std::path::{Path, PathBuf};

use bnm_config::{BnmConfig, ConfigError};
use bnm_engine::{
    ConnectomeOptions, EdgeDropout, FicMode, FicSettings, HemodynamicDrive, NoiseMode,
    NoiseSettings, RunSettings, SamplingMode, SimulationParameters,
};
use bnm_neural::{
    BaseParameters, HemodynamicParameters, HemodynamicPreset, Hemisphere, InstanceId, ModelError,
    Precision,
};
use bnm_observability::{LogFormat, LoggingConfig};
use ndarray::Array2;
use tracing::{debug, info};

/// Errors raised while turning configuration and input files into engine inputs
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Failed to read matrix {path}: {source}")]
    ScRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed matrix at line {line}: {reason}")]
    ScParse { line: usize, reason: String },

    #[error("Unknown {field} '{value}'")]
    UnknownOption { field: &'static str, value: String },
}

pub type SetupResult<T> = Result<T, SetupError>;

fn unknown(field: &'static str, value: &str) -> SetupError {
    SetupError::UnknownOption {
        field,
        value: value.to_string(),
    }
}

/// Typed engine inputs derived from one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSetup {
    pub base: BaseParameters,
    pub settings: RunSettings,
    pub precision: Precision,
    /// Global coupling
    pub g: f64,
    pub w_ee: f64,
    pub w_ei: f64,
    /// Used only when FIC is disabled
    pub w_ie: f64,
    /// Conduction velocity (m/s)
    pub v: f64,
}

impl ModelSetup {
    /// Map every section; the result is validated by the engine when a
    /// simulator is built.
    pub fn from_config(config: &BnmConfig) -> SetupResult<Self> {
        let setup = Self {
            base: base_parameters(config)?,
            settings: run_settings(config)?,
            precision: precision(config)?,
            g: config.simulation.global_coupling,
            w_ee: config.model.w_ee,
            w_ei: config.model.w_ei,
            w_ie: config.model.w_ie,
            v: config.simulation.conduction_velocity,
        };
        debug!(
            target: "bnm",
            "Setup: precision={}, fic={:?}, G={}, duration={} s",
            setup.precision, setup.settings.fic.mode, setup.g, setup.settings.duration_s
        );
        Ok(setup)
    }

    /// Homogeneous parameter set from the configured regional defaults
    pub fn parameters(&self, id: InstanceId, n_regions: usize) -> SimulationParameters {
        SimulationParameters {
            id,
            g: self.g,
            w_ee: vec![self.w_ee; n_regions],
            w_ei: vec![self.w_ei; n_regions],
            w_ie: vec![self.w_ie; n_regions],
            v: self.v,
        }
    }
}

pub fn precision(config: &BnmConfig) -> SetupResult<Precision> {
    match config.system.precision.as_str() {
        "double" => Ok(Precision::Double),
        "single" => Ok(Precision::Single),
        other => Err(unknown("precision", other)),
    }
}

/// Physical constants (`[model]`, `[hemodynamics]`, `simulation.dt_ms`)
pub fn base_parameters(config: &BnmConfig) -> SetupResult<BaseParameters> {
    let m = &config.model;
    let h = &config.hemodynamics;

    let preset = match h.preset.as_str() {
        "friston2003" => HemodynamicPreset::Friston2003,
        "heinzle2016-3t" => HemodynamicPreset::Heinzle2016ThreeTesla,
        "custom" => match (h.k1, h.k2, h.k3) {
            (Some(k1), Some(k2), Some(k3)) => HemodynamicPreset::Custom { k1, k2, k3 },
            _ => {
                return Err(ModelError::invalid_parameter(
                    "hemodynamics.preset",
                    "custom preset requires k1, k2 and k3",
                )
                .into())
            }
        },
        other => return Err(unknown("hemodynamic preset", other)),
    };

    Ok(BaseParameters {
        dt_ms: config.simulation.dt_ms,
        j_nmda: m.j_nmda,
        a_e: m.a_e,
        b_e: m.b_e,
        d_e: m.d_e,
        a_i: m.a_i,
        b_i: m.b_i,
        d_i: m.d_i,
        gamma_e_s: m.gamma_e_s,
        gamma_i_s: m.gamma_i_s,
        tau_e_s: m.tau_e_s,
        tau_i_s: m.tau_i_s,
        sigma: m.sigma,
        i_0: m.i_0,
        w_e: m.w_e,
        w_i: m.w_i,
        w_ii: m.w_ii,
        i_ext: m.i_ext,
        target_rate_e: m.target_rate_e,
        reference_w_ei: m.reference_w_ei,
        hemodynamics: HemodynamicParameters {
            rho: h.rho,
            alpha: h.alpha,
            tau: h.tau,
            gamma: h.gamma,
            kappa: h.kappa,
            v0: h.v0,
            bw_dt_s: h.bw_dt_s,
            preset,
        },
    })
}

/// Run-level settings (`[simulation]`, `[fic]`, `[connectivity]`, `[noise]`, `[output]`)
pub fn run_settings(config: &BnmConfig) -> SetupResult<RunSettings> {
    let sim = &config.simulation;

    let sampling_mode = match sim.sampling_mode.as_str() {
        "decimate" => SamplingMode::Decimate,
        "average" => SamplingMode::Average,
        other => return Err(unknown("sampling mode", other)),
    };

    let hemodynamic_drive = match config.hemodynamics.drive.as_str() {
        "excitatory_gating" => HemodynamicDrive::ExcitatoryGating,
        "excitatory_rate" => HemodynamicDrive::ExcitatoryRate,
        other => return Err(unknown("hemodynamic drive", other)),
    };

    Ok(RunSettings {
        duration_s: sim.duration_s,
        tr_s: sim.tr_s,
        bold_remove_s: sim.bold_remove_s,
        sampling_mode,
        fic: fic_settings(config)?,
        connectivity: connectome_options(config)?,
        sync_msec: sim.sync_msec,
        hemodynamic_drive,
        noise: noise_settings(config)?,
        extended_output: config.output.extended_output,
        extended_output_ts: config.output.extended_output_ts,
        sim_verbose: sim.sim_verbose,
        progress_interval_ms: sim.progress_interval_ms,
        abort_on_fic_failure: config.fic.abort_on_failure,
    })
}

fn fic_settings(config: &BnmConfig) -> SetupResult<FicSettings> {
    let fic = &config.fic;
    let mode = match fic.mode.as_str() {
        "disabled" => FicMode::Disabled,
        "analytic" => FicMode::Analytic,
        "numerical" => FicMode::Numerical,
        other => return Err(unknown("FIC mode", other)),
    };
    Ok(FicSettings {
        mode,
        max_trials: fic.max_trials,
        initial_delta: fic.initial_delta,
        tolerance_hz: fic.tolerance_hz,
        trial_duration_ms: fic.trial_duration_ms,
        sampling_start_ms: fic.sampling_start_ms,
        sampling_end_ms: fic.sampling_end_ms,
        verbose: fic.verbose,
    })
}

fn noise_settings(config: &BnmConfig) -> SetupResult<NoiseSettings> {
    let mode = match config.noise.mode.as_str() {
        "streamed" => NoiseMode::Streamed,
        "segmented" => NoiseMode::Segmented {
            segment_ms: config.noise.segment_ms,
        },
        other => return Err(unknown("noise mode", other)),
    };
    Ok(NoiseSettings {
        seed: config.noise.seed,
        mode,
    })
}

/// Connectivity section; reads the distance matrix when `sc_dist_path` is set
pub fn connectome_options(config: &BnmConfig) -> SetupResult<ConnectomeOptions> {
    let conn = &config.connectivity;

    let hemispheres = if conn.hemispheres.is_empty() {
        None
    } else {
        let labels = conn
            .hemispheres
            .iter()
            .map(|label| match label.as_str() {
                "left" => Ok(Hemisphere::Left),
                "right" => Ok(Hemisphere::Right),
                other => Err(unknown("hemisphere", other)),
            })
            .collect::<SetupResult<Vec<_>>>()?;
        Some(labels)
    };

    let dropout = match conn.dropout.as_str() {
        "none" => EdgeDropout::None,
        "below_threshold" => EdgeDropout::BelowThreshold {
            min_weight: conn.dropout_min_weight,
        },
        "random" => EdgeDropout::Random {
            probability: conn.dropout_probability,
            seed: conn.dropout_seed,
        },
        other => return Err(unknown("dropout policy", other)),
    };

    let distances = if conn.sc_dist_path.as_os_str().is_empty() {
        None
    } else {
        Some(load_matrix(&conn.sc_dist_path, "distance")?)
    };

    Ok(ConnectomeOptions {
        include_interhemispheric: conn.include_interhemispheric,
        hemispheres,
        dropout,
        distances,
    })
}

/// Logging section → subscriber settings; an empty `log_dir` means console only
pub fn logging_config(config: &BnmConfig) -> SetupResult<LoggingConfig> {
    let format = config
        .logging
        .format
        .parse::<LogFormat>()
        .map_err(|_| unknown("log format", &config.logging.format))?;
    let file_dir = if config.logging.log_dir.as_os_str().is_empty() {
        None
    } else {
        Some(config.logging.log_dir.clone())
    };
    Ok(LoggingConfig {
        level: config.logging.global_log_level.clone(),
        format,
        file_dir,
    })
}

/// Parse a square SC matrix: one row per line (row = target region),
/// whitespace- or comma-separated. Blank lines and `#` comments are skipped.
pub fn parse_sc(text: &str) -> SetupResult<Array2<f64>> {
    let mut values = Vec::new();
    let mut n_cols: Option<usize> = None;
    let mut n_rows = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                tok.parse::<f64>().map_err(|e| SetupError::ScParse {
                    line: idx + 1,
                    reason: format!("'{}': {}", tok, e),
                })
            })
            .collect::<SetupResult<Vec<f64>>>()?;

        match n_cols {
            None => n_cols = Some(row.len()),
            Some(expected) if expected != row.len() => {
                return Err(SetupError::ScParse {
                    line: idx + 1,
                    reason: format!("expected {} columns, got {}", expected, row.len()),
                });
            }
            Some(_) => {}
        }
        values.extend(row);
        n_rows += 1;
    }

    let n_cols = n_cols.unwrap_or(0);
    if n_rows == 0 {
        return Err(SetupError::ScParse {
            line: 0,
            reason: "no rows".to_string(),
        });
    }
    if n_rows != n_cols {
        return Err(SetupError::ScParse {
            line: 0,
            reason: format!("matrix is {}x{}, must be square", n_rows, n_cols),
        });
    }

    Array2::from_shape_vec((n_rows, n_cols), values).map_err(|e| SetupError::ScParse {
        line: 0,
        reason: e.to_string(),
    })
}

pub fn load_sc(path: &Path) -> SetupResult<Array2<f64>> {
    load_matrix(path, "SC")
}

fn load_matrix(path: &Path, kind: &str) -> SetupResult<Array2<f64>> {
    let text = std::fs::read_to_string(path).map_err(|source| SetupError::ScRead {
        path: path.to_path_buf(),
        source,
    })?;
    let matrix = parse_sc(&text)?;
    info!(
        target: "bnm",
        "Loaded {}x{} {} matrix from {}",
        matrix.nrows(),
        matrix.ncols(),
        kind,
        path.display()
    );
    Ok(matrix)
}
