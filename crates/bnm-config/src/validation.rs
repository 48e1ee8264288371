// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! This module checks that configuration values are within valid ranges,
//! name known options, and are consistent with each other. All problems are
//! collected and reported together.

use crate::{BnmConfig, ConfigError, ConfigResult};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    UnknownOption {
        field: String,
        value: String,
        allowed: &'static [&'static str],
    },
    MissingRequired {
        field: String,
    },
    InvalidValue {
        field: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOption {
                field,
                value,
                allowed,
            } => {
                write!(
                    f,
                    "{} = '{}' is not one of: {}",
                    field,
                    value,
                    allowed.join(", ")
                )
            }
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

pub const PRECISIONS: &[&str] = &["double", "single"];
pub const SAMPLING_MODES: &[&str] = &["decimate", "average"];
pub const HEMODYNAMIC_DRIVES: &[&str] = &["excitatory_gating", "excitatory_rate"];
pub const HEMODYNAMIC_PRESETS: &[&str] = &["friston2003", "heinzle2016-3t", "custom"];
pub const FIC_MODES: &[&str] = &["disabled", "analytic", "numerical"];
pub const DROPOUT_POLICIES: &[&str] = &["none", "below_threshold", "random"];
pub const NOISE_MODES: &[&str] = &["streamed", "segmented"];
pub const HEMISPHERES: &[&str] = &["left", "right"];
pub const LOG_FORMATS: &[&str] = &["text", "json"];

/// Validate the complete configuration
///
/// Checks for:
/// - Known values of enumerated options
/// - Valid value ranges
/// - Cross-field consistency (windows, required companions)
///
/// Step-multiple checks need the model constants and are done when the
/// simulator is built.
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` with details if validation fails
pub fn validate_config(config: &BnmConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_options(config, &mut errors);
    validate_value_ranges(config, &mut errors);
    validate_consistency(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn check_option(
    field: &str,
    value: &str,
    allowed: &'static [&'static str],
    errors: &mut Vec<ConfigValidationError>,
) {
    if !allowed.contains(&value) {
        errors.push(ConfigValidationError::UnknownOption {
            field: field.to_string(),
            value: value.to_string(),
            allowed,
        });
    }
}

/// Validate that enumerated options name known values
fn validate_options(config: &BnmConfig, errors: &mut Vec<ConfigValidationError>) {
    check_option("system.precision", &config.system.precision, PRECISIONS, errors);
    check_option(
        "simulation.sampling_mode",
        &config.simulation.sampling_mode,
        SAMPLING_MODES,
        errors,
    );
    check_option(
        "hemodynamics.drive",
        &config.hemodynamics.drive,
        HEMODYNAMIC_DRIVES,
        errors,
    );
    check_option(
        "hemodynamics.preset",
        &config.hemodynamics.preset,
        HEMODYNAMIC_PRESETS,
        errors,
    );
    check_option("fic.mode", &config.fic.mode, FIC_MODES, errors);
    check_option(
        "connectivity.dropout",
        &config.connectivity.dropout,
        DROPOUT_POLICIES,
        errors,
    );
    check_option("noise.mode", &config.noise.mode, NOISE_MODES, errors);
    check_option("logging.format", &config.logging.format, LOG_FORMATS, errors);
    for (i, label) in config.connectivity.hemispheres.iter().enumerate() {
        check_option(
            &format!("connectivity.hemispheres[{i}]"),
            label,
            HEMISPHERES,
            errors,
        );
    }
}

fn positive(field: &str, value: f64, errors: &mut Vec<ConfigValidationError>) {
    if !(value.is_finite() && value > 0.0) {
        errors.push(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be positive, got {value}"),
        });
    }
}

fn non_negative(field: &str, value: f64, errors: &mut Vec<ConfigValidationError>) {
    if !(value.is_finite() && value >= 0.0) {
        errors.push(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be >= 0, got {value}"),
        });
    }
}

/// Validate value ranges
fn validate_value_ranges(config: &BnmConfig, errors: &mut Vec<ConfigValidationError>) {
    let sim = &config.simulation;
    positive("simulation.duration_s", sim.duration_s, errors);
    positive("simulation.tr_s", sim.tr_s, errors);
    non_negative("simulation.bold_remove_s", sim.bold_remove_s, errors);
    positive("simulation.dt_ms", sim.dt_ms, errors);
    positive("simulation.progress_interval_ms", sim.progress_interval_ms, errors);
    if !sim.global_coupling.is_finite() {
        errors.push(ConfigValidationError::InvalidValue {
            field: "simulation.global_coupling".to_string(),
            reason: "must be finite".to_string(),
        });
    }

    if config.connectivity.sc_dist_path.as_os_str().is_empty() {
        non_negative("simulation.conduction_velocity", sim.conduction_velocity, errors);
    } else {
        positive("simulation.conduction_velocity", sim.conduction_velocity, errors);
    }

    let m = &config.model;
    for (field, value) in [
        ("model.a_e", m.a_e),
        ("model.d_e", m.d_e),
        ("model.a_i", m.a_i),
        ("model.d_i", m.d_i),
        ("model.gamma_e_s", m.gamma_e_s),
        ("model.gamma_i_s", m.gamma_i_s),
        ("model.tau_e_s", m.tau_e_s),
        ("model.tau_i_s", m.tau_i_s),
        ("model.target_rate_e", m.target_rate_e),
    ] {
        positive(field, value, errors);
    }
    for (field, value) in [
        ("model.j_nmda", m.j_nmda),
        ("model.sigma", m.sigma),
        ("model.w_e", m.w_e),
        ("model.w_i", m.w_i),
        ("model.w_ii", m.w_ii),
        ("model.w_ee", m.w_ee),
        ("model.w_ei", m.w_ei),
    ] {
        non_negative(field, value, errors);
    }

    let h = &config.hemodynamics;
    positive("hemodynamics.bw_dt_s", h.bw_dt_s, errors);
    for (field, value) in [
        ("hemodynamics.alpha", h.alpha),
        ("hemodynamics.tau", h.tau),
        ("hemodynamics.gamma", h.gamma),
        ("hemodynamics.kappa", h.kappa),
        ("hemodynamics.v0", h.v0),
    ] {
        positive(field, value, errors);
    }
    if !(h.rho > 0.0 && h.rho < 1.0) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "hemodynamics.rho".to_string(),
            reason: "must be between 0.0 and 1.0 (exclusive)".to_string(),
        });
    }

    let fic = &config.fic;
    if fic.mode == "numerical" && fic.max_trials == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "fic.max_trials".to_string(),
            reason: "must be at least 1 for numerical FIC".to_string(),
        });
    }
    positive("fic.initial_delta", fic.initial_delta, errors);
    non_negative("fic.tolerance_hz", fic.tolerance_hz, errors);
    positive("fic.trial_duration_ms", fic.trial_duration_ms, errors);

    let c = &config.connectivity;
    if c.dropout == "random" && !(0.0..=1.0).contains(&c.dropout_probability) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "connectivity.dropout_probability".to_string(),
            reason: "must be between 0.0 and 1.0".to_string(),
        });
    }

    if config.noise.mode == "segmented" {
        positive("noise.segment_ms", config.noise.segment_ms, errors);
    }
}

/// Validate cross-field constraints
fn validate_consistency(config: &BnmConfig, errors: &mut Vec<ConfigValidationError>) {
    let sim = &config.simulation;
    if sim.bold_remove_s >= sim.duration_s {
        errors.push(ConfigValidationError::InvalidValue {
            field: "simulation.bold_remove_s".to_string(),
            reason: format!(
                "transient ({} s) leaves no BOLD window in a {} s run",
                sim.bold_remove_s, sim.duration_s
            ),
        });
    }

    let fic = &config.fic;
    if fic.mode == "numerical" {
        let window_ok = fic.sampling_start_ms >= 0.0
            && fic.sampling_start_ms < fic.sampling_end_ms
            && fic.sampling_end_ms <= fic.trial_duration_ms
            && fic.sampling_end_ms <= sim.duration_s * 1000.0;
        if !window_ok {
            errors.push(ConfigValidationError::InvalidValue {
                field: "fic.sampling_start_ms/sampling_end_ms".to_string(),
                reason: format!(
                    "window [{}, {}) ms must be non-empty and lie within the {} ms trial and the {} s run",
                    fic.sampling_start_ms, fic.sampling_end_ms, fic.trial_duration_ms, sim.duration_s
                ),
            });
        }
    }

    let h = &config.hemodynamics;
    if h.preset == "custom" {
        for (field, value) in [
            ("hemodynamics.k1", h.k1),
            ("hemodynamics.k2", h.k2),
            ("hemodynamics.k3", h.k3),
        ] {
            if value.is_none() {
                errors.push(ConfigValidationError::MissingRequired {
                    field: field.to_string(),
                });
            }
        }
    }

    if config.output.extended_output_ts && !config.output.extended_output {
        errors.push(ConfigValidationError::InvalidValue {
            field: "output.extended_output_ts".to_string(),
            reason: "requires output.extended_output".to_string(),
        });
    }
}
