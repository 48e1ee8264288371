// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{BnmConfig, ConfigError, ConfigResult};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const CONFIG_FILE_NAME: &str = "bnm_configuration.toml";

/// Find the configuration file
///
/// Search order:
/// 1. `BNM_CONFIG_PATH` environment variable
/// 2. Current working directory: `./bnm_configuration.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("BNM_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by BNM_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Configuration file '{}' not found in any of these locations:\n{}\n\nSet BNM_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found, contains invalid TOML, or an
/// override names an unknown key or carries an unparsable value
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<BnmConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: BnmConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config)?;
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    Ok(config)
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true/false, 1/0 or yes/no".to_string(),
        }),
    }
}

fn set_parsed<T>(target: &mut T, key: &str, value: &str) -> ConfigResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    *target = value.parse::<T>().map_err(|e| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Apply one named override; shared by the environment and CLI layers
fn apply_override(config: &mut BnmConfig, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        // System
        "max_cores" => set_parsed(&mut config.system.max_cores, key, value)?,
        "precision" => config.system.precision = value.to_lowercase(),
        "data_dir" => config.system.data_dir = PathBuf::from(value),

        // Simulation
        "duration_s" => set_parsed(&mut config.simulation.duration_s, key, value)?,
        "tr_s" => set_parsed(&mut config.simulation.tr_s, key, value)?,
        "bold_remove_s" => set_parsed(&mut config.simulation.bold_remove_s, key, value)?,
        "sampling_mode" => config.simulation.sampling_mode = value.to_lowercase(),
        "dt_ms" => set_parsed(&mut config.simulation.dt_ms, key, value)?,
        "sync_msec" => config.simulation.sync_msec = parse_bool(key, value)?,
        "global_coupling" => set_parsed(&mut config.simulation.global_coupling, key, value)?,
        "conduction_velocity" => {
            set_parsed(&mut config.simulation.conduction_velocity, key, value)?
        }
        "sim_verbose" => config.simulation.sim_verbose = parse_bool(key, value)?,

        // FIC
        "fic_mode" => config.fic.mode = value.to_lowercase(),
        "fic_max_trials" => set_parsed(&mut config.fic.max_trials, key, value)?,
        "fic_tolerance_hz" => set_parsed(&mut config.fic.tolerance_hz, key, value)?,
        "fic_verbose" => config.fic.verbose = parse_bool(key, value)?,

        // Connectivity
        "sc_path" => config.connectivity.sc_path = PathBuf::from(value),
        "sc_dist_path" => config.connectivity.sc_dist_path = PathBuf::from(value),

        // Noise
        "noise_seed" => set_parsed(&mut config.noise.seed, key, value)?,
        "noise_mode" => config.noise.mode = value.to_lowercase(),

        // Output and logging
        "summary_path" => config.output.summary_path = PathBuf::from(value),
        "log_level" => config.logging.global_log_level = value.to_string(),
        "log_format" => config.logging.format = value.to_lowercase(),

        _ => return Err(ConfigError::UnknownOverride(key.to_string())),
    }
    Ok(())
}

/// Keys accepted by [`apply_environment_overrides`] (as `BNM_<KEY>`) and
/// [`apply_cli_overrides`]
pub const OVERRIDE_KEYS: &[&str] = &[
    "max_cores",
    "precision",
    "data_dir",
    "duration_s",
    "tr_s",
    "bold_remove_s",
    "sampling_mode",
    "dt_ms",
    "sync_msec",
    "global_coupling",
    "conduction_velocity",
    "sim_verbose",
    "fic_mode",
    "fic_max_trials",
    "fic_tolerance_hz",
    "fic_verbose",
    "sc_path",
    "sc_dist_path",
    "noise_seed",
    "noise_mode",
    "summary_path",
    "log_level",
    "log_format",
];

/// Apply environment variable overrides to configuration
///
/// Every key in [`OVERRIDE_KEYS`] is read from `BNM_<KEY>`, e.g.
/// - `BNM_MAX_CORES` -> `system.max_cores`
/// - `BNM_DURATION_S` -> `simulation.duration_s`
/// - `BNM_FIC_MODE` -> `fic.mode`
/// - `BNM_NOISE_SEED` -> `noise.seed`
/// - `BNM_LOG_LEVEL` -> `logging.global_log_level`
///
/// # Errors
///
/// Returns `ConfigError::InvalidOverride` if a variable does not parse
pub fn apply_environment_overrides(config: &mut BnmConfig) -> ConfigResult<()> {
    for key in OVERRIDE_KEYS {
        if let Ok(value) = env::var(format!("BNM_{}", key.to_uppercase())) {
            apply_override(config, key, &value)?;
        }
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"duration_s": "120", "fic_mode": "analytic"}`)
///
/// # Errors
///
/// Returns `ConfigError::UnknownOverride` for a key not in [`OVERRIDE_KEYS`]
/// and `ConfigError::InvalidOverride` for a value that does not parse
pub fn apply_cli_overrides(
    config: &mut BnmConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    for (key, value) in cli_args {
        apply_override(config, key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var("BNM_CONFIG_PATH", config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var("BNM_CONFIG_PATH");

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_missing_env_path_is_an_error() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var("BNM_CONFIG_PATH", "/definitely/not/here.toml");
        let result = find_config_file();
        env::remove_var("BNM_CONFIG_PATH");

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("BNM_DURATION_S");
        env::remove_var("BNM_MAX_CORES");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[system]").unwrap();
        writeln!(file, "max_cores = 4").unwrap();
        writeln!(file, "[simulation]").unwrap();
        writeln!(file, "duration_s = 120.0").unwrap();
        writeln!(file, "[hemodynamics]").unwrap();
        writeln!(file, "preset = \"custom\"").unwrap();
        writeln!(file, "k1 = 3.72").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.system.max_cores, 4);
        assert_eq!(config.simulation.duration_s, 120.0);
        assert_eq!(config.hemodynamics.k1, Some(3.72));
        assert_eq!(config.hemodynamics.k2, None);
        // Untouched sections keep their defaults
        assert_eq!(config.fic.max_trials, 5);
        assert_eq!(config.noise.seed, 410);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[simulation").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = BnmConfig::default();

        env::set_var("BNM_FIC_MODE", "Analytic");
        env::set_var("BNM_NOISE_SEED", "7");

        let result = apply_environment_overrides(&mut config);

        env::remove_var("BNM_FIC_MODE");
        env::remove_var("BNM_NOISE_SEED");

        result.unwrap();
        assert_eq!(config.fic.mode, "analytic");
        assert_eq!(config.noise.seed, 7);
    }

    #[test]
    fn test_unparsable_environment_value_is_an_error() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = BnmConfig::default();

        env::set_var("BNM_MAX_CORES", "not-a-number");
        let result = apply_environment_overrides(&mut config);
        env::remove_var("BNM_MAX_CORES");

        match result {
            Err(ConfigError::InvalidOverride { key, value, .. }) => {
                assert_eq!(key, "max_cores");
                assert_eq!(value, "not-a-number");
            }
            other => panic!("expected invalid override, got {other:?}"),
        }
        assert_eq!(config.system.max_cores, 0);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = BnmConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("duration_s".to_string(), "90".to_string());
        cli_args.insert("sync_msec".to_string(), "yes".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.simulation.duration_s, 90.0);
        assert!(config.simulation.sync_msec);
    }

    #[test]
    fn test_unknown_cli_key_is_an_error() {
        let mut config = BnmConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("fic_max_trial".to_string(), "3".to_string());

        let result = apply_cli_overrides(&mut config, &cli_args);
        assert!(matches!(result, Err(ConfigError::UnknownOverride(ref k)) if k == "fic_max_trial"));
        assert_eq!(config.fic.max_trials, 5);
    }

    #[test]
    fn test_unparsable_cli_value_is_an_error() {
        let mut config = BnmConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("duration_s".to_string(), "6O".to_string());

        let result = apply_cli_overrides(&mut config, &cli_args);
        match result {
            Err(ConfigError::InvalidOverride { key, value, .. }) => {
                assert_eq!(key, "duration_s");
                assert_eq!(value, "6O");
            }
            other => panic!("expected invalid override, got {other:?}"),
        }
        assert_eq!(config.simulation.duration_s, 60.0);

        cli_args.clear();
        cli_args.insert("sync_msec".to_string(), "maybe".to_string());
        assert!(matches!(
            apply_cli_overrides(&mut config, &cli_args),
            Err(ConfigError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn test_load_config_rejects_bad_override() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        File::create(&config_path).unwrap();

        let mut cli_args = HashMap::new();
        cli_args.insert("duration_s".to_string(), "6O".to_string());
        assert!(matches!(
            load_config(Some(&config_path), Some(&cli_args)),
            Err(ConfigError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn test_every_override_key_is_applied() {
        let mut config = BnmConfig::default();
        for key in OVERRIDE_KEYS {
            assert!(apply_override(&mut config, key, "1").is_ok(), "key {key} not handled");
        }
        assert!(matches!(
            apply_override(&mut config, "api_port", "1"),
            Err(ConfigError::UnknownOverride(_))
        ));
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        // CLI overrides take precedence over environment variables
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[simulation]").unwrap();
        writeln!(file, "duration_s = 30.0").unwrap();
        writeln!(file, "tr_s = 2.0").unwrap();

        env::set_var("BNM_DURATION_S", "45");
        env::set_var("BNM_TR_S", "0.5");

        let mut cli_args = HashMap::new();
        cli_args.insert("duration_s".to_string(), "60".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("BNM_DURATION_S");
        env::remove_var("BNM_TR_S");

        // CLI wins for duration, env wins for TR (no CLI override)
        assert_eq!(config.simulation.duration_s, 60.0);
        assert_eq!(config.simulation.tr_s, 0.5);
    }
}
