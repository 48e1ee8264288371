// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Single-run driver.
//!
//! Loads `bnm_configuration.toml` (or `--config <path>`), applies `BNM_*`
//! environment and `--set key=value` overrides, reads the SC matrix, runs one
//! simulation and writes a JSON summary to stdout or `output.summary_path`.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;

use bnm::config::{load_config, validate_config, BnmConfig};
use bnm::engine::{SimGroup, Simulator};
use bnm::neural::{InstanceId, ModelConstants, Precision, Real};
use bnm::observability::{debug_flags_help, init_logging, parse_debug_flags};
use bnm::setup::{load_sc, logging_config, ModelSetup};

struct Args {
    config: Option<PathBuf>,
    sc: Option<PathBuf>,
    overrides: HashMap<String, String>,
}

fn usage_and_exit(code: i32) -> ! {
    eprintln!(
        "Usage: run_simulation [--config <path>] [--sc <path>] [--set <key>=<value>]...\n\n\
         Defaults:\n\
         - config: $BNM_CONFIG_PATH, else bnm_configuration.toml in the working directory or a parent\n\
         - sc: connectivity.sc_path from the configuration\n\n\
         {}",
        debug_flags_help()
    );
    process::exit(code);
}

fn parse_args() -> Args {
    let mut parsed = Args {
        config: None,
        sc: None,
        overrides: HashMap::new(),
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit(2));
                parsed.config = Some(PathBuf::from(v));
            }
            "--sc" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit(2));
                parsed.sc = Some(PathBuf::from(v));
            }
            "--set" => {
                let v = args.next().unwrap_or_else(|| usage_and_exit(2));
                let Some((key, value)) = v.split_once('=') else {
                    eprintln!("Expected key=value after --set, got '{v}'");
                    usage_and_exit(2);
                };
                parsed.overrides.insert(key.trim().to_string(), value.trim().to_string());
            }
            "-h" | "--help" => usage_and_exit(0),
            // Consumed by parse_debug_flags
            other if other.starts_with("--debug-") => {}
            other => {
                eprintln!("Unknown argument: {other}");
                usage_and_exit(2);
            }
        }
    }

    parsed
}

fn run<T: Real>(config: &BnmConfig, setup: &ModelSetup, sc_path: &Path) -> Result<serde_json::Value> {
    let sc = load_sc(sc_path)?;
    let constants = Arc::new(ModelConstants::<T>::derive(&setup.base)?);
    let simulator = Arc::new(Simulator::new(constants, Arc::new(setup.settings.clone()), sc)?);
    let params = setup.parameters(InstanceId(0), simulator.n_regions());

    // A one-instance group confines region-level parallelism to max_cores
    let group = SimGroup::new(Arc::clone(&simulator), config.system.max_cores)?;
    let mut run = group.run(std::slice::from_ref(&params));
    let output = match run.results.pop() {
        Some(result) => result.with_context(|| format!("Simulation with G={} failed", params.g))?,
        None => bail!("Simulation group returned no result"),
    };

    info!(
        target: "bnm",
        "Finished: {} BOLD samples x {} regions in {:.2} s",
        output.bold.n_samples(),
        output.bold.n_regions(),
        output.diagnostics.elapsed_us as f64 / 1e6
    );

    Ok(json!({
        "version": bnm::VERSION,
        "precision": T::PRECISION.to_string(),
        "sc_path": sc_path,
        "n_regions": simulator.n_regions(),
        "edges": simulator.connectome().edge_count(),
        "duration_s": config.simulation.duration_s,
        "parameters": params,
        "output": output,
    }))
}

fn main() -> Result<()> {
    let args = parse_args();

    let overrides = (!args.overrides.is_empty()).then_some(&args.overrides);
    let config = load_config(args.config.as_deref(), overrides).context("Failed to load configuration")?;
    validate_config(&config).context("Invalid configuration")?;

    let _logging = init_logging(&parse_debug_flags(), &logging_config(&config)?)?;

    let setup = ModelSetup::from_config(&config)?;
    let sc_path = match args.sc {
        Some(path) => path,
        None if !config.connectivity.sc_path.as_os_str().is_empty() => {
            config.connectivity.sc_path.clone()
        }
        None => bail!("No SC matrix given (use --sc or connectivity.sc_path)"),
    };

    let summary = match setup.precision {
        Precision::Double => run::<f64>(&config, &setup, &sc_path)?,
        Precision::Single => run::<f32>(&config, &setup, &sc_path)?,
    };

    let text = serde_json::to_string_pretty(&summary)?;
    if config.output.summary_path.as_os_str().is_empty() {
        println!("{text}");
    } else {
        fs::write(&config.output.summary_path, text).with_context(|| {
            format!("Failed to write summary to {}", config.output.summary_path.display())
        })?;
        info!(target: "bnm", "Summary written to {}", config.output.summary_path.display());
    }

    Ok(())
}
