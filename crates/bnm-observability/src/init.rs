// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output always; with the `file-logging` feature, a combined JSON
//! log file in a timestamped run folder.

#[cfg(feature = "file-logging")]
use std::path::Path;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, LoggingConfig};

/// Number of run folders kept under the log directory
#[cfg(feature = "file-logging")]
pub const RETAINED_RUNS: usize = 10;

/// Keeps file writers alive; logs are flushed when this is dropped.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder receiving log files, if file logging is active
    pub fn log_dir(&self) -> Option<&std::path::Path> {
        self.log_dir.as_deref()
    }
}

/// Build the `EnvFilter` directive string
///
/// `RUST_LOG`, when set, replaces the configured level. Per-crate debug flags
/// are applied on top either way.
pub fn build_filter(debug_flags: &CrateDebugFlags, config: &LoggingConfig) -> String {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());
    debug_flags.to_filter_string(&base)
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed or the filter does not parse.
pub fn init_logging(debug_flags: &CrateDebugFlags, config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = build_filter(debug_flags, config);
    let env_filter = EnvFilter::try_new(&filter)
        .with_context(|| format!("Invalid log filter: {}", filter))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter.clone())
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter.clone())
            .boxed(),
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let (file_guards, log_dir) = attach_file_layer(config, env_filter, &mut layers)?;

    #[cfg(not(feature = "file-logging"))]
    let log_dir: Option<PathBuf> = {
        if config.file_dir.is_some() {
            eprintln!("Warning: log_dir is set but file logging is not compiled in (feature `file-logging`)");
        }
        None
    };

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir,
    })
}

/// Push a JSON file layer writing to a fresh run folder, if `file_dir` is set
#[cfg(feature = "file-logging")]
fn attach_file_layer(
    config: &LoggingConfig,
    env_filter: EnvFilter,
    layers: &mut Vec<Box<dyn Layer<Registry> + Send + Sync>>,
) -> Result<(Vec<tracing_appender::non_blocking::WorkerGuard>, Option<PathBuf>)> {
    let Some(base_log_dir) = &config.file_dir else {
        return Ok((Vec::new(), None));
    };

    let run_folder = create_run_folder(base_log_dir)?;
    prune_runs(base_log_dir, RETAINED_RUNS)?;

    let appender = tracing_appender::rolling::daily(&run_folder, "bnm.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(env_filter)
        .boxed();
    layers.push(file_layer);

    Ok((vec![guard], Some(run_folder)))
}

/// Create `run_YYYYmmdd_HHMMSS` under `base_log_dir`
#[cfg(feature = "file-logging")]
fn create_run_folder(base_log_dir: &Path) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let run_folder = base_log_dir.join(format!("run_{}", timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;
    Ok(run_folder)
}

/// Remove all but the `keep` most recent run folders
///
/// Folder names sort chronologically, so name order is age order.
#[cfg(feature = "file-logging")]
fn prune_runs(base_log_dir: &Path, keep: usize) -> Result<()> {
    let mut runs: Vec<PathBuf> = std::fs::read_dir(base_log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("run_"))
        })
        .collect();

    if runs.len() <= keep {
        return Ok(());
    }

    runs.sort();
    let excess = runs.len() - keep;
    for path in runs.iter().take(excess) {
        if let Err(e) = std::fs::remove_dir_all(path) {
            eprintln!("Warning: Failed to remove old log directory {}: {}", path.display(), e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_includes_debug_crates() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let flags = CrateDebugFlags::from_args(vec!["--debug-bnm-engine".to_string()]);
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(build_filter(&flags, &config), "bnm-engine=debug,warn");
        assert!(EnvFilter::try_new(build_filter(&flags, &config)).is_ok());
    }

    #[cfg(feature = "file-logging")]
    #[test]
    fn test_prune_keeps_most_recent_runs() {
        let dir = tempfile::tempdir().unwrap();
        for stamp in ["20250101_000000", "20250102_000000", "20250103_000000"] {
            std::fs::create_dir_all(dir.path().join(format!("run_{}", stamp))).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();

        prune_runs(dir.path(), 2).unwrap();

        assert!(!dir.path().join("run_20250101_000000").exists());
        assert!(dir.path().join("run_20250102_000000").exists());
        assert!(dir.path().join("run_20250103_000000").exists());
        assert!(dir.path().join("unrelated").exists());
    }

    #[cfg(feature = "file-logging")]
    #[test]
    fn test_run_folder_created() {
        let dir = tempfile::tempdir().unwrap();
        let run = create_run_folder(dir.path()).unwrap();
        assert!(run.is_dir());
        assert!(run
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("run_")));
    }
}
