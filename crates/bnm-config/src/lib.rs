// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # BNM Configuration System
//!
//! Type-safe configuration for brain network simulations with support for:
//! - TOML file parsing
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bnm_config::{load_config, validate_config};
//!
//! // Automatic file discovery, then BNM_* environment overrides
//! let config = load_config(None, None).expect("Failed to load config");
//! validate_config(&config).expect("Invalid config");
//!
//! println!("Duration: {} s", config.simulation.duration_s);
//! println!("FIC mode: {}", config.fic.mode);
//! ```
//!
//! Precedence: file < environment < CLI. Every section is optional; a
//! missing key takes the model's standard value.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{apply_cli_overrides, apply_environment_overrides, find_config_file, load_config};
pub use types::*;
pub use validation::{validate_config, ConfigValidationError};

/// Re-export for convenience
pub use serde;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found. Searched: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax: {0}")]
    ParseError(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Unknown override key '{0}'")]
    UnknownOverride(String),

    #[error("Invalid override {key} = '{value}': {reason}")]
    InvalidOverride {
        key: String,
        value: String,
        reason: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
