// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # bnm-observability
//!
//! Logging setup shared by every binary in the workspace, with per-crate
//! debug flag support.
//!
//! ## Features
//! - `file-logging`: daily-rolling JSON log files in a timestamped run folder

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

// Re-export commonly used items
pub use cli::*;
pub use config::*;
pub use init::*;

/// Workspace crate names (also the `tracing` targets they log under)
pub const KNOWN_CRATES: &[&str] = &["bnm", "bnm-neural", "bnm-engine", "bnm-config"];
