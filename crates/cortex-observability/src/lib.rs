// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # cortex-observability
//!
//! Unified logging infrastructure for Cortex.
//!
//! Provides consistent logging patterns across all Cortex crates with
//! per-crate debug flag support.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known Cortex crate names (and tracing targets) for debug flags
pub const KNOWN_CRATES: &[&str] = &["cortex-models", "cortex-config", "cortex-observability"];
