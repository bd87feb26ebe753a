// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `cortex.toml`.

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CortexConfig {
    pub build: BuildConfig,
    pub logging: LoggingConfig,
}

/// Model-building session configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Seed for the session's master generator; every cell derives its own
    /// initialization and noise generators from it.
    pub seed: u64,
    /// Initial state of the noise switch (weight noise, dropout)
    pub noise: bool,
    /// Standard deviation of normal weight initialization
    pub weight_scale: f32,
    /// Use orthogonal initialization for square weight matrices
    pub orthogonal_init: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            seed: 0xC0DE_CAFE,
            noise: true,
            weight_scale: 0.01,
            orthogonal_init: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{}`", other)),
        }
    }
}
