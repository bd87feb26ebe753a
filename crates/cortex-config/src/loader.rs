// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigResult, CortexConfig, ConfigError};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "cortex.toml";

fn parse_bool(value: &str) -> bool {
    let lowered = value.to_lowercase();
    lowered == "true" || lowered == "1" || lowered == "yes" || lowered == "on"
}

/// Find the Cortex configuration file
///
/// Search order:
/// 1. `CORTEX_CONFIG_PATH` environment variable
/// 2. Current working directory: `./cortex.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("CORTEX_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        return if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::FileNotFound(format!(
                "CORTEX_CONFIG_PATH points at a missing file: {}",
                path.display()
            )))
        };
    }

    let candidates: Vec<PathBuf> = env::current_dir()
        .map(|cwd| cwd.ancestors().take(6).map(|dir| dir.join(CONFIG_FILE_NAME)).collect())
        .unwrap_or_default();

    if let Some(found) = candidates.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let searched = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(ConfigError::FileNotFound(format!(
        "{} (set CORTEX_CONFIG_PATH to use another location)",
        if searched.is_empty() { CONFIG_FILE_NAME.to_string() } else { searched }
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
/// Returns error if config file is not found, contains invalid TOML, or fails validation
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<CortexConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: CortexConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    crate::validate_config(&config)?;
    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `CORTEX_SEED` -> `build.seed`
/// - `CORTEX_NOISE` -> `build.noise`
/// - `CORTEX_WEIGHT_SCALE` -> `build.weight_scale`
/// - `CORTEX_LOG_LEVEL` -> `logging.level`
/// - `CORTEX_LOG_FORMAT` -> `logging.format`
pub fn apply_environment_overrides(config: &mut CortexConfig) {
    if let Ok(value) = env::var("CORTEX_SEED") {
        if let Ok(seed) = value.parse::<u64>() {
            config.build.seed = seed;
        }
    }
    if let Ok(value) = env::var("CORTEX_NOISE") {
        config.build.noise = parse_bool(&value);
    }
    if let Ok(value) = env::var("CORTEX_WEIGHT_SCALE") {
        if let Ok(scale) = value.parse::<f32>() {
            config.build.weight_scale = scale;
        }
    }
    if let Ok(value) = env::var("CORTEX_LOG_LEVEL") {
        config.logging.level = value;
    }
    if let Ok(value) = env::var("CORTEX_LOG_FORMAT") {
        if let Ok(format) = value.parse() {
            config.logging.format = format;
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// Keys may be qualified by section (`build.seed`, `logging.level`) or bare
/// (`seed`, `log_level`). Unparseable values are skipped.
pub fn apply_cli_overrides(config: &mut CortexConfig, cli_args: &HashMap<String, String>) {
    for (key, value) in cli_args {
        match key.as_str() {
            "build.seed" | "seed" => {
                if let Ok(seed) = value.parse::<u64>() {
                    config.build.seed = seed;
                }
            }
            "build.noise" | "noise" => config.build.noise = parse_bool(value),
            "build.weight_scale" | "weight_scale" => {
                if let Ok(scale) = value.parse::<f32>() {
                    config.build.weight_scale = scale;
                }
            }
            "build.orthogonal_init" | "orthogonal_init" => {
                config.build.orthogonal_init = parse_bool(value)
            }
            "logging.level" | "log_level" => config.logging.level = value.clone(),
            "logging.format" | "log_format" => {
                if let Ok(format) = value.parse() {
                    config.logging.format = format;
                }
            }
            _ => {}
        }
    }
}
