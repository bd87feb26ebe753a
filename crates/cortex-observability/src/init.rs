// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for Cortex

use anyhow::{Context, Result};
use cortex_config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

/// Build the `EnvFilter` directive string for a logging section and debug flags
pub fn filter_directives(logging: &LoggingConfig, debug_flags: &CrateDebugFlags) -> String {
    debug_flags.to_filter_string_with_base(&logging.level.to_lowercase())
}

/// Initialize console logging
///
/// Installs a global subscriber; fails if one is already installed.
///
/// # Arguments
/// * `logging` - Level and format from the configuration file
/// * `debug_flags` - Per-crate debug flags for filtering
pub fn init_logging(logging: &LoggingConfig, debug_flags: &CrateDebugFlags) -> Result<()> {
    let directives = filter_directives(logging, debug_flags);
    let env_filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter: {}", directives))?;

    let layer = match logging.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(env_filter)
            .boxed(),
    };

    Registry::default()
        .with(layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Initialize logging with default settings
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<()> {
    init_logging(&LoggingConfig::default(), debug_flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_use_config_level() {
        let logging = LoggingConfig {
            level: "WARN".to_string(),
            format: LogFormat::Json,
        };
        let flags = CrateDebugFlags::from_args(vec!["--debug-cortex-models".to_string()]);
        let directives = filter_directives(&logging, &flags);
        assert_eq!(directives, "cortex-models=debug,warn");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
