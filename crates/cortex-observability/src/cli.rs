// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-crate debug flags from the command line and `CORTEX_DEBUG`
//!
//! `--debug-cortex-models` turns on debug output for one tracing target,
//! `--debug-all` for every crate in [`KNOWN_CRATES`].

use std::collections::BTreeSet;
use std::env;

use crate::KNOWN_CRATES;

/// Environment variable holding a comma-separated crate list (or `all`)
pub const DEBUG_ENV_VAR: &str = "CORTEX_DEBUG";

/// Crates whose tracing target should log at debug level
///
/// # Example
/// ```rust
/// use cortex_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-cortex-models".to_string()]);
/// assert!(flags.is_enabled("cortex-models"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrateDebugFlags {
    enabled: BTreeSet<String>,
}

impl CrateDebugFlags {
    /// Collect `--debug-<crate>` and `--debug-all` arguments; others are ignored
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = Self::default();
        for arg in args {
            match arg.strip_prefix("--debug-") {
                Some("all") => flags.enable_all(),
                Some(name) if !name.is_empty() => flags.enable(name),
                _ => {}
            }
        }
        flags
    }

    /// Parse a `CORTEX_DEBUG` style value: `all` or `a,b,c`
    pub fn from_list(value: &str) -> Self {
        let mut flags = Self::default();
        flags.extend_from_list(value);
        flags
    }

    fn extend_from_list(&mut self, value: &str) {
        if value.trim() == "all" {
            self.enable_all();
            return;
        }
        value
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .for_each(|name| self.enable(name));
    }

    pub fn enable(&mut self, crate_name: &str) {
        self.enabled.insert(crate_name.to_string());
    }

    pub fn enable_all(&mut self) {
        self.enabled.extend(KNOWN_CRATES.iter().map(|c| c.to_string()));
    }

    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled.contains(crate_name)
    }

    pub fn any_enabled(&self) -> bool {
        !self.enabled.is_empty()
    }

    /// Enabled crate names, sorted
    pub fn crates(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// `EnvFilter` directives with an `info` fallback
    pub fn to_filter_string(&self) -> String {
        self.to_filter_string_with_base("info")
    }

    /// `EnvFilter` directives, e.g. `"cortex-models=debug,warn"`
    pub fn to_filter_string_with_base(&self, base_level: &str) -> String {
        self.crates()
            .map(|name| format!("{}=debug", name))
            .chain(std::iter::once(base_level.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Flags from the process arguments merged with `CORTEX_DEBUG`
pub fn parse_debug_flags() -> CrateDebugFlags {
    let mut flags = CrateDebugFlags::from_args(env::args());
    if let Ok(value) = env::var(DEBUG_ENV_VAR) {
        flags.extend_from_list(&value);
    }
    flags
}

/// Usage text for the debug flags
pub fn debug_flags_help() -> String {
    format!(
        "Debug Flags:\n  \
         --debug-all              debug logging for every crate\n  \
         --debug-<crate>          debug logging for one crate\n\n\
         Crates: {}\n\n\
         {}=<crate>[,<crate>] or {}=all has the same effect\n",
        KNOWN_CRATES.join(", "),
        DEBUG_ENV_VAR,
        DEBUG_ENV_VAR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_crate_flag() {
        let flags = CrateDebugFlags::from_args(args(&["cortex", "--debug-cortex-models", "--verbose"]));
        assert!(flags.is_enabled("cortex-models"));
        assert!(!flags.is_enabled("cortex-config"));
        assert_eq!(flags.crates().count(), 1);
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(args(&["--debug-all"]));
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
        assert_eq!(flags, CrateDebugFlags::from_list(" all "));
    }

    #[test]
    fn test_env_list() {
        let flags = CrateDebugFlags::from_list("cortex-config, ,cortex-models");
        assert_eq!(flags.crates().collect::<Vec<_>>(), vec!["cortex-config", "cortex-models"]);
        assert!(!CrateDebugFlags::from_list("").any_enabled());
    }

    #[test]
    fn test_filter_string() {
        let flags = CrateDebugFlags::from_args(args(&["--debug-cortex-models", "--debug-cortex-config"]));
        assert_eq!(
            flags.to_filter_string_with_base("warn"),
            "cortex-config=debug,cortex-models=debug,warn"
        );
        assert_eq!(CrateDebugFlags::default().to_filter_string(), "info");
        assert_eq!(flags.log_level("cortex-models"), tracing::Level::DEBUG);
        assert_eq!(flags.log_level("other"), tracing::Level::INFO);
    }
}
