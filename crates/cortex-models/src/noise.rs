// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session-wide noise switch (weight noise and dropout)

use tracing::{debug, warn};

/// Global on/off switch consulted by parameter access and dropout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseSwitch {
    noise: bool,
}

impl Default for NoiseSwitch {
    fn default() -> Self {
        Self { noise: true }
    }
}

impl NoiseSwitch {
    pub fn new(on: bool) -> Self {
        Self { noise: on }
    }

    pub fn is_on(&self) -> bool {
        self.noise
    }

    /// Switch by name; accepts `on`/`On`/`ON` and `off`/`Off`/`OFF`
    ///
    /// Any other string leaves the switch untouched.
    pub fn switch(&mut self, to: &str) {
        match to {
            "on" | "On" | "ON" => self.noise = true,
            "off" | "Off" | "OFF" => self.noise = false,
            other => {
                warn!(target: "cortex-models", "Ignoring unknown noise setting `{}`", other);
                return;
            }
        }
        debug!(target: "cortex-models", "Noise switched {}", if self.noise { "on" } else { "off" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_spellings() {
        let mut switch = NoiseSwitch::default();
        for off in ["off", "Off", "OFF"] {
            switch.switch("on");
            switch.switch(off);
            assert!(!switch.is_on());
        }
        for on in ["on", "On", "ON"] {
            switch.switch("off");
            switch.switch(on);
            assert!(switch.is_on());
        }
    }

    #[test]
    fn test_unknown_setting_is_ignored() {
        let mut switch = NoiseSwitch::new(false);
        switch.switch("maybe");
        assert!(!switch.is_on());
    }
}
