/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Configuration for the Kestrel runtime.
///
/// Loaded from TOML in XDG-compliant locations; every field has a default,
/// and a partial file only overrides what it names.
///
/// ```toml
/// [timeouts]
/// component_shutdown_timeout_ms = 5000
///
/// [limits]
/// priority_burst = 16
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KestrelConfig {
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Dispatcher limits
    pub limits: LimitsConfig,
    /// Default names
    pub defaults: DefaultsConfig,
}

/// Timeout-related configuration values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long destroying one component may wait for its worker, in milliseconds
    pub component_shutdown_timeout_ms: u64,
    /// How long a full shutdown may take, in milliseconds
    pub system_shutdown_timeout_ms: u64,
}

/// Dispatcher limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Consecutive higher-priority dispatches after which a waiting lower
    /// priority invocation is served
    pub priority_burst: usize,
    /// Invocations a worker runs before yielding to the scheduler
    pub dispatch_batch: usize,
}

/// Default names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Membrane name of the timer service
    pub timer_membrane: String,
    /// Membrane name of the loopback network
    pub network_membrane: String,
    /// Membrane name of the local executor
    pub executor_membrane: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            component_shutdown_timeout_ms: 10_000,
            system_shutdown_timeout_ms: 30_000,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            priority_burst: 32,
            dispatch_batch: 64,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timer_membrane: "kestrel.timer".to_string(),
            network_membrane: "kestrel.network".to_string(),
            executor_membrane: "kestrel.exec".to_string(),
        }
    }
}

impl KestrelConfig {
    /// Destroy timeout for one component.
    #[must_use]
    pub const fn component_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.component_shutdown_timeout_ms)
    }

    /// Timeout for a whole-runtime shutdown.
    #[must_use]
    pub const fn system_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.system_shutdown_timeout_ms)
    }

    /// Parses a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Loads configuration from `$XDG_CONFIG_HOME/kestrel/config.toml`.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file is
    /// logged and also yields the defaults.
    #[must_use]
    pub fn load() -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix("kestrel") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(source) => match Self::from_toml(&source) {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration loaded from XDG-compliant locations
    pub static ref CONFIG: KestrelConfig = KestrelConfig::load();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = KestrelConfig::default();
        assert_eq!(config.limits.priority_burst, 32);
        assert_eq!(config.defaults.timer_membrane, "kestrel.timer");
        assert_eq!(config.component_shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_documents_override_only_what_they_name() {
        let config = KestrelConfig::from_toml(
            r#"
            [limits]
            priority_burst = 4

            [defaults]
            timer_membrane = "clock"
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.priority_burst, 4);
        assert_eq!(config.limits.dispatch_batch, 64);
        assert_eq!(config.defaults.timer_membrane, "clock");
        assert_eq!(config.timeouts, TimeoutConfig::default());
    }

    #[test]
    fn malformed_documents_are_errors() {
        assert!(KestrelConfig::from_toml("[limits]\npriority_burst = \"many\"").is_err());
    }
}
