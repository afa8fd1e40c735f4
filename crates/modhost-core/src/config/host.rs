//! Host process configuration.

use serde::{Deserialize, Serialize};

/// Settings describing the process that hosts the plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Version reported to plugin descriptors' minimum-version checks.
    #[serde(default = "default_version")]
    pub version: String,
    /// Whether the host starts in initial-setup mode.
    #[serde(default)]
    pub setup_mode: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            setup_mode: false,
        }
    }
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
