//! Plugin lifecycle configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Plugin lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Install root containing one directory per plugin.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Whether to load every plugin found in the install root on startup.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// Consecutive transient failures before a plugin is silently skipped.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// The only plugin allowed to load while the host is in setup mode.
    #[serde(default = "default_bootstrap_plugin")]
    pub bootstrap_plugin: String,
    /// Wait before the first reclamation attempt, in milliseconds.
    #[serde(default = "default_initial_reclaim_wait")]
    pub initial_reclaim_wait_ms: u64,
    /// Wait between reclamation retries, in milliseconds.
    #[serde(default = "default_reclaim_retry_interval")]
    pub reclaim_retry_interval_ms: u64,
    /// Reclamation retries after the first attempt.
    #[serde(default = "default_max_reclaim_retries")]
    pub max_reclaim_retries: u32,
    /// File extensions of installable plugin artifacts in the install root.
    #[serde(default = "default_artifact_extensions")]
    pub artifact_extensions: Vec<String>,
    /// Developer-mode overrides keyed by plugin name.
    #[serde(default)]
    pub dev_overrides: HashMap<String, DevOverrideConfig>,
}

/// Developer-mode source overrides for a single plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevOverrideConfig {
    /// Directory with freshly built plugin code.
    #[serde(default)]
    pub classes_dir: Option<String>,
    /// Directory with web resources served instead of the packaged ones.
    #[serde(default)]
    pub web_root: Option<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            auto_load: true,
            retry_ceiling: default_retry_ceiling(),
            bootstrap_plugin: default_bootstrap_plugin(),
            initial_reclaim_wait_ms: default_initial_reclaim_wait(),
            reclaim_retry_interval_ms: default_reclaim_retry_interval(),
            max_reclaim_retries: default_max_reclaim_retries(),
            artifact_extensions: default_artifact_extensions(),
            dev_overrides: HashMap::new(),
        }
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_ceiling() -> u32 {
    5
}

fn default_bootstrap_plugin() -> String {
    "admin".to_string()
}

fn default_initial_reclaim_wait() -> u64 {
    2000
}

fn default_reclaim_retry_interval() -> u64 {
    8000
}

fn default_max_reclaim_retries() -> u32 {
    5
}

fn default_artifact_extensions() -> Vec<String> {
    vec!["zip".to_string(), "tar".to_string()]
}
