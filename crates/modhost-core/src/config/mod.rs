//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod host;
pub mod logging;
pub mod plugin;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use self::host::HostConfig;
pub use self::logging::LoggingConfig;
pub use self::plugin::{DevOverrideConfig, PluginConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// files (default.toml + environment overlay) and `MODHOST__*` variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host process settings.
    #[serde(default)]
    pub host: HostConfig,
    /// Plugin lifecycle settings.
    #[serde(default)]
    pub plugins: PluginConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from `config/default.toml`, `config/{env}.toml`
    /// and environment variables prefixed with `MODHOST`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from(Path::new("config"), env)
    }

    /// Load configuration from the given directory.
    ///
    /// Both files are optional; missing sections fall back to defaults.
    pub fn load_from(dir: &Path, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::from(dir.join("default")).required(false))
            .add_source(config::File::from(dir.join(env)).required(false))
            .add_source(
                config::Environment::with_prefix("MODHOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path(), "test").unwrap();
        assert_eq!(config.plugins.retry_ceiling, 5);
        assert_eq!(config.plugins.bootstrap_plugin, "admin");
        assert_eq!(config.plugins.initial_reclaim_wait_ms, 2000);
        assert_eq!(config.plugins.reclaim_retry_interval_ms, 8000);
        assert_eq!(config.plugins.max_reclaim_retries, 5);
        assert!(!config.host.setup_mode);
    }

    #[test]
    fn test_env_overlay_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[plugins]\ndirectory = \"/srv/plugins\"\nretry_ceiling = 3\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.toml"),
            "[plugins]\nretry_ceiling = 7\n\n[plugins.dev_overrides.search]\nclasses_dir = \"target/classes\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path(), "staging").unwrap();
        assert_eq!(config.plugins.directory, "/srv/plugins");
        assert_eq!(config.plugins.retry_ceiling, 7);
        let dev = config.plugins.dev_overrides.get("search").unwrap();
        assert_eq!(dev.classes_dir.as_deref(), Some("target/classes"));
        assert!(dev.web_root.is_none());
    }
}
