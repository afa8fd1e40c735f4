//! Developer-mode overrides supplied through process configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use modhost_core::config::DevOverrideConfig;

use crate::name::PluginName;

/// Resolved developer-mode locations for one plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevOverride {
    /// Directory with freshly built code, added to the plugin's scope.
    pub classes_dir: Option<PathBuf>,
    /// Directory with web resources served instead of the packaged ones.
    pub web_root: Option<PathBuf>,
}

impl DevOverride {
    /// Resolves configured override paths for a plugin.
    ///
    /// Returns `None` when nothing is configured. Each path is used as-is if
    /// it exists, otherwise relative to the install dir; paths found in
    /// neither place are dropped but the plugin still runs in dev mode.
    pub fn resolve(
        name: &PluginName,
        install_path: &Path,
        config: Option<&DevOverrideConfig>,
    ) -> Option<Self> {
        let config = config?;
        if config.classes_dir.is_none() && config.web_root.is_none() {
            return None;
        }

        info!(plugin_id = %name, "Plugin is running in development mode");
        Some(Self {
            classes_dir: config
                .classes_dir
                .as_deref()
                .and_then(|p| locate(name, install_path, p)),
            web_root: config
                .web_root
                .as_deref()
                .and_then(|p| locate(name, install_path, p)),
        })
    }
}

fn locate(name: &PluginName, install_path: &Path, configured: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(configured);
    if direct.exists() {
        return Some(direct);
    }
    let relative = install_path.join(configured);
    if relative.exists() {
        return Some(relative);
    }
    warn!(plugin_id = %name, path = %configured, "Dev-mode override path does not exist");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_to_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("classes")).unwrap();
        let config = DevOverrideConfig {
            classes_dir: Some("classes".to_string()),
            web_root: Some("does-not-exist".to_string()),
        };

        let dev = DevOverride::resolve(&PluginName::from("foo"), dir.path(), Some(&config)).unwrap();
        assert_eq!(dev.classes_dir, Some(dir.path().join("classes")));
        assert_eq!(dev.web_root, None);
    }

    #[test]
    fn test_no_config_means_no_dev_mode() {
        let dir = tempfile::tempdir().unwrap();
        let name = PluginName::from("foo");
        assert!(DevOverride::resolve(&name, dir.path(), None).is_none());
        assert!(DevOverride::resolve(&name, dir.path(), Some(&DevOverrideConfig::default())).is_none());
    }
}
