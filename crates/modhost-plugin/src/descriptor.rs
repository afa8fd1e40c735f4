//! Plugin descriptor (`plugin.json`) and the optional side descriptors.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use modhost_core::error::{AppError, ErrorKind};
use modhost_core::result::AppResult;

use crate::name::PluginName;
use crate::version::parse_lenient;

/// Descriptor file expected in every install directory.
pub const DESCRIPTOR_FILE: &str = "plugin.json";

/// Extension descriptors, registered in this order when present.
pub const EXTENSION_DESCRIPTORS: [&str; 2] = ["web/extension.json", "web/extension-custom.json"];

/// Cache configuration descriptor.
pub const CACHE_DESCRIPTOR: &str = "cache-config.json";

/// Contents of `plugin.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Identifier handed to the entry-point resolver.
    pub entry_point: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Plugin version.
    #[serde(default)]
    pub version: Option<String>,
    /// Author or maintainer.
    #[serde(default)]
    pub author: Option<String>,
    /// Oldest host version able to run the plugin.
    #[serde(default)]
    pub min_host_version: Option<String>,
    /// Plugin whose isolation context this one shares.
    #[serde(default)]
    pub parent_plugin: Option<String>,
    /// Schema key for database provisioning.
    #[serde(default)]
    pub database_key: Option<String>,
    /// Schema version for database provisioning.
    #[serde(default)]
    pub database_version: Option<i32>,
    /// Admin-console model contributed by the plugin.
    #[serde(default)]
    pub admin_console: Option<Value>,
}

impl PluginDescriptor {
    /// Minimal descriptor with only an entry point.
    pub fn with_entry_point(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            name: None,
            description: None,
            version: None,
            author: None,
            min_host_version: None,
            parent_plugin: None,
            database_key: None,
            database_version: None,
            admin_console: None,
        }
    }

    /// Reads the descriptor from an install directory.
    ///
    /// Returns `Ok(None)` when the file does not exist and a descriptor
    /// error when it cannot be parsed.
    pub async fn read(install_path: &Path) -> AppResult<Option<Self>> {
        let path = install_path.join(DESCRIPTOR_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&raw).map(Some)
    }

    /// Parses and validates descriptor JSON.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let descriptor: Self = serde_json::from_str(raw)
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Descriptor,
                    format!("Malformed {DESCRIPTOR_FILE}: {e}"),
                    e,
                )
            })?;
        if descriptor.entry_point.trim().is_empty() {
            return Err(AppError::descriptor(format!(
                "{DESCRIPTOR_FILE} declares an empty entry point"
            )));
        }
        Ok(descriptor)
    }

    /// Declared parent, if any.
    pub fn parent(&self) -> Option<PluginName> {
        self.parent_plugin
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PluginName::from)
    }

    /// Declared minimum host version; an unparseable value is a descriptor error.
    pub fn min_host_version(&self) -> AppResult<Option<Version>> {
        match self.min_host_version.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_lenient(raw).map(Some).map_err(|e| {
                AppError::descriptor(format!("Invalid minHostVersion '{raw}': {}", e.message))
            }),
        }
    }

    /// Entry point with surrounding whitespace removed.
    pub fn entry_point(&self) -> &str {
        self.entry_point.trim()
    }
}

/// Extension descriptors present in the install directory.
pub fn extension_descriptors(install_path: &Path) -> Vec<PathBuf> {
    EXTENSION_DESCRIPTORS
        .iter()
        .map(|rel| install_path.join(rel))
        .filter(|p| p.is_file())
        .collect()
}

/// Cache descriptor, if present in the install directory.
pub fn cache_descriptor(install_path: &Path) -> Option<PathBuf> {
    Some(install_path.join(CACHE_DESCRIPTOR)).filter(|p| p.is_file())
}

/// Rewrites an admin-console section so it resolves under the plugin.
///
/// URL-like strings are prefixed with `plugins/<name>/`; tabs, sidebars and
/// items that carry a `name` or `value` are tagged with the plugin name.
pub fn scoped_admin_section(name: &PluginName, section: &Value) -> Value {
    let mut scoped = section.clone();
    scope_value(name, &mut scoped, None);
    scoped
}

fn scope_value(name: &PluginName, value: &mut Value, key: Option<&str>) {
    match value {
        Value::Object(map) => {
            let tag = matches!(key, Some("tab" | "sidebar" | "item"))
                && (map.contains_key("name") || map.contains_key("value"));
            for (k, v) in map.iter_mut() {
                let prefixed = match (k.as_str(), &*v) {
                    ("url" | "logo-image" | "login-image", Value::String(s)) => {
                        Some(format!("plugins/{name}/{s}"))
                    }
                    _ => None,
                };
                match prefixed {
                    Some(url) => *v = Value::String(url),
                    None => scope_value(name, v, Some(k.as_str())),
                }
            }
            if tag {
                map.insert("plugin".to_string(), Value::String(name.to_string()));
            }
        }
        Value::Array(items) => {
            for item in items {
                scope_value(name, item, key);
            }
        }
        _ => {}
    }
}
