//! Case-insensitive plugin names.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Name of a plugin, derived from its install directory.
///
/// Keeps the original spelling for display, but compares, orders and hashes
/// case-insensitively: `Foo` and `foo` are the same plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginName(String);

impl PluginName {
    /// Creates a plugin name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derives the name from the final segment of an install path.
    pub fn from_install_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }

    /// The name as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for comparisons.
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }

    fn chars_folded(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().flat_map(char::to_lowercase)
    }
}

impl PartialEq for PluginName {
    fn eq(&self, other: &Self) -> bool {
        self.chars_folded().eq(other.chars_folded())
    }
}

impl Eq for PluginName {}

impl PartialOrd for PluginName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chars_folded().cmp(other.chars_folded())
    }
}

impl Hash for PluginName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.chars_folded() {
            c.hash(state);
        }
    }
}

impl fmt::Display for PluginName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PluginName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for PluginName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::path::PathBuf;

    #[test]
    fn test_case_insensitive_equality() {
        assert_eq!(PluginName::from("Foo"), PluginName::from("foo"));
        assert_ne!(PluginName::from("foo"), PluginName::from("foobar"));
    }

    #[test]
    fn test_hash_and_order_agree_with_eq() {
        let mut set = HashSet::new();
        set.insert(PluginName::from("Search"));
        assert!(set.contains(&PluginName::from("SEARCH")));

        let mut map = BTreeMap::new();
        map.insert(PluginName::from("beta"), 1);
        map.insert(PluginName::from("Alpha"), 2);
        map.insert(PluginName::from("ALPHA"), 3);
        let keys: Vec<_> = map.keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["Alpha", "beta"]);
        assert_eq!(map[&PluginName::from("alpha")], 3);
    }

    #[test]
    fn test_from_install_path() {
        let name = PluginName::from_install_path(&PathBuf::from("/opt/plugins/Monitor")).unwrap();
        assert_eq!(name.as_str(), "Monitor");
        assert!(PluginName::from_install_path(&PathBuf::from("/")).is_none());
    }
}
