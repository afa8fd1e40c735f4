//! Parent/child relationships between loaded plugins.

use std::collections::BTreeMap;

use crate::name::PluginName;

/// Parent → children and child → parent lookups.
///
/// A name appears as a key of the parent map only while it has at least
/// one child.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    /// Parent → children, in registration order.
    children: BTreeMap<PluginName, Vec<PluginName>>,
    /// Child → parent.
    parents: BTreeMap<PluginName, PluginName>,
}

impl DependencyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `child` under `parent`.
    pub fn add_edge(&mut self, parent: &PluginName, child: &PluginName) {
        let children = self.children.entry(parent.clone()).or_default();
        if !children.contains(child) {
            children.push(child.clone());
        }
        self.parents.insert(child.clone(), parent.clone());
    }

    /// Removes the edge from `child` to its parent, returning the parent.
    pub fn detach_child(&mut self, child: &PluginName) -> Option<PluginName> {
        let parent = self.parents.remove(child)?;
        if let Some(children) = self.children.get_mut(&parent) {
            children.retain(|c| c != child);
            if children.is_empty() {
                self.children.remove(&parent);
            }
        }
        Some(parent)
    }

    /// Removes every edge below `parent` and returns the detached children.
    pub fn take_children(&mut self, parent: &PluginName) -> Vec<PluginName> {
        let children = self.children.remove(parent).unwrap_or_default();
        for child in &children {
            self.parents.remove(child);
        }
        children
    }

    /// Children of `parent`, in registration order.
    pub fn children_of(&self, parent: &PluginName) -> Vec<PluginName> {
        self.children.get(parent).cloned().unwrap_or_default()
    }

    /// Parent of `child`, if it has one.
    pub fn parent_of(&self, child: &PluginName) -> Option<&PluginName> {
        self.parents.get(child)
    }

    /// Whether `name` currently has children.
    pub fn is_parent(&self, name: &PluginName) -> bool {
        self.children.contains_key(name)
    }

    /// All parents with at least one child.
    pub fn parents(&self) -> impl Iterator<Item = &PluginName> {
        self.children.keys()
    }

    /// Drops every edge.
    pub fn clear(&mut self) {
        self.children.clear();
        self.parents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> PluginName {
        PluginName::from(s)
    }

    #[test]
    fn test_edges_both_directions() {
        let mut deps = DependencyTracker::new();
        deps.add_edge(&n("Foo"), &n("bar"));
        deps.add_edge(&n("foo"), &n("baz"));
        deps.add_edge(&n("foo"), &n("BAR"));

        assert_eq!(deps.children_of(&n("FOO")), vec![n("bar"), n("baz")]);
        assert_eq!(deps.parent_of(&n("baz")), Some(&n("foo")));
        assert!(deps.is_parent(&n("foo")));
    }

    #[test]
    fn test_detach_last_child_removes_parent_entry() {
        let mut deps = DependencyTracker::new();
        deps.add_edge(&n("foo"), &n("bar"));
        assert_eq!(deps.detach_child(&n("bar")), Some(n("foo")));
        assert!(!deps.is_parent(&n("foo")));
        assert_eq!(deps.detach_child(&n("bar")), None);
    }

    #[test]
    fn test_take_children() {
        let mut deps = DependencyTracker::new();
        deps.add_edge(&n("foo"), &n("bar"));
        deps.add_edge(&n("foo"), &n("baz"));
        assert_eq!(deps.take_children(&n("foo")), vec![n("bar"), n("baz")]);
        assert!(deps.parent_of(&n("bar")).is_none());
        assert_eq!(deps.parents().count(), 0);
    }
}
