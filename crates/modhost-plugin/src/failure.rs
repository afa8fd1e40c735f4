//! Per-plugin consecutive load-failure counting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::name::PluginName;

/// Failure count recorded for a plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCount {
    /// Consecutive transient failures.
    Transient(u32),
    /// Never retry until cleared.
    Permanent,
}

impl std::fmt::Display for FailureCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCount::Transient(n) => write!(f, "{n}"),
            FailureCount::Permanent => f.write_str("permanent"),
        }
    }
}

/// Tracks consecutive load failures per plugin name.
///
/// Counts only grow until [`clear`](Self::clear) is called; `Permanent`
/// dominates every finite count.
#[derive(Debug, Default)]
pub struct FailureTracker {
    /// Plugin name → failure count.
    counts: HashMap<PluginName, FailureCount>,
}

impl FailureTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one transient failure and returns the new count.
    pub fn record_failure(&mut self, name: &PluginName) -> FailureCount {
        let entry = self
            .counts
            .entry(name.clone())
            .or_insert(FailureCount::Transient(0));
        if let FailureCount::Transient(n) = entry {
            *n = n.saturating_add(1);
        }
        *entry
    }

    /// Marks the name as permanently failed.
    pub fn record_permanent(&mut self, name: &PluginName) {
        self.counts.insert(name.clone(), FailureCount::Permanent);
    }

    /// Forgets all failures for the name.
    pub fn clear(&mut self, name: &PluginName) {
        self.counts.remove(name);
    }

    /// Forgets every recorded failure.
    pub fn clear_all(&mut self) {
        self.counts.clear();
    }

    /// Current count, if any failure was recorded.
    pub fn get(&self, name: &PluginName) -> Option<FailureCount> {
        self.counts.get(name).copied()
    }

    /// Whether a load attempt for `name` should be skipped.
    ///
    /// True once the transient count reached `ceiling`, or after a
    /// permanent failure.
    pub fn should_suppress(&self, name: &PluginName, ceiling: u32) -> bool {
        match self.counts.get(name) {
            Some(FailureCount::Permanent) => true,
            Some(FailureCount::Transient(n)) => *n >= ceiling,
            None => false,
        }
    }
}
