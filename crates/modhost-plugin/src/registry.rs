//! Plugin registry, the single source of truth for loaded plugins.
//!
//! Records, failure counts, parent/child edges and in-flight transitions
//! live behind one lock so they always change together. The lock is never
//! held across plugin code or reclamation waits.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use modhost_core::error::AppError;
use modhost_core::result::AppResult;

use crate::descriptor::PluginDescriptor;
use crate::dependency::DependencyTracker;
use crate::dev::DevOverride;
use crate::failure::{FailureCount, FailureTracker};
use crate::isolation::IsolationContext;
use crate::name::PluginName;
use crate::traits::Plugin;

/// Bookkeeping for one loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    /// Unique, case-insensitive plugin name.
    pub name: PluginName,
    /// The instantiated plugin.
    pub handle: Arc<dyn Plugin>,
    /// Isolation context, shared with the parent for child plugins.
    pub isolation_context: Arc<IsolationContext>,
    /// Directory backing the plugin.
    pub install_path: PathBuf,
    /// Developer-mode overrides, if configured.
    pub dev_override: Option<DevOverride>,
    /// Parent declared in the descriptor.
    pub parent_name: Option<PluginName>,
    /// Children registered under this plugin.
    pub child_names: Vec<PluginName>,
    /// Parsed descriptor.
    pub descriptor: PluginDescriptor,
    /// Extension descriptors registered with the resource registrar.
    pub registered_extensions: Vec<PathBuf>,
    /// Whether an admin-console model was added for this plugin.
    pub admin_model: bool,
    /// When the plugin finished registration.
    pub loaded_at: DateTime<Utc>,
}

/// Transition currently in flight for a plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// A load attempt is running.
    Loading,
    /// An unload is running.
    Unloading,
}

/// Observable lifecycle state of a plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Not loaded and no failures recorded.
    Unloaded,
    /// A load attempt is in progress.
    Loading,
    /// Registered and initialized.
    Loaded,
    /// An unload is in progress.
    Unloading,
    /// Failed transiently; the next load call retries.
    AwaitingRetry,
    /// Failed permanently or exhausted its retries.
    SuppressedPermanent,
}

/// Summary of a loaded plugin for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Version declared in the descriptor.
    pub version: Option<String>,
    /// Description declared in the descriptor.
    pub description: Option<String>,
    /// Parent plugin, if any.
    pub parent: Option<String>,
    /// Children, in registration order.
    pub children: Vec<String>,
    /// Install directory.
    pub install_path: PathBuf,
    /// Whether developer-mode overrides are active.
    pub dev_mode: bool,
    /// When the plugin was loaded.
    pub loaded_at: DateTime<Utc>,
}

impl From<&PluginRecord> for PluginInfo {
    fn from(record: &PluginRecord) -> Self {
        Self {
            name: record.name.to_string(),
            version: record.descriptor.version.clone(),
            description: record.descriptor.description.clone(),
            parent: record.parent_name.as_ref().map(ToString::to_string),
            children: record.child_names.iter().map(ToString::to_string).collect(),
            install_path: record.install_path.clone(),
            dev_mode: record.dev_override.is_some(),
            loaded_at: record.loaded_at,
        }
    }
}

/// A resolved parent for a loading child.
#[derive(Debug, Clone)]
pub struct ResolvedParent {
    /// Parent name as registered.
    pub name: PluginName,
    /// Parent's isolation context, to be shared.
    pub isolation_context: Arc<IsolationContext>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Name → record, ordered case-insensitively.
    records: BTreeMap<PluginName, PluginRecord>,
    /// Consecutive load failures.
    failures: FailureTracker,
    /// Parent/child edges.
    dependencies: DependencyTracker,
    /// Transitions in flight.
    in_flight: HashMap<PluginName, Transition>,
}

/// Registry of loaded plugins and their lifecycle bookkeeping.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a plugin with this name is registered.
    pub async fn contains(&self, name: &PluginName) -> bool {
        self.state.read().await.records.contains_key(name)
    }

    /// Handle of a registered plugin.
    pub async fn handle(&self, name: &PluginName) -> Option<Arc<dyn Plugin>> {
        let state = self.state.read().await;
        state.records.get(name).map(|r| Arc::clone(&r.handle))
    }

    /// Applies `update` to a registered record; `false` if it is absent.
    pub async fn update<F>(&self, name: &PluginName, update: F) -> bool
    where
        F: FnOnce(&mut PluginRecord),
    {
        let mut state = self.state.write().await;
        match state.records.get_mut(name) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        }
    }

    /// Registered names, ordered case-insensitively.
    pub async fn names(&self) -> Vec<PluginName> {
        self.state.read().await.records.keys().cloned().collect()
    }

    /// All registered handles, ordered by name.
    pub async fn handles(&self) -> Vec<(PluginName, Arc<dyn Plugin>)> {
        let state = self.state.read().await;
        state
            .records
            .values()
            .map(|r| (r.name.clone(), Arc::clone(&r.handle)))
            .collect()
    }

    /// Listing summaries, ordered by name.
    pub async fn infos(&self) -> Vec<PluginInfo> {
        let state = self.state.read().await;
        state.records.values().map(PluginInfo::from).collect()
    }

    /// Number of registered plugins.
    pub async fn count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Install path of a registered plugin.
    pub async fn install_path(&self, name: &PluginName) -> Option<PathBuf> {
        let state = self.state.read().await;
        state.records.get(name).map(|r| r.install_path.clone())
    }

    /// Dev-mode overrides of a registered plugin.
    pub async fn dev_override(&self, name: &PluginName) -> Option<DevOverride> {
        let state = self.state.read().await;
        state.records.get(name).and_then(|r| r.dev_override.clone())
    }

    /// Isolation context of a registered plugin.
    pub async fn isolation_context(&self, name: &PluginName) -> Option<Arc<IsolationContext>> {
        let state = self.state.read().await;
        state
            .records
            .get(name)
            .map(|r| Arc::clone(&r.isolation_context))
    }

    /// Children of `name`.
    pub async fn children_of(&self, name: &PluginName) -> Vec<PluginName> {
        self.state.read().await.dependencies.children_of(name)
    }

    /// Parent of `name`.
    pub async fn parent_of(&self, name: &PluginName) -> Option<PluginName> {
        let state = self.state.read().await;
        state.dependencies.parent_of(name).cloned()
    }

    /// Walks parent links up to the top of the family.
    pub async fn family_root(&self, name: &PluginName) -> PluginName {
        let state = self.state.read().await;
        let mut current = name.clone();
        let mut hops = 0;
        while let Some(parent) = state
            .records
            .get(&current)
            .and_then(|r| r.parent_name.clone())
        {
            if parent == *name || hops > state.records.len() {
                break;
            }
            current = parent;
            hops += 1;
        }
        current
    }

    /// Current failure count.
    pub async fn failure_count(&self, name: &PluginName) -> Option<FailureCount> {
        self.state.read().await.failures.get(name)
    }

    /// Records a transient load failure.
    pub async fn record_failure(&self, name: &PluginName) -> FailureCount {
        self.state.write().await.failures.record_failure(name)
    }

    /// Records a permanent load failure.
    pub async fn record_permanent(&self, name: &PluginName) {
        self.state.write().await.failures.record_permanent(name);
    }

    /// Clears failures for `name`.
    pub async fn clear_failures(&self, name: &PluginName) {
        self.state.write().await.failures.clear(name);
    }

    /// Marks a transition as in flight.
    pub async fn begin(&self, name: &PluginName, transition: Transition) {
        let mut state = self.state.write().await;
        state.in_flight.insert(name.clone(), transition);
    }

    /// Marks `name` as unloading and snapshots its record in one step.
    ///
    /// From here on [`register`](Self::register) rejects children of `name`,
    /// so the snapshot's child list is final. `None` if it is not registered.
    pub async fn begin_unload(&self, name: &PluginName) -> Option<PluginRecord> {
        let mut state = self.state.write().await;
        let record = state.records.get(name).cloned()?;
        state.in_flight.insert(name.clone(), Transition::Unloading);
        Some(record)
    }

    /// Clears the in-flight transition for `name`.
    pub async fn finish(&self, name: &PluginName) {
        self.state.write().await.in_flight.remove(name);
    }

    /// Observable state of `name`.
    pub async fn state_of(&self, name: &PluginName, ceiling: u32) -> PluginState {
        let state = self.state.read().await;
        match state.in_flight.get(name) {
            Some(Transition::Loading) => return PluginState::Loading,
            Some(Transition::Unloading) => return PluginState::Unloading,
            None => {}
        }
        if state.records.contains_key(name) {
            return PluginState::Loaded;
        }
        if state.failures.should_suppress(name, ceiling) {
            return PluginState::SuppressedPermanent;
        }
        match state.failures.get(name) {
            Some(_) => PluginState::AwaitingRetry,
            None => PluginState::Unloaded,
        }
    }

    /// Looks up a declared parent case-insensitively.
    ///
    /// A parent that is currently unloading counts as absent.
    pub async fn resolve_parent(&self, declared: &PluginName) -> Option<ResolvedParent> {
        let state = self.state.read().await;
        if state.in_flight.get(declared) == Some(&Transition::Unloading) {
            return None;
        }
        state.records.get(declared).map(|r| ResolvedParent {
            name: r.name.clone(),
            isolation_context: Arc::clone(&r.isolation_context),
        })
    }

    /// Inserts a freshly loaded record and its parent edge.
    ///
    /// Fails when the name is taken or the parent disappeared meanwhile.
    pub async fn register(&self, record: PluginRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&record.name) {
            return Err(AppError::conflict(format!(
                "Plugin '{}' is already registered",
                record.name
            )));
        }
        if let Some(parent) = &record.parent_name {
            let parent_unloading = state.in_flight.get(parent) == Some(&Transition::Unloading);
            if parent_unloading || !state.records.contains_key(parent) {
                return Err(AppError::not_found(format!(
                    "Parent plugin '{}' of '{}' is no longer loaded",
                    parent, record.name
                )));
            }
        }

        let name = record.name.clone();
        let parent = record.parent_name.clone();
        state.records.insert(name.clone(), record);
        if let Some(parent) = parent {
            link(&mut state, &parent, &name);
        }

        info!(plugin_id = %name, "Plugin registered");
        Ok(())
    }

    /// Removes a record, leaving parent/child edges untouched.
    pub async fn deregister(&self, name: &PluginName) -> Option<PluginRecord> {
        let record = self.state.write().await.records.remove(name);
        if record.is_some() {
            debug!(plugin_id = %name, "Plugin deregistered");
        }
        record
    }

    /// Removes a record together with every edge touching it.
    pub async fn discard(&self, name: &PluginName) -> Option<PluginRecord> {
        let mut state = self.state.write().await;
        let record = state.records.remove(name)?;
        unlink(&mut state, name);
        for child in state.dependencies.take_children(name) {
            debug!(plugin_id = %name, child = %child, "Dropping child edge");
        }
        Some(record)
    }

    /// Reinserts a record after a failed unload, restoring its edges.
    pub async fn restore(&self, record: PluginRecord) {
        let mut state = self.state.write().await;
        let name = record.name.clone();
        let parent = record.parent_name.clone();
        let children = record.child_names.clone();
        state.records.insert(name.clone(), record);

        if let Some(parent) = parent {
            if state.records.contains_key(&parent) {
                link(&mut state, &parent, &name);
            }
        }
        for child in children {
            if state.records.contains_key(&child) {
                state.dependencies.add_edge(&name, &child);
            } else if let Some(r) = state.records.get_mut(&name) {
                r.child_names.retain(|c| *c != child);
            }
        }
        info!(plugin_id = %name, "Plugin bookkeeping restored");
    }

    /// Detaches `child` from its parent, returning the parent.
    pub async fn detach_child(&self, child: &PluginName) -> Option<PluginName> {
        let mut state = self.state.write().await;
        unlink(&mut state, child)
    }

    /// Removes every record and all bookkeeping, returning the records.
    pub async fn drain(&self) -> Vec<PluginRecord> {
        let mut state = self.state.write().await;
        let records = std::mem::take(&mut state.records);
        state.failures.clear_all();
        state.dependencies.clear();
        state.in_flight.clear();
        records.into_values().collect()
    }

    /// Verifies that parent/child edges agree with the records.
    pub async fn check_consistency(&self) -> Result<(), String> {
        let state = self.state.read().await;
        for parent in state.dependencies.parents() {
            let record = state
                .records
                .get(parent)
                .ok_or_else(|| format!("parent '{parent}' has children but no record"))?;
            let tracked = state.dependencies.children_of(parent);
            if record.child_names != tracked {
                return Err(format!(
                    "children of '{parent}' disagree: record {:?}, tracker {:?}",
                    record.child_names, tracked
                ));
            }
        }
        for record in state.records.values() {
            if !record.child_names.is_empty() && !state.dependencies.is_parent(&record.name) {
                return Err(format!(
                    "record '{}' lists children unknown to the tracker",
                    record.name
                ));
            }
        }
        Ok(())
    }
}

fn link(state: &mut RegistryState, parent: &PluginName, child: &PluginName) {
    state.dependencies.add_edge(parent, child);
    if let Some(record) = state.records.get_mut(parent) {
        if !record.child_names.contains(child) {
            record.child_names.push(child.clone());
        }
    }
}

fn unlink(state: &mut RegistryState, child: &PluginName) -> Option<PluginName> {
    let parent = state.dependencies.detach_child(child)?;
    if let Some(record) = state.records.get_mut(&parent) {
        record.child_names.retain(|c| c != child);
    }
    Some(parent)
}
