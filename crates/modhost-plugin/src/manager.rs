//! The facade the host and its monitor talk to.
//!
//! Owns the registry, event bus, transition locks and collaborators, and
//! exposes install/load/unload/delete plus read-only queries. Start and
//! shutdown are mutually exclusive phases.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use modhost_core::config::{DevOverrideConfig, PluginConfig};
use modhost_core::error::{AppError, ErrorKind};
use modhost_core::result::AppResult;

use crate::collaborators::Collaborators;
use crate::dev::DevOverride;
use crate::events::EventBus;
use crate::failure::FailureCount;
use crate::host::HostEnvironment;
use crate::isolation::IsolationContext;
use crate::loader::{self, LoadOutcome, guarded};
use crate::locks::TransitionLocks;
use crate::name::PluginName;
use crate::panic::describe_panic;
use crate::registry::{PluginInfo, PluginRecord, PluginState, Registry};
use crate::resolver::EntryPointResolver;
use crate::traits::{Plugin, PluginListener, PluginManagerListener};
use crate::unloader::{self, UnloadOutcome};

/// Lifecycle tunables derived from [`PluginConfig`].
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Install root.
    pub plugins_dir: PathBuf,
    /// Transient failures tolerated before a plugin is skipped.
    pub retry_ceiling: u32,
    /// Plugin allowed to load in setup mode.
    pub bootstrap_plugin: PluginName,
    /// Wait before the first reclamation attempt.
    pub initial_reclaim_wait: Duration,
    /// Wait between reclamation retries.
    pub reclaim_retry_interval: Duration,
    /// Retries after the first reclamation attempt.
    pub max_reclaim_retries: u32,
    /// Extensions of installable artifacts, without the dot.
    pub artifact_extensions: Vec<String>,
    /// Developer-mode overrides by plugin name.
    pub dev_overrides: BTreeMap<PluginName, DevOverrideConfig>,
}

impl LifecycleSettings {
    /// Converts the configuration section.
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            plugins_dir: PathBuf::from(&config.directory),
            retry_ceiling: config.retry_ceiling,
            bootstrap_plugin: PluginName::from(config.bootstrap_plugin.as_str()),
            initial_reclaim_wait: Duration::from_millis(config.initial_reclaim_wait_ms),
            reclaim_retry_interval: Duration::from_millis(config.reclaim_retry_interval_ms),
            max_reclaim_retries: config.max_reclaim_retries,
            artifact_extensions: config.artifact_extensions.clone(),
            dev_overrides: config
                .dev_overrides
                .iter()
                .map(|(name, o)| (PluginName::from(name.as_str()), o.clone()))
                .collect(),
        }
    }

    /// Configured dev-mode override for `name`, matched case-insensitively.
    pub fn dev_override_config(&self, name: &PluginName) -> Option<&DevOverrideConfig> {
        self.dev_overrides.get(name)
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&PluginConfig::default())
    }
}

/// Builder for [`PluginManager`].
pub struct PluginManagerBuilder {
    settings: LifecycleSettings,
    host: Option<HostEnvironment>,
    resolver: Option<Arc<dyn EntryPointResolver>>,
    collaborators: Collaborators,
}

impl PluginManagerBuilder {
    /// Sets the host environment.
    pub fn host(mut self, host: HostEnvironment) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the entry-point resolver.
    pub fn resolver(mut self, resolver: Arc<dyn EntryPointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the collaborators.
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Builds the manager; a resolver is required.
    pub fn build(self) -> AppResult<PluginManager> {
        let resolver = self
            .resolver
            .ok_or_else(|| AppError::configuration("Plugin manager requires an entry-point resolver"))?;
        let host = match self.host {
            Some(host) => host,
            None => HostEnvironment::from_config(&Default::default())?,
        };
        let (shutdown, _) = watch::channel(false);
        Ok(PluginManager {
            settings: self.settings,
            host,
            registry: Registry::new(),
            events: EventBus::new(),
            collaborators: self.collaborators,
            resolver,
            locks: TransitionLocks::new(),
            transitions: RwLock::new(()),
            shutdown,
            phase: Mutex::new(()),
        })
    }
}

/// Central plugin lifecycle manager.
pub struct PluginManager {
    /// Lifecycle tunables.
    pub(crate) settings: LifecycleSettings,
    /// Host version and setup mode.
    pub(crate) host: HostEnvironment,
    /// Records, failures and dependency edges.
    pub(crate) registry: Registry,
    /// Lifecycle listeners.
    pub(crate) events: EventBus,
    /// External collaborators.
    pub(crate) collaborators: Collaborators,
    /// Entry-point resolver.
    pub(crate) resolver: Arc<dyn EntryPointResolver>,
    /// Per-name transition locks.
    pub(crate) locks: TransitionLocks,
    /// Held shared by every load and unload; shutdown takes it exclusively.
    pub(crate) transitions: RwLock<()>,
    /// `true` while shutting down.
    shutdown: watch::Sender<bool>,
    /// Serializes start and shutdown.
    phase: Mutex<()>,
}

impl PluginManager {
    /// Starts building a manager.
    pub fn builder(settings: LifecycleSettings) -> PluginManagerBuilder {
        PluginManagerBuilder {
            settings,
            host: None,
            resolver: None,
            collaborators: Collaborators::noop(),
        }
    }

    /// Starts the monitor and accepts loads.
    pub async fn start(&self) -> AppResult<()> {
        let _phase = self.phase.lock().await;
        self.shutdown.send_replace(false);
        tokio::fs::create_dir_all(&self.settings.plugins_dir)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Storage,
                    format!(
                        "Failed to create plugin directory {}",
                        self.settings.plugins_dir.display()
                    ),
                    e,
                )
            })?;
        self.collaborators.monitor.start().await?;
        info!(directory = %self.settings.plugins_dir.display(), "Plugin manager started");
        Ok(())
    }

    /// Stops the monitor, destroys every plugin and clears all bookkeeping.
    ///
    /// Calling it again is harmless.
    pub async fn shutdown(&self) {
        let _phase = self.phase.lock().await;
        let already = self.shutdown.send_replace(true);
        if already && self.registry.count().await == 0 {
            debug!("Plugin manager already shut down");
            return;
        }

        if let Err(e) = guarded(self.collaborators.monitor.stop()).await {
            warn!(error = %e, "Failed to stop plugin monitor");
        }

        // In-flight loads and unloads observe the signal and finish first.
        let _exclusive = self.transitions.write().await;
        let records = destruction_order(self.registry.drain().await);
        let total = records.len();
        for record in records {
            match AssertUnwindSafe(record.handle.destroy()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(plugin_id = %record.name, error = %e, "Plugin destroy failed"),
                Err(payload) => warn!(
                    plugin_id = %record.name,
                    panic = %describe_panic(payload.as_ref()),
                    "Plugin destroy panicked"
                ),
            }
            record.isolation_context.detach(&record.name);
        }
        self.events.clear().await;
        info!(plugins = total, "Plugin manager shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Whether a monitoring pass completed outside setup mode.
    pub fn is_executed(&self) -> bool {
        self.events.is_executed()
    }

    /// Install root.
    pub fn plugins_directory(&self) -> &Path {
        &self.settings.plugins_dir
    }

    /// Lifecycle tunables.
    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Host environment.
    pub fn host(&self) -> &HostEnvironment {
        &self.host
    }

    // ── Install / delete ──────────────────────────────────────────

    /// Stages `stream` as `filename` in the install root and triggers a
    /// monitoring pass.
    ///
    /// The data is written to `<filename>.part` and renamed once complete.
    pub async fn install<R>(&self, stream: Option<R>, filename: &str) -> bool
    where
        R: AsyncRead + Unpin + Send,
    {
        let Some(file_name) = Path::new(filename.trim())
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
        else {
            warn!(filename = %filename, "Install requested without a file name");
            return false;
        };
        let Some(mut stream) = stream else {
            warn!(filename = %file_name, "Install requested without data");
            return false;
        };

        let target = self.settings.plugins_dir.join(&file_name);
        let part = self.settings.plugins_dir.join(format!("{file_name}.part"));
        match stage(&mut stream, &part, &target).await {
            Ok(bytes) => info!(file = %target.display(), bytes = bytes, "Plugin artifact installed"),
            Err(e) => {
                error!(file = %target.display(), error = %e, "Failed to install plugin artifact");
                let _ = tokio::fs::remove_file(&part).await;
                return false;
            }
        }

        if let Err(e) = guarded(self.collaborators.monitor.run_now(true)).await {
            warn!(error = %e, "Failed to trigger plugin monitor");
        }
        true
    }

    /// Whether `filename` exists in the install root.
    pub async fn is_installed(&self, filename: &str) -> bool {
        let Some(file_name) = Path::new(filename.trim()).file_name() else {
            return false;
        };
        let path = self.settings.plugins_dir.join(file_name);
        matches!(tokio::fs::try_exists(&path).await, Ok(true))
    }

    /// Removes the artifacts named `name.<ext>` from the install root and
    /// triggers a monitoring pass; returns whether anything was deleted.
    pub async fn delete(&self, name: &str) -> bool {
        let stem = name.trim().to_lowercase();
        let wanted: Vec<String> = self
            .settings
            .artifact_extensions
            .iter()
            .map(|ext| format!("{stem}.{}", ext.trim_start_matches('.').to_lowercase()))
            .collect();

        let mut deleted = false;
        match tokio::fs::read_dir(&self.settings.plugins_dir).await {
            Ok(mut entries) => loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read plugin directory");
                        break;
                    }
                };
                let file_name = entry.file_name().to_string_lossy().to_lowercase();
                if !wanted.contains(&file_name) {
                    continue;
                }
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        info!(plugin_id = %name, file = %entry.path().display(), "Plugin artifact deleted");
                        deleted = true;
                    }
                    Err(e) => warn!(
                        plugin_id = %name,
                        file = %entry.path().display(),
                        error = %e,
                        "Failed to delete plugin artifact"
                    ),
                }
            },
            Err(e) => warn!(error = %e, "Failed to read plugin directory"),
        }

        if let Err(e) = guarded(self.collaborators.monitor.run_now(true)).await {
            warn!(error = %e, "Failed to trigger plugin monitor");
        }
        deleted
    }

    // ── Load / unload ─────────────────────────────────────────────

    /// Loads the plugin installed at `install_path`.
    pub async fn load(&self, install_path: impl AsRef<Path>) -> LoadOutcome {
        loader::load(self, install_path.as_ref()).await
    }

    /// Unloads `name`, its children, and (through the shared isolation
    /// context) its parent.
    pub async fn unload(&self, name: &str) -> UnloadOutcome {
        unloader::unload(self, &PluginName::from(name)).await
    }

    /// Runs [`unload`](Self::unload) on a background task.
    pub fn spawn_unload(self: &Arc<Self>, name: &str) -> JoinHandle<UnloadOutcome> {
        let manager = Arc::clone(self);
        let name = PluginName::from(name);
        tokio::spawn(async move { unloader::unload(&manager, &name).await })
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Names of loaded plugins, ordered case-insensitively.
    pub async fn list_plugins(&self) -> Vec<PluginName> {
        self.registry.names().await
    }

    /// Loaded plugins with their handles.
    pub async fn plugins(&self) -> Vec<(PluginName, Arc<dyn Plugin>)> {
        self.registry.handles().await
    }

    /// Summaries of loaded plugins.
    pub async fn plugin_infos(&self) -> Vec<PluginInfo> {
        self.registry.infos().await
    }

    /// Handle of a loaded plugin.
    pub async fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.handle(&PluginName::from(name)).await
    }

    /// Install directory of a loaded plugin.
    pub async fn get_install_path(&self, name: &str) -> Option<PathBuf> {
        self.registry.install_path(&PluginName::from(name)).await
    }

    /// Dev-mode overrides of a loaded plugin.
    pub async fn get_dev_override(&self, name: &str) -> Option<DevOverride> {
        self.registry.dev_override(&PluginName::from(name)).await
    }

    /// Isolation context of a loaded plugin.
    pub async fn get_isolation_context(&self, name: &str) -> Option<Arc<IsolationContext>> {
        self.registry.isolation_context(&PluginName::from(name)).await
    }

    /// Children of a loaded plugin.
    pub async fn children_of(&self, name: &str) -> Vec<PluginName> {
        self.registry.children_of(&PluginName::from(name)).await
    }

    /// Parent of a loaded plugin.
    pub async fn parent_of(&self, name: &str) -> Option<PluginName> {
        self.registry.parent_of(&PluginName::from(name)).await
    }

    /// Recorded load failures.
    pub async fn failure_count(&self, name: &str) -> Option<FailureCount> {
        self.registry.failure_count(&PluginName::from(name)).await
    }

    /// Lifecycle state of a plugin name.
    pub async fn state_of(&self, name: &str) -> PluginState {
        self.registry
            .state_of(&PluginName::from(name), self.settings.retry_ceiling)
            .await
    }

    /// Verifies registry and dependency bookkeeping agree.
    pub async fn check_consistency(&self) -> Result<(), String> {
        self.registry.check_consistency().await
    }

    // ── Listeners ─────────────────────────────────────────────────

    /// Adds a plugin listener.
    pub async fn add_listener(&self, listener: Arc<dyn PluginListener>) {
        self.events.add_listener(listener).await;
    }

    /// Removes a plugin listener.
    pub async fn remove_listener(&self, listener: &Arc<dyn PluginListener>) -> bool {
        self.events.remove_listener(listener).await
    }

    /// Adds a monitoring-pass listener.
    pub async fn add_manager_listener(&self, listener: Arc<dyn PluginManagerListener>) {
        self.events.add_manager_listener(listener).await;
    }

    /// Removes a monitoring-pass listener.
    pub async fn remove_manager_listener(&self, listener: &Arc<dyn PluginManagerListener>) -> bool {
        self.events.remove_manager_listener(listener).await
    }

    /// Called by the monitor after each full pass over the install root.
    pub async fn notify_monitor_cycle_complete(&self) {
        self.events
            .notify_monitor_cycle_complete(self.host.is_setup_mode())
            .await;
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins_dir", &self.settings.plugins_dir)
            .field("resolver", &self.resolver)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

async fn stage<R>(stream: &mut R, part: &Path, target: &Path) -> AppResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    if let Some(dir) = target.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut file = tokio::fs::File::create(part).await?;
    let bytes = tokio::io::copy(stream, &mut file).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(part, target).await?;
    Ok(bytes)
}

/// Orders records so children are destroyed before their parents.
fn destruction_order(records: Vec<PluginRecord>) -> Vec<PluginRecord> {
    let parents: BTreeMap<PluginName, Option<PluginName>> = records
        .iter()
        .map(|r| (r.name.clone(), r.parent_name.clone()))
        .collect();
    let depth = |name: &PluginName| {
        let mut depth = 0usize;
        let mut current = parents.get(name).cloned().flatten();
        while let Some(parent) = current {
            depth += 1;
            if depth > parents.len() {
                break;
            }
            current = parents.get(&parent).cloned().flatten();
        }
        depth
    };
    let mut ordered: Vec<(usize, PluginRecord)> =
        records.into_iter().map(|r| (depth(&r.name), r)).collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));
    ordered.into_iter().map(|(_, r)| r).collect()
}
