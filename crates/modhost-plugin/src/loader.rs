//! Runs one load attempt and classifies its result.
//!
//! Every failure, including panics raised by plugin code, resolves into a
//! [`LoadOutcome`]. Registration is undone when initialization fails, so a
//! failed attempt never leaves a partial record behind.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use modhost_core::error::AppError;
use modhost_core::result::AppResult;

use crate::descriptor::{
    DESCRIPTOR_FILE, PluginDescriptor, cache_descriptor, extension_descriptors,
    scoped_admin_section,
};
use crate::dev::DevOverride;
use crate::failure::FailureCount;
use crate::isolation::IsolationContext;
use crate::manager::PluginManager;
use crate::name::PluginName;
use crate::panic::describe_panic;
use crate::registry::{PluginRecord, Transition};
use crate::resolver::EntryPointResolver;
use crate::traits::Plugin;
use crate::version::requires_newer_host;

/// Result of one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    /// The plugin is registered and initialized.
    Success,
    /// The attempt failed or was skipped; a later attempt may succeed.
    TransientFailure,
    /// The plugin can never load without external correction.
    PermanentFailure,
}

impl LoadOutcome {
    /// Whether the plugin was loaded.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Classification of a failed attempt.
enum Failure {
    /// Expected to clear up on its own, e.g. a parent that is not loaded yet.
    Deferred(AppError),
    /// Unexpected fault.
    Transient(AppError),
    /// Invalid descriptor or incompatible host.
    Permanent(AppError),
    /// Shutdown began while the attempt was running.
    Cancelled,
}

/// Loads the plugin installed at `install_path`.
pub(crate) async fn load(manager: &PluginManager, install_path: &Path) -> LoadOutcome {
    let Some(name) = PluginName::from_install_path(install_path) else {
        warn!(path = %install_path.display(), "Cannot derive a plugin name from install path");
        return LoadOutcome::TransientFailure;
    };

    if manager.is_shutting_down() {
        debug!(plugin_id = %name, "Manager is shutting down; load skipped");
        return LoadOutcome::TransientFailure;
    }

    if manager.host.is_setup_mode() && name != manager.settings.bootstrap_plugin {
        debug!(plugin_id = %name, "Host in setup mode; only the bootstrap plugin may load");
        return LoadOutcome::TransientFailure;
    }

    if let Some(outcome) = suppressed(manager, &name).await {
        return outcome;
    }

    let _running = manager.transitions.read().await;
    let _guard = manager.locks.acquire(&name).await;
    if manager.is_shutting_down() {
        debug!(plugin_id = %name, "Manager shut down while waiting; load skipped");
        return LoadOutcome::TransientFailure;
    }

    // Another attempt may have finished while waiting for the lock.
    if let Some(outcome) = suppressed(manager, &name).await {
        return outcome;
    }
    if manager.registry.contains(&name).await {
        warn!(
            plugin_id = %name,
            path = %install_path.display(),
            "A plugin with this name is already loaded"
        );
        return LoadOutcome::TransientFailure;
    }

    manager.registry.begin(&name, Transition::Loading).await;
    let result = AssertUnwindSafe(attempt(manager, &name, install_path))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(handle)) => {
            manager.registry.clear_failures(&name).await;
            manager.registry.finish(&name).await;
            info!(plugin_id = %name, path = %install_path.display(), "Plugin loaded");
            manager.events.notify_created(&name, &handle).await;
            return LoadOutcome::Success;
        }
        Ok(Err(Failure::Permanent(e))) => {
            manager.registry.record_permanent(&name).await;
            warn!(plugin_id = %name, error = %e, "Plugin cannot be loaded; it will not be retried");
            LoadOutcome::PermanentFailure
        }
        Ok(Err(Failure::Deferred(e))) => {
            let count = manager.registry.record_failure(&name).await;
            info!(plugin_id = %name, failures = %count, reason = %e, "Plugin load deferred");
            LoadOutcome::TransientFailure
        }
        Ok(Err(Failure::Transient(e))) => {
            let count = manager.registry.record_failure(&name).await;
            error!(plugin_id = %name, failures = %count, error = %e, "Error loading plugin");
            LoadOutcome::TransientFailure
        }
        Ok(Err(Failure::Cancelled)) => {
            info!(plugin_id = %name, "Manager shutting down; load rolled back");
            LoadOutcome::TransientFailure
        }
        Err(payload) => {
            let panic = describe_panic(payload.as_ref());
            rollback_registration(manager, &name).await;
            let count = manager.registry.record_failure(&name).await;
            error!(plugin_id = %name, failures = %count, panic = %panic, "Plugin load panicked");
            LoadOutcome::TransientFailure
        }
    };

    manager.registry.finish(&name).await;
    outcome
}

/// Short-circuits names that failed permanently or too often.
async fn suppressed(manager: &PluginManager, name: &PluginName) -> Option<LoadOutcome> {
    match manager.registry.failure_count(name).await? {
        FailureCount::Permanent => {
            debug!(plugin_id = %name, "Plugin failed permanently; load skipped");
            Some(LoadOutcome::PermanentFailure)
        }
        FailureCount::Transient(n) if n >= manager.settings.retry_ceiling => {
            debug!(plugin_id = %name, failures = n, "Plugin load suppressed after repeated failures");
            Some(LoadOutcome::TransientFailure)
        }
        FailureCount::Transient(_) => None,
    }
}

async fn attempt(
    manager: &PluginManager,
    name: &PluginName,
    install_path: &Path,
) -> Result<Arc<dyn Plugin>, Failure> {
    let descriptor = match PluginDescriptor::read(install_path).await {
        Ok(Some(descriptor)) => descriptor,
        Ok(None) => {
            return Err(Failure::Permanent(AppError::descriptor(format!(
                "Missing {DESCRIPTOR_FILE} in {}",
                install_path.display()
            ))));
        }
        Err(e) if e.is_permanent() => return Err(Failure::Permanent(e)),
        Err(e) => return Err(Failure::Transient(e)),
    };

    if let Some(required) = descriptor.min_host_version().map_err(Failure::Permanent)? {
        let current = manager.host.version();
        if requires_newer_host(&required, current) {
            return Err(Failure::Permanent(AppError::version(format!(
                "Requires host {required}, running {current}"
            ))));
        }
    }

    let parent = match descriptor.parent() {
        Some(declared) => match manager.registry.resolve_parent(&declared).await {
            Some(parent) => Some(parent),
            None => {
                return Err(Failure::Deferred(AppError::not_found(format!(
                    "Parent plugin '{declared}' is not loaded"
                ))));
            }
        },
        None => None,
    };

    let config = manager.settings.dev_override_config(name);
    let dev_override = DevOverride::resolve(name, install_path, config);

    let context = match &parent {
        Some(parent) => {
            parent.isolation_context.attach(name, install_path);
            Arc::clone(&parent.isolation_context)
        }
        None => IsolationContext::new(name, install_path),
    };
    if let Some(classes) = dev_override.as_ref().and_then(|d| d.classes_dir.as_deref()) {
        context.add_scope_path(name, classes);
    }

    let handle = match instantiate(manager.resolver.as_ref(), descriptor.entry_point(), &context) {
        Ok(handle) => handle,
        Err(e) => {
            context.detach(name);
            return Err(Failure::Transient(e));
        }
    };

    let record = PluginRecord {
        name: name.clone(),
        handle: Arc::clone(&handle),
        isolation_context: Arc::clone(&context),
        install_path: install_path.to_path_buf(),
        dev_override,
        parent_name: parent.as_ref().map(|p| p.name.clone()),
        child_names: Vec::new(),
        descriptor: descriptor.clone(),
        registered_extensions: Vec::new(),
        admin_model: false,
        loaded_at: Utc::now(),
    };
    if let Err(e) = manager.registry.register(record).await {
        context.detach(name);
        return Err(Failure::Transient(e));
    }

    run_hooks(manager, name, &descriptor, &handle, install_path).await;

    let initialized = Arc::clone(&context)
        .enter(AssertUnwindSafe(handle.initialize(manager, install_path)).catch_unwind())
        .await;
    let init_error = match initialized {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(payload) => Some(AppError::plugin(format!(
            "initialize panicked: {}",
            describe_panic(payload.as_ref())
        ))),
    };
    if let Some(e) = init_error {
        rollback_registration(manager, name).await;
        return Err(Failure::Transient(e));
    }
    if manager.is_shutting_down() {
        if let Err(e) = guarded(handle.destroy()).await {
            warn!(plugin_id = %name, error = %e, "Plugin destroy failed");
        }
        rollback_registration(manager, name).await;
        return Err(Failure::Cancelled);
    }

    if let Some(section) = &descriptor.admin_console {
        let scoped = scoped_admin_section(name, section);
        match guarded(manager.collaborators.admin.add_model(name, scoped)).await {
            Ok(()) => {
                manager.registry.update(name, |r| r.admin_model = true).await;
            }
            Err(e) => warn!(plugin_id = %name, error = %e, "Failed to add admin console model"),
        }
    }

    Ok(handle)
}

fn instantiate(
    resolver: &dyn EntryPointResolver,
    entry_point: &str,
    context: &Arc<IsolationContext>,
) -> AppResult<Arc<dyn Plugin>> {
    catch_unwind(AssertUnwindSafe(|| resolver.resolve(entry_point, context))).unwrap_or_else(
        |payload| {
            Err(AppError::plugin(format!(
                "Entry point '{entry_point}' panicked: {}",
                describe_panic(payload.as_ref())
            )))
        },
    )
}

/// Schema, extension and cache hooks. Failures are logged only.
async fn run_hooks(
    manager: &PluginManager,
    name: &PluginName,
    descriptor: &PluginDescriptor,
    handle: &Arc<dyn Plugin>,
    install_path: &Path,
) {
    let collaborators = &manager.collaborators;

    if descriptor.database_key.is_some() {
        match guarded(collaborators.schema.check_schema(name, descriptor)).await {
            Ok(true) => {}
            Ok(false) => error!(
                plugin_id = %name,
                "Database schema missing and could not be upgraded; plugin may not work"
            ),
            Err(e) => warn!(plugin_id = %name, error = %e, "Schema provisioning failed"),
        }
    }

    let mut registered: Vec<PathBuf> = Vec::new();
    for path in extension_descriptors(install_path) {
        match guarded(collaborators.resources.register(name, handle, &path)).await {
            Ok(()) => registered.push(path),
            Err(e) => warn!(
                plugin_id = %name,
                descriptor = %path.display(),
                error = %e,
                "Failed to register plugin extension"
            ),
        }
    }
    if !registered.is_empty() {
        manager
            .registry
            .update(name, |r| r.registered_extensions = registered)
            .await;
    }

    if let Some(path) = cache_descriptor(install_path) {
        if let Err(e) = guarded(collaborators.caches.configure(name, &path)).await {
            warn!(plugin_id = %name, error = %e, "Failed to configure plugin caches");
        }
    }
}

/// Removes a record registered by a failed attempt and undoes its hooks.
async fn rollback_registration(manager: &PluginManager, name: &PluginName) {
    let Some(record) = manager.registry.discard(name).await else {
        return;
    };
    for path in &record.registered_extensions {
        if let Err(e) = guarded(manager.collaborators.resources.unregister(name, path)).await {
            warn!(plugin_id = %name, error = %e, "Failed to unregister plugin extension");
        }
    }
    if let Err(e) = guarded(manager.collaborators.caches.unregister_caches(name)).await {
        warn!(plugin_id = %name, error = %e, "Failed to unregister plugin caches");
    }
    record.isolation_context.detach(name);
    debug!(plugin_id = %name, "Registration rolled back");
}

/// Awaits collaborator code, turning a panic into an error.
pub(crate) async fn guarded<F, T>(fut: F) -> AppResult<T>
where
    F: std::future::Future<Output = AppResult<T>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(AppError::internal(format!(
                "Collaborator panicked: {}",
                describe_panic(payload.as_ref())
            )))
        })
}
