//! Tears a plugin (and, through shared isolation, its family)
//! down, reclaiming resources with bounded retry.
//!
//! An unload first locks the top-most plugin of the family, then each
//! member it touches. Reclamation waits never hold the registry lock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::invoke;
use crate::loader::guarded;
use crate::locks::HeldLocks;
use crate::manager::PluginManager;
use crate::name::PluginName;
use crate::panic::describe_panic;
use crate::registry::PluginRecord;

/// Result of an unload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadOutcome {
    /// The plugin is gone (or was never loaded).
    Removed,
    /// Reclamation failed; the plugin's bookkeeping was restored.
    ///
    /// During shutdown a failed reclamation is abandoned instead, and the
    /// plugin is reported as removed.
    StillActive,
}

impl UnloadOutcome {
    /// Whether the plugin was removed.
    pub fn is_removed(self) -> bool {
        self == Self::Removed
    }
}

/// Unloads `name` together with everything sharing its isolation context.
pub(crate) async fn unload(manager: &PluginManager, name: &PluginName) -> UnloadOutcome {
    let _running = manager.transitions.read().await;
    let mut held = loop {
        let root = manager.registry.family_root(name).await;
        let mut held = HeldLocks::new();
        held.ensure(&manager.locks, &root).await;
        if manager.registry.family_root(name).await == root {
            break held;
        }
    };
    unload_member(manager, name, &mut held, false).await
}

fn unload_member<'a>(
    manager: &'a PluginManager,
    name: &'a PluginName,
    held: &'a mut HeldLocks,
    from_parent: bool,
) -> BoxFuture<'a, UnloadOutcome> {
    async move {
        held.ensure(&manager.locks, name).await;
        manager.registry.clear_failures(name).await;

        let Some(snapshot) = manager.registry.begin_unload(name).await else {
            debug!(plugin_id = %name, "Plugin not loaded; nothing to unload");
            return UnloadOutcome::Removed;
        };

        for child in snapshot.child_names.clone() {
            if unload_member(manager, &child, held, true).await == UnloadOutcome::StillActive {
                warn!(plugin_id = %name, child = %child, "Child plugin still active; unload aborted");
                manager.registry.finish(name).await;
                return UnloadOutcome::StillActive;
            }
        }

        teardown(manager, &snapshot).await;
        let handle = Arc::clone(&snapshot.handle);
        drop(snapshot);

        let Some(mut record) = manager.registry.deregister(name).await else {
            manager.registry.finish(name).await;
            return UnloadOutcome::Removed;
        };

        let reclaimed = reclaim_with_retry(manager, &record).await;
        if !reclaimed && manager.is_shutting_down() {
            record.isolation_context.detach(name);
            warn!(plugin_id = %name, "Plugin still active at shutdown; abandoning its resources");
        } else if !reclaimed {
            manager.registry.finish(name).await;
            record.isolation_context.attach(name, &record.install_path);
            if let Some(classes) = record.dev_override.as_ref().and_then(|d| d.classes_dir.as_deref()) {
                record.isolation_context.add_scope_path(name, classes);
            }
            record.registered_extensions.clear();
            record.admin_model = false;
            manager.registry.restore(record).await;
            warn!(plugin_id = %name, "Plugin still active after unload; bookkeeping restored");
            return UnloadOutcome::StillActive;
        }
        drop(record);

        if let Err(e) = guarded(manager.collaborators.caches.unregister_caches(name)).await {
            warn!(plugin_id = %name, error = %e, "Failed to unregister plugin caches");
        }
        let parent = manager.registry.detach_child(name).await;
        manager.registry.finish(name).await;

        if let Some(parent) = &parent {
            if let Some(parent_handle) = manager.registry.handle(parent).await {
                if let Some(listener) = parent_handle.as_listener() {
                    invoke("plugin_destroyed", Some(name), || {
                        listener.plugin_destroyed(name, &handle)
                    });
                }
            }
        }
        info!(plugin_id = %name, "Plugin unloaded");
        manager.events.notify_destroyed(name, &handle).await;
        drop(handle);

        if let (Some(parent), false) = (parent, from_parent) {
            let outcome = unload_member(manager, &parent, held, false).await;
            debug!(plugin_id = %name, parent = %parent, outcome = ?outcome, "Parent unload finished");
        }
        UnloadOutcome::Removed
    }
    .boxed()
}

/// Reverses load-time registrations and destroys the plugin.
async fn teardown(manager: &PluginManager, record: &PluginRecord) {
    let name = &record.name;
    let collaborators = &manager.collaborators;

    for path in &record.registered_extensions {
        if let Err(e) = guarded(collaborators.resources.unregister(name, path)).await {
            warn!(plugin_id = %name, error = %e, "Failed to unregister plugin extension");
        }
    }
    if record.admin_model {
        if let Err(e) = guarded(collaborators.admin.remove_model(name)).await {
            warn!(plugin_id = %name, error = %e, "Failed to remove admin console model");
        }
    }

    match AssertUnwindSafe(record.handle.destroy()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(plugin_id = %name, error = %e, "Plugin destroy failed"),
        Err(payload) => warn!(
            plugin_id = %name,
            panic = %describe_panic(payload.as_ref()),
            "Plugin destroy panicked"
        ),
    }
}

/// Initial wait, one attempt, then up to the configured number of retries.
///
/// A shutdown signal cuts the waits short; one last attempt is still made.
async fn reclaim_with_retry(manager: &PluginManager, record: &PluginRecord) -> bool {
    let settings = &manager.settings;
    let reclaimer = &manager.collaborators.reclaimer;
    let mut shutdown = manager.shutdown_signal();

    let mut cancelled = !pause(&mut shutdown, settings.initial_reclaim_wait).await;
    let mut attempt = 0;
    loop {
        let reclaimed = AssertUnwindSafe(reclaimer.reclaim(
            &record.name,
            &record.isolation_context,
            &record.install_path,
        ))
        .catch_unwind()
        .await
        .unwrap_or(false);
        if reclaimed {
            return true;
        }
        if cancelled || attempt >= settings.max_reclaim_retries {
            return false;
        }
        attempt += 1;
        debug!(
            plugin_id = %record.name,
            attempt = attempt,
            "Plugin resources still in use; retrying reclamation"
        );
        cancelled = !pause(&mut shutdown, settings.reclaim_retry_interval).await;
    }
}

/// Sleeps for `wait`; `false` if shutdown was signalled instead.
async fn pause(shutdown: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = shutdown.wait_for(|stopping| *stopping) => false,
    }
}
