//! Fan-out of lifecycle notifications to registered listeners.
//!
//! Listeners are invoked synchronously on the caller's task, outside every
//! lock. A failing or panicking listener is logged and skipped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};

use modhost_core::result::AppResult;

use crate::name::PluginName;
use crate::panic::describe_panic;
use crate::traits::{Plugin, PluginListener, PluginManagerListener};

/// Registry of lifecycle listeners.
#[derive(Default)]
pub struct EventBus {
    /// Plugin created/destroyed observers.
    listeners: RwLock<Vec<Arc<dyn PluginListener>>>,
    /// Monitoring-pass observers.
    manager_listeners: RwLock<Vec<Arc<dyn PluginManagerListener>>>,
    /// Set once the first monitoring pass completed outside setup mode.
    executed: AtomicBool,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin listener; adding the same listener twice is a no-op.
    pub async fn add_listener(&self, listener: Arc<dyn PluginListener>) {
        let mut listeners = self.listeners.write().await;
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Removes a plugin listener.
    pub async fn remove_listener(&self, listener: &Arc<dyn PluginListener>) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Adds a manager listener.
    ///
    /// If a monitoring pass already completed, the new listener is notified
    /// immediately.
    pub async fn add_manager_listener(&self, listener: Arc<dyn PluginManagerListener>) {
        {
            let mut listeners = self.manager_listeners.write().await;
            if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                return;
            }
            listeners.push(Arc::clone(&listener));
        }
        if self.is_executed() {
            invoke("plugins_monitored", None, || listener.plugins_monitored());
        }
    }

    /// Removes a manager listener.
    pub async fn remove_manager_listener(&self, listener: &Arc<dyn PluginManagerListener>) -> bool {
        let mut listeners = self.manager_listeners.write().await;
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registered plugin listeners.
    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Whether a monitoring pass has completed outside setup mode.
    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    /// Notifies that `name` finished loading.
    pub async fn notify_created(&self, name: &PluginName, plugin: &Arc<dyn Plugin>) {
        for listener in self.snapshot().await {
            invoke("plugin_created", Some(name), || {
                listener.plugin_created(name, plugin)
            });
        }
    }

    /// Notifies that `name` was unloaded.
    pub async fn notify_destroyed(&self, name: &PluginName, plugin: &Arc<dyn Plugin>) {
        for listener in self.snapshot().await {
            invoke("plugin_destroyed", Some(name), || {
                listener.plugin_destroyed(name, plugin)
            });
        }
    }

    /// Notifies that a monitoring pass completed.
    ///
    /// Outside setup mode this also marks the manager as executed.
    pub async fn notify_monitor_cycle_complete(&self, setup_mode: bool) {
        if !setup_mode {
            self.executed.store(true, Ordering::Release);
        }
        let listeners = self.manager_listeners.read().await.clone();
        debug!(listeners = listeners.len(), "Monitoring pass complete");
        for listener in listeners {
            invoke("plugins_monitored", None, || listener.plugins_monitored());
        }
    }

    /// Clears every listener and the executed flag.
    pub async fn clear(&self) {
        self.listeners.write().await.clear();
        self.manager_listeners.write().await.clear();
        self.executed.store(false, Ordering::Release);
    }

    async fn snapshot(&self) -> Vec<Arc<dyn PluginListener>> {
        self.listeners.read().await.clone()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("executed", &self.is_executed())
            .finish_non_exhaustive()
    }
}

pub(crate) fn invoke<F>(event: &str, plugin: Option<&PluginName>, callback: F)
where
    F: FnOnce() -> AppResult<()>,
{
    let plugin = plugin.map(PluginName::as_str).unwrap_or("-");
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(event = event, plugin_id = %plugin, error = %e, "Listener failed"),
        Err(payload) => error!(
            event = event,
            plugin_id = %plugin,
            panic = %describe_panic(payload.as_ref()),
            "Listener panicked"
        ),
    }
}
