//! Capability contracts between the manager and plugin code.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use modhost_core::result::AppResult;

use crate::manager::PluginManager;
use crate::name::PluginName;

/// Trait that every plugin handle must implement.
///
/// Handles are produced by an [`EntryPointResolver`](crate::resolver::EntryPointResolver)
/// and shared as `Arc<dyn Plugin>`, so both capabilities take `&self`.
#[async_trait]
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// Called once after the plugin has been registered.
    ///
    /// Runs with the plugin's isolation context active, see
    /// [`IsolationContext::current`](crate::isolation::IsolationContext::current).
    async fn initialize(&self, manager: &PluginManager, install_dir: &Path) -> AppResult<()>;

    /// Called once when the plugin is unloaded or the manager shuts down.
    async fn destroy(&self) -> AppResult<()>;

    /// Parent plugins that want to observe their children being destroyed
    /// return themselves here.
    fn as_listener(&self) -> Option<&dyn PluginListener> {
        None
    }
}

/// Observer of plugin creation and destruction.
///
/// Errors and panics raised from these callbacks are logged and otherwise
/// ignored.
pub trait PluginListener: Send + Sync {
    /// A plugin finished loading.
    fn plugin_created(&self, _name: &PluginName, _plugin: &Arc<dyn Plugin>) -> AppResult<()> {
        Ok(())
    }

    /// A plugin was unloaded.
    fn plugin_destroyed(&self, _name: &PluginName, _plugin: &Arc<dyn Plugin>) -> AppResult<()> {
        Ok(())
    }
}

/// Observer of completed monitoring passes.
pub trait PluginManagerListener: Send + Sync {
    /// One full pass over the install root has completed.
    fn plugins_monitored(&self) -> AppResult<()>;
}
