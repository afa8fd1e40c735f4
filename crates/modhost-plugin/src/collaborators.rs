//! Host collaborators the manager delegates to during load and unload.
//!
//! Each concern sits behind its own trait so hosts can plug in real
//! implementations; [`Collaborators::noop`] wires inert ones.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use modhost_core::result::AppResult;

use crate::descriptor::PluginDescriptor;
use crate::name::PluginName;
use crate::reclaim::{FsReclaimer, Reclaimer};
use crate::traits::Plugin;

/// Prepares database schemas declared by plugins.
#[async_trait]
pub trait SchemaProvisioner: Send + Sync {
    /// Returns `false` when the schema is missing and could not be upgraded.
    async fn check_schema(
        &self,
        name: &PluginName,
        descriptor: &PluginDescriptor,
    ) -> AppResult<bool>;
}

/// Registers web/resource extensions contributed by plugins.
#[async_trait]
pub trait ResourceRegistrar: Send + Sync {
    /// Registers the extension described by `descriptor`.
    async fn register(
        &self,
        name: &PluginName,
        plugin: &Arc<dyn Plugin>,
        descriptor: &Path,
    ) -> AppResult<()>;

    /// Undoes [`register`](Self::register).
    async fn unregister(&self, name: &PluginName, descriptor: &Path) -> AppResult<()>;
}

/// Applies plugin cache configuration.
#[async_trait]
pub trait CacheConfigurator: Send + Sync {
    /// Reads and applies the cache configuration file.
    async fn configure(&self, name: &PluginName, descriptor: &Path) -> AppResult<()>;

    /// Drops every cache owned by the plugin.
    async fn unregister_caches(&self, name: &PluginName) -> AppResult<()>;
}

/// Admin-console model that plugins extend with their own sections.
#[async_trait]
pub trait AdminConsole: Send + Sync {
    /// Merges a scoped admin section into the console model.
    async fn add_model(&self, name: &PluginName, section: Value) -> AppResult<()>;

    /// Removes the plugin's contribution.
    async fn remove_model(&self, name: &PluginName) -> AppResult<()>;
}

/// Scanner watching the install root.
#[async_trait]
pub trait PluginMonitor: Send + Sync {
    /// Starts periodic scanning.
    async fn start(&self) -> AppResult<()>;

    /// Stops scanning.
    async fn stop(&self) -> AppResult<()>;

    /// Triggers an immediate scan, optionally waiting for it to finish.
    async fn run_now(&self, wait: bool) -> AppResult<()>;
}

/// Collaborator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

#[async_trait]
impl SchemaProvisioner for Noop {
    async fn check_schema(&self, _: &PluginName, _: &PluginDescriptor) -> AppResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl ResourceRegistrar for Noop {
    async fn register(&self, _: &PluginName, _: &Arc<dyn Plugin>, _: &Path) -> AppResult<()> {
        Ok(())
    }

    async fn unregister(&self, _: &PluginName, _: &Path) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl CacheConfigurator for Noop {
    async fn configure(&self, _: &PluginName, _: &Path) -> AppResult<()> {
        Ok(())
    }

    async fn unregister_caches(&self, _: &PluginName) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AdminConsole for Noop {
    async fn add_model(&self, _: &PluginName, _: Value) -> AppResult<()> {
        Ok(())
    }

    async fn remove_model(&self, _: &PluginName) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl PluginMonitor for Noop {
    async fn start(&self) -> AppResult<()> {
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        Ok(())
    }

    async fn run_now(&self, _: bool) -> AppResult<()> {
        Ok(())
    }
}

/// Bundle of collaborators handed to the manager.
#[derive(Clone)]
pub struct Collaborators {
    /// Schema provisioning.
    pub schema: Arc<dyn SchemaProvisioner>,
    /// Extension registration.
    pub resources: Arc<dyn ResourceRegistrar>,
    /// Cache configuration.
    pub caches: Arc<dyn CacheConfigurator>,
    /// Admin console model.
    pub admin: Arc<dyn AdminConsole>,
    /// Install-root scanner.
    pub monitor: Arc<dyn PluginMonitor>,
    /// Isolation-context and directory reclamation.
    pub reclaimer: Arc<dyn Reclaimer>,
}

impl Collaborators {
    /// Inert collaborators with filesystem reclamation.
    pub fn noop() -> Self {
        Self {
            schema: Arc::new(Noop),
            resources: Arc::new(Noop),
            caches: Arc::new(Noop),
            admin: Arc::new(Noop),
            monitor: Arc::new(Noop),
            reclaimer: Arc::new(FsReclaimer),
        }
    }

    /// Replaces the schema provisioner.
    pub fn with_schema(mut self, schema: Arc<dyn SchemaProvisioner>) -> Self {
        self.schema = schema;
        self
    }

    /// Replaces the resource registrar.
    pub fn with_resources(mut self, resources: Arc<dyn ResourceRegistrar>) -> Self {
        self.resources = resources;
        self
    }

    /// Replaces the cache configurator.
    pub fn with_caches(mut self, caches: Arc<dyn CacheConfigurator>) -> Self {
        self.caches = caches;
        self
    }

    /// Replaces the admin console.
    pub fn with_admin(mut self, admin: Arc<dyn AdminConsole>) -> Self {
        self.admin = admin;
        self
    }

    /// Replaces the monitor.
    pub fn with_monitor(mut self, monitor: Arc<dyn PluginMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Replaces the reclaimer.
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn Reclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
