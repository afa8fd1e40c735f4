//! Reclamation of an unloaded plugin's isolation context and directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::isolation::IsolationContext;
use crate::name::PluginName;

/// Releases what an unloaded plugin left behind.
///
/// Returns `true` once nothing of the plugin remains reachable; `false`
/// means the plugin is still active and the attempt may be retried.
#[async_trait]
pub trait Reclaimer: Send + Sync {
    /// Attempts reclamation for `name`.
    async fn reclaim(
        &self,
        name: &PluginName,
        context: &Arc<IsolationContext>,
        install_path: &Path,
    ) -> bool;
}

/// Default reclaimer: releases the context when `name` was its last
/// member, then removes the install directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsReclaimer;

#[async_trait]
impl Reclaimer for FsReclaimer {
    async fn reclaim(
        &self,
        name: &PluginName,
        context: &Arc<IsolationContext>,
        install_path: &Path,
    ) -> bool {
        if context.detach(name) == 0 && !context.try_release() {
            return false;
        }
        remove_tree(install_path).await
    }
}

/// Removes a directory tree; `true` when it no longer exists.
pub async fn remove_tree(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to remove plugin directory");
        }
    }
    matches!(tokio::fs::try_exists(path).await, Ok(false))
}
