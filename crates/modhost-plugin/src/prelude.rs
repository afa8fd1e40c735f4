//! Prelude for convenient imports.

pub use async_trait::async_trait;

pub use modhost_core::error::AppError;
pub use modhost_core::result::AppResult;

pub use crate::isolation::IsolationContext;
pub use crate::manager::PluginManager;
pub use crate::name::PluginName;
pub use crate::traits::{Plugin, PluginListener, PluginManagerListener};

pub use crate::export_plugin;
