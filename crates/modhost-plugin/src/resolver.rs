//! Turns a descriptor's entry point into a
//! plugin handle inside an isolation context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use modhost_core::error::AppError;
use modhost_core::result::AppResult;

use crate::isolation::IsolationContext;
use crate::traits::Plugin;

/// Produces plugin handles from entry-point identifiers.
pub trait EntryPointResolver: Send + Sync + std::fmt::Debug {
    /// Constructs one plugin instance for `entry_point` within `context`.
    fn resolve(
        &self,
        entry_point: &str,
        context: &Arc<IsolationContext>,
    ) -> AppResult<Arc<dyn Plugin>>;
}

/// Factory building a plugin inside an isolation context.
pub type PluginFactory =
    Arc<dyn Fn(&Arc<IsolationContext>) -> AppResult<Arc<dyn Plugin>> + Send + Sync>;

/// Resolver backed by in-process factories keyed by entry point.
#[derive(Default)]
pub struct FactoryResolver {
    /// Entry point → factory.
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl FactoryResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the entry point.
    pub fn register<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn(&Arc<IsolationContext>) -> AppResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let entry_point = entry_point.into();
        debug!(entry_point = %entry_point, "Plugin factory registered");
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry_point, Arc::new(factory));
    }

    /// Removes a factory.
    pub fn unregister(&self, entry_point: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(entry_point)
            .is_some()
    }

    /// Whether a factory exists for the entry point.
    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(entry_point)
    }
}

impl EntryPointResolver for FactoryResolver {
    fn resolve(
        &self,
        entry_point: &str,
        context: &Arc<IsolationContext>,
    ) -> AppResult<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(entry_point)
            .cloned()
            .ok_or_else(|| {
                AppError::not_found(format!("No factory registered for entry point '{entry_point}'"))
            })?;
        factory(context)
    }
}

impl std::fmt::Debug for FactoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entry_points: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        entry_points.sort();
        f.debug_struct("FactoryResolver")
            .field("entry_points", &entry_points)
            .finish()
    }
}

/// Shared-library resolver using `libloading` (feature-gated).
#[cfg(feature = "dynamic")]
pub mod dynamic {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tracing::info;

    use modhost_core::error::AppError;
    use modhost_core::result::AppResult;

    use super::EntryPointResolver;
    use crate::isolation::IsolationContext;
    use crate::manager::PluginManager;
    use crate::traits::{Plugin, PluginListener};

    /// Symbol looked up when the entry point names only a library.
    pub const DEFAULT_SYMBOL: &str = "create_plugin";

    /// Type of the creation function exported by dynamic plugins.
    ///
    /// Dynamic plugins must export:
    /// `extern "C" fn create_plugin() -> *mut Box<dyn Plugin>`
    /// and be built with the same compiler as the host.
    pub type CreatePluginFn = unsafe extern "C" fn() -> *mut Box<dyn Plugin>;

    /// Resolves `"<library>[:<symbol>]"` entry points against the scope of
    /// the isolation context.
    #[derive(Debug, Default)]
    pub struct DynamicLibraryResolver;

    impl DynamicLibraryResolver {
        /// Creates a dynamic resolver.
        pub fn new() -> Self {
            Self
        }
    }

    impl EntryPointResolver for DynamicLibraryResolver {
        fn resolve(
            &self,
            entry_point: &str,
            context: &Arc<IsolationContext>,
        ) -> AppResult<Arc<dyn Plugin>> {
            let (library, symbol) = entry_point
                .split_once(':')
                .unwrap_or((entry_point, DEFAULT_SYMBOL));
            let path = context.resolve_in_scope(Path::new(library)).ok_or_else(|| {
                AppError::not_found(format!("Library '{library}' not found in plugin scope"))
            })?;

            // SAFETY: loading runs the library's initializers; only trusted
            // plugins may be placed in the install root.
            let lib = unsafe { libloading::Library::new(&path) }.map_err(|e| {
                AppError::plugin(format!(
                    "Failed to load plugin library '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            let lib = Arc::new(lib);

            let inner = {
                // SAFETY: the symbol must have the `CreatePluginFn` signature.
                let create: libloading::Symbol<CreatePluginFn> =
                    unsafe { lib.get(symbol.as_bytes()) }.map_err(|e| {
                        AppError::plugin(format!(
                            "Plugin library '{}' missing '{}' symbol: {}",
                            path.display(),
                            symbol,
                            e
                        ))
                    })?;
                // SAFETY: ownership of the returned box passes to the host.
                let raw = unsafe { create() };
                if raw.is_null() {
                    return Err(AppError::plugin(format!(
                        "'{}' in '{}' returned null",
                        symbol,
                        path.display()
                    )));
                }
                // SAFETY: `raw` came from `Box::into_raw` in the plugin.
                *unsafe { Box::from_raw(raw) }
            };

            context.attach_resource(Arc::clone(&lib));
            info!(path = %path.display(), symbol = %symbol, "Dynamic plugin loaded");

            Ok(Arc::new(LibraryPlugin {
                inner,
                _library: lib,
            }))
        }
    }

    /// Handle that keeps its library mapped while the plugin object lives.
    struct LibraryPlugin {
        /// Plugin object; declared first so it drops before the library.
        inner: Box<dyn Plugin>,
        /// Library the object's code lives in.
        _library: Arc<libloading::Library>,
    }

    impl std::fmt::Debug for LibraryPlugin {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LibraryPlugin")
                .field("inner", &self.inner)
                .finish()
        }
    }

    #[async_trait]
    impl Plugin for LibraryPlugin {
        async fn initialize(&self, manager: &PluginManager, install_dir: &Path) -> AppResult<()> {
            self.inner.initialize(manager, install_dir).await
        }

        async fn destroy(&self) -> AppResult<()> {
            self.inner.destroy().await
        }

        fn as_listener(&self) -> Option<&dyn PluginListener> {
            self.inner.as_listener()
        }
    }
}

#[cfg(feature = "dynamic")]
pub use dynamic::DynamicLibraryResolver;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::PluginManager;
    use crate::name::PluginName;
    use async_trait::async_trait;
    use std::path::Path;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        async fn initialize(&self, _: &PluginManager, _: &Path) -> AppResult<()> {
            Ok(())
        }
        async fn destroy(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_factory_resolution() {
        let resolver = FactoryResolver::new();
        resolver.register("echo::create", |_ctx| Ok(Arc::new(Echo) as Arc<dyn Plugin>));
        let ctx = IsolationContext::new(&PluginName::from("echo"), Path::new("/p/echo"));

        assert!(resolver.resolve("echo::create", &ctx).is_ok());
        let err = resolver.resolve("missing", &ctx).unwrap_err();
        assert_eq!(err.kind, modhost_core::error::ErrorKind::NotFound);

        assert!(resolver.unregister("echo::create"));
        assert!(!resolver.contains("echo::create"));
    }
}
