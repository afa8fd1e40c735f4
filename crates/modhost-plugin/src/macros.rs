//! Convenience macros for plugin development.

/// Exports the creation function a shared-library plugin must provide.
///
/// The expression is evaluated on every call and must produce a value
/// implementing [`Plugin`](crate::traits::Plugin).
///
/// # Example
/// ```rust,ignore
/// use modhost_plugin::prelude::*;
///
/// #[derive(Debug, Default)]
/// struct Search;
///
/// #[async_trait]
/// impl Plugin for Search { /* ... */ }
///
/// export_plugin!(Search::default());
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($constructor:expr) => {
        /// Creates the plugin; ownership passes to the host.
        #[unsafe(no_mangle)]
        pub extern "C" fn create_plugin() -> *mut ::std::boxed::Box<dyn $crate::prelude::Plugin> {
            let plugin: ::std::boxed::Box<dyn $crate::prelude::Plugin> =
                ::std::boxed::Box::new($constructor);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(plugin))
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::path::Path;

    #[derive(Debug)]
    struct Exported;

    #[async_trait]
    impl Plugin for Exported {
        async fn initialize(&self, _: &PluginManager, _: &Path) -> AppResult<()> {
            Ok(())
        }
        async fn destroy(&self) -> AppResult<()> {
            Err(AppError::plugin("exported destroy"))
        }
    }

    mod exported {
        crate::export_plugin!(super::Exported);
    }

    #[tokio::test]
    async fn test_export_plugin_hands_over_ownership() {
        let raw = exported::create_plugin();
        assert!(!raw.is_null());
        // SAFETY: produced by `Box::into_raw` above.
        let plugin = *unsafe { Box::from_raw(raw) };
        let err = plugin.destroy().await.unwrap_err();
        assert_eq!(err.message, "exported destroy");
    }
}
