//! # modhost-plugin
//!
//! Plugin lifecycle core for Modhost. Provides:
//!
//! - Loading with failure classification and retry suppression
//! - Parent/child plugin families sharing one isolation context
//! - Unloading with bounded-retry reclamation and rollback
//! - Lifecycle events with per-listener failure isolation
//! - Entry-point resolution from in-process factories, or shared
//!   libraries via `libloading` (feature `dynamic`)

pub mod collaborators;
pub mod dependency;
pub mod descriptor;
pub mod dev;
pub mod events;
pub mod failure;
pub mod host;
pub mod isolation;
pub mod loader;
pub mod locks;
pub mod macros;
pub mod manager;
pub mod name;
pub mod prelude;
pub mod reclaim;
pub mod registry;
pub mod resolver;
pub mod traits;
pub mod unloader;
pub mod version;

mod panic;

pub use collaborators::Collaborators;
pub use descriptor::PluginDescriptor;
pub use host::HostEnvironment;
pub use isolation::IsolationContext;
pub use loader::LoadOutcome;
pub use manager::{LifecycleSettings, PluginManager, PluginManagerBuilder};
pub use name::PluginName;
pub use registry::{PluginInfo, PluginState, Registry};
pub use resolver::{EntryPointResolver, FactoryResolver};
pub use traits::{Plugin, PluginListener, PluginManagerListener};
pub use unloader::UnloadOutcome;
