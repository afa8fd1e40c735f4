//! Shared helpers for lifecycle integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use serde_json::Value;
use tempfile::TempDir;

use modhost_core::error::AppError;
use modhost_core::result::AppResult;
use modhost_plugin::collaborators::{
    AdminConsole, CacheConfigurator, ResourceRegistrar, SchemaProvisioner,
};
use modhost_plugin::reclaim::{FsReclaimer, Reclaimer};
use modhost_plugin::{
    Collaborators, FactoryResolver, HostEnvironment, IsolationContext, LifecycleSettings, Plugin,
    PluginDescriptor, PluginListener, PluginManager, PluginName,
};

/// Ordered record of everything observed during a test.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Occurrences of `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

impl PluginListener for Journal {
    fn plugin_created(&self, name: &PluginName, _: &Arc<dyn Plugin>) -> AppResult<()> {
        self.push(format!("created:{}", name.folded()));
        Ok(())
    }

    fn plugin_destroyed(&self, name: &PluginName, _: &Arc<dyn Plugin>) -> AppResult<()> {
        self.push(format!("destroyed:{}", name.folded()));
        Ok(())
    }
}

/// How a test plugin behaves when initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitBehavior {
    /// Succeeds.
    Ok,
    /// Returns an error.
    Fail,
    /// Panics.
    Panic,
    /// Succeeds but keeps a reference to its isolation context.
    RetainContext,
    /// Succeeds after sleeping, journaling `initialized:<name>` at the end.
    Slow(Duration),
}

/// Test plugin recording its lifecycle into a journal.
#[derive(Debug)]
pub struct TestPlugin {
    name: String,
    journal: Arc<Journal>,
    behavior: InitBehavior,
    retained: Mutex<Option<Arc<IsolationContext>>>,
}

impl TestPlugin {
    /// Creates a test plugin.
    pub fn new(name: &str, journal: Arc<Journal>, behavior: InitBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal,
            behavior,
            retained: Mutex::new(None),
        })
    }

    /// Drops a retained isolation context.
    pub fn release(&self) {
        self.retained.lock().unwrap().take();
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    async fn initialize(&self, _: &PluginManager, _: &Path) -> AppResult<()> {
        self.journal.push(format!("init:{}", self.name));
        match self.behavior {
            InitBehavior::Ok => Ok(()),
            InitBehavior::Fail => Err(AppError::plugin(format!("{} refuses to start", self.name))),
            InitBehavior::Panic => panic!("{} exploded", self.name),
            InitBehavior::RetainContext => {
                *self.retained.lock().unwrap() = IsolationContext::current();
                Ok(())
            }
            InitBehavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.journal.push(format!("initialized:{}", self.name));
                Ok(())
            }
        }
    }

    async fn destroy(&self) -> AppResult<()> {
        self.journal.push(format!("destroy:{}", self.name));
        Ok(())
    }

    fn as_listener(&self) -> Option<&dyn PluginListener> {
        Some(self)
    }
}

impl PluginListener for TestPlugin {
    fn plugin_destroyed(&self, child: &PluginName, _: &Arc<dyn Plugin>) -> AppResult<()> {
        self.journal
            .push(format!("child-destroyed:{}:{}", self.name, child.folded()));
        Ok(())
    }
}

/// Reclaimer that reports chosen plugins as still active.
#[derive(Debug, Default)]
pub struct BlockingReclaimer {
    blocked: Mutex<HashSet<String>>,
}

impl BlockingReclaimer {
    /// Starts failing reclamation of `name`.
    pub fn block(&self, name: &str) {
        self.blocked.lock().unwrap().insert(name.to_lowercase());
    }

    /// Stops failing reclamation of `name`.
    pub fn unblock(&self, name: &str) {
        self.blocked.lock().unwrap().remove(&name.to_lowercase());
    }
}

#[async_trait]
impl Reclaimer for BlockingReclaimer {
    async fn reclaim(
        &self,
        name: &PluginName,
        context: &Arc<IsolationContext>,
        install_path: &Path,
    ) -> bool {
        if self.blocked.lock().unwrap().contains(&name.folded()) {
            return false;
        }
        FsReclaimer.reclaim(name, context, install_path).await
    }
}

/// How [`Recorder`] hooks respond after journaling the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookMode {
    /// Succeed.
    #[default]
    Ok,
    /// Return an error.
    Fail,
    /// Panic.
    Panic,
}

/// Schema, extension, cache and admin collaborator journaling every call.
#[derive(Debug)]
pub struct Recorder {
    journal: Arc<Journal>,
    mode: Mutex<HookMode>,
    sections: Mutex<Vec<Value>>,
}

impl Recorder {
    /// Recorder writing into `journal`.
    pub fn new(journal: Arc<Journal>) -> Arc<Self> {
        Arc::new(Self {
            journal,
            mode: Mutex::new(HookMode::Ok),
            sections: Mutex::new(Vec::new()),
        })
    }

    /// Changes how later hook calls respond.
    pub fn set_mode(&self, mode: HookMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Admin sections handed to the console so far.
    pub fn sections(&self) -> Vec<Value> {
        self.sections.lock().unwrap().clone()
    }

    fn call(&self, entry: String) -> AppResult<()> {
        self.journal.push(entry.clone());
        let mode = *self.mode.lock().unwrap();
        match mode {
            HookMode::Ok => Ok(()),
            HookMode::Fail => Err(AppError::internal(format!("{entry} failed"))),
            HookMode::Panic => panic!("{entry} exploded"),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[async_trait]
impl SchemaProvisioner for Recorder {
    async fn check_schema(&self, name: &PluginName, _: &PluginDescriptor) -> AppResult<bool> {
        self.call(format!("schema:{}", name.folded()))?;
        Ok(true)
    }
}

#[async_trait]
impl ResourceRegistrar for Recorder {
    async fn register(
        &self,
        name: &PluginName,
        _: &Arc<dyn Plugin>,
        descriptor: &Path,
    ) -> AppResult<()> {
        self.call(format!("extension:{}:{}", name.folded(), file_name(descriptor)))
    }

    async fn unregister(&self, name: &PluginName, descriptor: &Path) -> AppResult<()> {
        self.call(format!(
            "extension-removed:{}:{}",
            name.folded(),
            file_name(descriptor)
        ))
    }
}

#[async_trait]
impl CacheConfigurator for Recorder {
    async fn configure(&self, name: &PluginName, _: &Path) -> AppResult<()> {
        self.call(format!("caches:{}", name.folded()))
    }

    async fn unregister_caches(&self, name: &PluginName) -> AppResult<()> {
        self.call(format!("caches-removed:{}", name.folded()))
    }
}

#[async_trait]
impl AdminConsole for Recorder {
    async fn add_model(&self, name: &PluginName, section: Value) -> AppResult<()> {
        self.call(format!("admin-add:{}", name.folded()))?;
        self.sections.lock().unwrap().push(section);
        Ok(())
    }

    async fn remove_model(&self, name: &PluginName) -> AppResult<()> {
        self.call(format!("admin-remove:{}", name.folded()))
    }
}

/// Manager over a temporary install root.
pub struct TestHost {
    /// Install root.
    pub dir: TempDir,
    /// Factory resolver shared with the manager.
    pub resolver: Arc<FactoryResolver>,
    /// Reclaimer shared with the manager.
    pub reclaimer: Arc<BlockingReclaimer>,
    /// Schema, extension, cache and admin collaborator.
    pub hooks: Arc<Recorder>,
    /// Manager under test.
    pub manager: Arc<PluginManager>,
    /// Lifecycle journal.
    pub journal: Arc<Journal>,
}

impl TestHost {
    /// Host with millisecond reclamation timings.
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    /// Host with adjusted settings.
    pub async fn with_settings(adjust: impl FnOnce(&mut LifecycleSettings)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create install root");
        let mut settings = LifecycleSettings {
            plugins_dir: dir.path().to_path_buf(),
            initial_reclaim_wait: Duration::from_millis(1),
            reclaim_retry_interval: Duration::from_millis(1),
            max_reclaim_retries: 2,
            ..LifecycleSettings::default()
        };
        adjust(&mut settings);

        let journal = Arc::new(Journal::default());
        let resolver = Arc::new(FactoryResolver::new());
        let reclaimer = Arc::new(BlockingReclaimer::default());
        let hooks = Recorder::new(journal.clone());
        let collaborators = Collaborators::noop()
            .with_schema(hooks.clone())
            .with_resources(hooks.clone())
            .with_caches(hooks.clone())
            .with_admin(hooks.clone())
            .with_reclaimer(reclaimer.clone());
        let manager = PluginManager::builder(settings)
            .host(HostEnvironment::new(Version::new(5, 0, 0), false))
            .resolver(resolver.clone())
            .collaborators(collaborators)
            .build()
            .expect("Failed to build manager");
        let manager = Arc::new(manager);
        manager.start().await.expect("Failed to start manager");
        manager.add_listener(journal.clone()).await;

        Self {
            dir,
            resolver,
            reclaimer,
            hooks,
            manager,
            journal,
        }
    }

    /// Path of a plugin directory in the install root.
    pub fn path(&self, dir_name: &str) -> PathBuf {
        self.dir.path().join(dir_name)
    }

    /// Creates a plugin directory with the given descriptor.
    pub fn write_plugin(&self, dir_name: &str, descriptor: Value) -> PathBuf {
        let path = self.path(dir_name);
        std::fs::create_dir_all(&path).expect("Failed to create plugin dir");
        std::fs::write(
            path.join("plugin.json"),
            serde_json::to_vec_pretty(&descriptor).expect("Failed to encode descriptor"),
        )
        .expect("Failed to write descriptor");
        path
    }

    /// Writes `relative` inside a plugin directory.
    pub fn write_file(&self, dir_name: &str, relative: &str, contents: &str) {
        let path = self.path(dir_name).join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create parent dir");
        std::fs::write(path, contents).expect("Failed to write file");
    }

    /// Creates a plugin directory whose descriptor names `<dir_name>::create`.
    pub fn write_simple(&self, dir_name: &str, parent: Option<&str>) -> PathBuf {
        let mut descriptor = serde_json::json!({
            "entryPoint": format!("{}::create", dir_name.to_lowercase()),
            "version": "1.0.0",
        });
        if let Some(parent) = parent {
            descriptor["parentPlugin"] = Value::String(parent.to_string());
        }
        self.write_plugin(dir_name, descriptor)
    }

    /// Registers a fresh test plugin for every resolution of `<name>::create`.
    pub fn register_plugin(&self, name: &str, behavior: InitBehavior) {
        let journal = self.journal.clone();
        let label = name.to_lowercase();
        self.resolver.register(format!("{label}::create"), move |_| {
            Ok(TestPlugin::new(&label, journal.clone(), behavior) as Arc<dyn Plugin>)
        });
    }

    /// Registers one shared test plugin instance for `<name>::create`.
    pub fn register_shared_plugin(&self, name: &str, behavior: InitBehavior) -> Arc<TestPlugin> {
        let label = name.to_lowercase();
        let plugin = TestPlugin::new(&label, self.journal.clone(), behavior);
        let shared = plugin.clone();
        self.resolver.register(format!("{label}::create"), move |_| {
            Ok(shared.clone() as Arc<dyn Plugin>)
        });
        plugin
    }

    /// Registers a factory that always fails, returning its call counter.
    pub fn register_failing(&self, name: &str) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        self.resolver
            .register(format!("{}::create", name.to_lowercase()), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::plugin("constructor failed"))
            });
        calls
    }
}
