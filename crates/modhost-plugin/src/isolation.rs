//! Isolation contexts: the code and resource scope of one plugin family.
//!
//! A context is created for every top-level plugin and shared (via `Arc`)
//! with each child that declares it as parent. It is released exactly once,
//! by whoever unloads the last member, and only when nothing else still
//! holds a reference to it.

use std::any::Any;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::name::PluginName;

tokio::task_local! {
    static ACTIVE_CONTEXT: Arc<IsolationContext>;
}

/// Scope entry contributed by one family member.
#[derive(Debug, Clone)]
struct ScopeEntry {
    /// Member that contributed the path.
    member: PluginName,
    /// Directory searched when resolving the member's code.
    path: PathBuf,
}

/// Execution boundary scoping the code and resources of a plugin family.
pub struct IsolationContext {
    /// Unique context identifier.
    id: Uuid,
    /// When the context was created.
    created_at: DateTime<Utc>,
    /// Ordered scope entries.
    scope: Mutex<Vec<ScopeEntry>>,
    /// Current family members.
    members: Mutex<Vec<PluginName>>,
    /// Opaque resources dropped on release (e.g. loaded libraries).
    resources: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
    /// Whether the context has been released.
    released: AtomicBool,
}

impl IsolationContext {
    /// Creates a fresh context owned by `owner` and scoped to its install path.
    pub fn new(owner: &PluginName, install_path: &Path) -> Arc<Self> {
        let context = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            scope: Mutex::new(Vec::new()),
            members: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        };
        context.attach(owner, install_path);
        debug!(context_id = %context.id, plugin_id = %owner, "Isolation context created");
        Arc::new(context)
    }

    /// Returns the context active for the current task, if any.
    pub fn current() -> Option<Arc<Self>> {
        ACTIVE_CONTEXT.try_with(Arc::clone).ok()
    }

    /// Runs `fut` with this context as the task's active context.
    pub async fn enter<F: Future>(self: Arc<Self>, fut: F) -> F::Output {
        ACTIVE_CONTEXT.scope(self, fut).await
    }

    /// Unique identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Adds a family member and its install path to the scope.
    pub fn attach(&self, member: &PluginName, install_path: &Path) {
        {
            let mut members = lock(&self.members);
            if !members.contains(member) {
                members.push(member.clone());
            }
        }
        self.add_scope_path(member, install_path);
    }

    /// Adds an extra directory (e.g. a dev-mode classes dir) to the scope.
    pub fn add_scope_path(&self, member: &PluginName, path: &Path) {
        let mut scope = lock(&self.scope);
        if !scope.iter().any(|e| e.member == *member && e.path == path) {
            scope.push(ScopeEntry {
                member: member.clone(),
                path: path.to_path_buf(),
            });
        }
    }

    /// Removes a member and its scope paths; returns how many members remain.
    pub fn detach(&self, member: &PluginName) -> usize {
        lock(&self.scope).retain(|e| e.member != *member);
        let mut members = lock(&self.members);
        members.retain(|m| m != member);
        members.len()
    }

    /// Current family members, in attach order.
    pub fn members(&self) -> Vec<PluginName> {
        lock(&self.members).clone()
    }

    /// Scope directories, in attach order.
    pub fn scope_paths(&self) -> Vec<PathBuf> {
        lock(&self.scope).iter().map(|e| e.path.clone()).collect()
    }

    /// Finds `relative` in the first scope directory that contains it.
    pub fn resolve_in_scope(&self, relative: &Path) -> Option<PathBuf> {
        lock(&self.scope)
            .iter()
            .map(|e| e.path.join(relative))
            .find(|candidate| candidate.exists())
    }

    /// Attaches a resource that lives exactly as long as the context.
    pub fn attach_resource<R: Any + Send + Sync>(&self, resource: R) {
        lock(&self.resources).push(Box::new(resource));
    }

    /// Number of attached resources.
    pub fn resource_count(&self) -> usize {
        lock(&self.resources).len()
    }

    /// Whether the context has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Releases the context's resources.
    ///
    /// Fails while any other strong reference besides the caller's exists.
    /// Releasing an already released context succeeds without effect.
    pub fn try_release(self: &Arc<Self>) -> bool {
        if self.is_released() {
            return true;
        }
        let references = Arc::strong_count(self);
        if references > 1 {
            debug!(
                context_id = %self.id,
                references = references,
                "Isolation context still referenced"
            );
            return false;
        }
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return true;
        }
        let resources = std::mem::take(&mut *lock(&self.resources));
        let dropped = resources.len();
        drop(resources);
        debug!(context_id = %self.id, resources = dropped, "Isolation context released");
        true
    }
}

impl std::fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationContext")
            .field("id", &self.id)
            .field("members", &self.members())
            .field("scope_paths", &self.scope_paths())
            .field("resources", &self.resource_count())
            .field("released", &self.is_released())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
