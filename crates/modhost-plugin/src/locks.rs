//! Per-name transition locks serializing loads and unloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::name::PluginName;

/// One async mutex per plugin name, created on demand.
#[derive(Debug, Default)]
pub struct TransitionLocks {
    locks: Mutex<HashMap<PluginName, Arc<AsyncMutex<()>>>>,
}

impl TransitionLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and acquires the lock of `name`.
    ///
    /// Entries nobody holds or waits on are dropped first, so the table only
    /// grows with the number of concurrent transitions.
    pub async fn acquire(&self, name: &PluginName) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            Arc::clone(locks.entry(name.clone()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of names currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no name is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locks held by one unload, which may span a whole plugin family.
///
/// Family unloads always lock the family's top-most plugin first, so two
/// unloads touching the same family cannot deadlock.
#[derive(Debug, Default)]
pub struct HeldLocks {
    held: HashMap<PluginName, OwnedMutexGuard<()>>,
}

impl HeldLocks {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock of `name` unless this set already holds it.
    pub async fn ensure(&mut self, locks: &TransitionLocks, name: &PluginName) {
        if !self.held.contains_key(name) {
            let guard = locks.acquire(name).await;
            self.held.insert(name.clone(), guard);
        }
    }

    /// Whether this set holds the lock of `name`.
    pub fn holds(&self, name: &PluginName) -> bool {
        self.held.contains_key(name)
    }
}
