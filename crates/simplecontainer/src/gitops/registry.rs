//! Active watchers of this node, keyed by `group.name`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Notify;

use super::controlplane::{state_key, ControlPlane};
use super::error::Result;
use super::watcher::Watcher;

/// Concurrent map of tracked repositories reconciled on this node.
pub struct Registry {
    watchers: RwLock<HashMap<String, Arc<Watcher>>>,
    control_plane: Arc<dyn ControlPlane>,
    state_prefix: String,
    emptied: Notify,
}

pub fn registry_key(group: &str, name: &str) -> String {
    format!("{}.{}", group, name)
}

impl Registry {
    pub fn new(control_plane: Arc<dyn ControlPlane>, state_prefix: String) -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            control_plane,
            state_prefix,
            emptied: Notify::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Watcher>>> {
        self.watchers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Watcher>>> {
        self.watchers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts `watcher`, returning the one it replaced.
    pub fn add_or_update(&self, watcher: Arc<Watcher>) -> Option<Arc<Watcher>> {
        let key = watcher.gitops().key();
        log::debug!("registry: tracking {}", key);
        self.write().insert(key, watcher)
    }

    /// Looks up a watcher without touching the network.
    pub fn find_local(&self, group: &str, name: &str) -> Option<Arc<Watcher>> {
        self.read().get(&registry_key(group, name)).cloned()
    }

    pub fn contains(&self, group: &str, name: &str) -> bool {
        self.read().contains_key(&registry_key(group, name))
    }

    /// All watchers, sorted by key.
    pub fn list(&self) -> Vec<Arc<Watcher>> {
        let mut watchers: Vec<_> = self.read().values().cloned().collect();
        watchers.sort_by_key(|w| w.gitops().key());
        watchers
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops the entry and removes its replicated state.
    pub async fn remove(&self, group: &str, name: &str) -> Result<()> {
        let removed = self.forget(group, name);
        if removed.is_none() {
            log::debug!("registry: {}.{} was not tracked", group, name);
        }

        let key = state_key(&self.state_prefix, group, name);
        self.control_plane.remove_state(&key).await
    }

    /// Drops the entry, keeping replicated state.
    pub fn forget(&self, group: &str, name: &str) -> Option<Arc<Watcher>> {
        let (removed, empty) = {
            let mut watchers = self.write();
            let removed = watchers.remove(&registry_key(group, name));
            (removed, watchers.is_empty())
        };

        if empty {
            self.emptied.notify_waiters();
        }
        removed
    }

    /// Moves every watcher toward deletion without touching its children.
    /// Returns the number of watchers drained.
    pub fn drain(&self) -> usize {
        let watchers = self.list();
        for watcher in &watchers {
            if let Err(e) = watcher.drain() {
                log::warn!("registry: drain of {} failed: {}", watcher.gitops().key(), e);
            }
        }
        log::info!("registry: draining {} repositories", watchers.len());
        watchers.len()
    }

    /// Waits until the registry is empty. Returns false on timeout.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.emptied.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
