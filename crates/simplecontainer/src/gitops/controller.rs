//! Inbound operations on gitops resources.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use super::context::EngineContext;
use super::error::{GitOpsError, Result};
use super::events::{Event, EventKind, GitopsEvent};
use super::registry::registry_key;
use super::resource::GitopsResource;
use super::runtime::CommitRequest;
use super::status::{Pending, Status, StatusState};
use super::tracked::{Gitops, GitopsSnapshot};
use super::watcher::{Watcher, WorkItem};

/// Entry point for the API layer and operator tooling.
pub struct Controller {
    ctx: Arc<EngineContext>,
    /// Repositories owned by other nodes, read-only here.
    mirrors: RwLock<HashMap<String, GitopsSnapshot>>,
}

impl Controller {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            mirrors: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GitopsEvent> {
        self.ctx.events.subscribe()
    }

    /// Parses and applies a gitops definition.
    pub fn apply_yaml(&self, content: &str) -> Result<GitopsSnapshot> {
        self.apply(GitopsResource::from_yaml(content)?)
    }

    /// Creates or updates a tracked repository.
    ///
    /// A resource without a node is claimed by this node. Resources owned by
    /// another node are only mirrored.
    pub fn apply(&self, mut resource: GitopsResource) -> Result<GitopsSnapshot> {
        resource.validate()?;
        if resource.spec.node.is_empty() {
            resource.spec.node = self.ctx.settings.node_id.clone();
        }

        let group = resource.meta.group.clone();
        let name = resource.meta.name.clone();

        if resource.spec.node != self.ctx.settings.node_id {
            log::debug!(
                "gitops {}/{}: owned by {}, mirroring",
                group,
                name,
                resource.spec.node
            );
            // Handed over: stop here, the new owner adopts the children.
            if let Some(watcher) = self.ctx.registry.find_local(&group, &name) {
                log::info!(
                    "gitops {}/{}: moved to node {}, draining",
                    group,
                    name,
                    resource.spec.node
                );
                watcher.gitops().journal().info("moved to another node");
                if let Err(e) = watcher.drain() {
                    log::debug!("gitops {}/{}: already stopping: {}", group, name, e);
                }
            }
            let snapshot = {
                let mut mirrors = self.write_mirrors();
                let entry = mirrors
                    .entry(registry_key(&group, &name))
                    .or_insert_with(|| GitopsSnapshot {
                        definition: resource.clone(),
                        status: Status::new(),
                        commit: None,
                        last_poll: None,
                    });
                entry.definition = resource;
                entry.clone()
            };
            return Ok(snapshot);
        }

        if let Some(watcher) = self.ctx.registry.find_local(&group, &name) {
            return self.update(&watcher, resource);
        }

        self.remove_mirror(&group, &name);

        let gitops = Arc::new(Gitops::new(resource, &self.ctx.settings.data_dir));
        gitops.journal().info("created");
        let watcher = Watcher::start(Arc::clone(&self.ctx), gitops);
        self.ctx.registry.add_or_update(Arc::clone(&watcher));
        watcher.push(WorkItem::Reconcile)?;

        log::info!("gitops {}/{}: tracking", group, name);
        Ok(watcher.gitops().snapshot())
    }

    fn update(&self, watcher: &Watcher, resource: GitopsResource) -> Result<GitopsSnapshot> {
        let gitops = watcher.gitops();
        let status = gitops.status();
        if status.pending == Pending::Delete || watcher.is_done() {
            return Err(conflict(gitops, "deletion in progress"));
        }

        if gitops.definition() == resource {
            log::debug!("gitops {}: definition unchanged", gitops.key());
            return Ok(gitops.snapshot());
        }

        if gitops.replace_definition(resource) {
            gitops.journal().info("repository changed, re-cloning");
            gitops.signals().request_reclone();
        } else {
            gitops.signals().request_poll();
        }

        if status.state == StatusState::Backoff {
            reset(gitops);
        }

        watcher.push(WorkItem::Reconcile)?;
        Ok(gitops.snapshot())
    }

    /// Starts deletion. Children are removed by the watcher's cleanup.
    pub fn delete(&self, group: &str, name: &str) -> Result<()> {
        let Some(watcher) = self.ctx.registry.find_local(group, name) else {
            if self.remove_mirror(group, name) {
                return Ok(());
            }
            return Err(not_found(group, name));
        };

        if watcher.delete()? {
            watcher.gitops().journal().info("delete requested");
        } else {
            log::debug!("gitops {}/{}: delete already pending", group, name);
        }
        Ok(())
    }

    /// Handles a REFRESH, SYNC or INSPECT event.
    ///
    /// Returns false when a conflicting pending intent made it a no-op.
    pub fn event(&self, event: &Event) -> Result<bool> {
        let watcher = self
            .ctx
            .registry
            .find_local(&event.group, &event.name)
            .ok_or_else(|| not_found(&event.group, &event.name))?;
        let gitops = watcher.gitops();

        let accepted = gitops.update_status(|s| {
            let conflicting = match event.kind {
                EventKind::Sync => s.pending != Pending::None,
                EventKind::Refresh | EventKind::Inspect => s.pending == Pending::Delete,
            };
            if !conflicting && event.kind == EventKind::Sync {
                s.pending = Pending::Sync;
            }
            !conflicting
        });

        if !accepted {
            log::debug!(
                "gitops {}: {:?} ignored, pending intent",
                gitops.key(),
                event.kind
            );
            return Ok(false);
        }

        match event.kind {
            EventKind::Refresh => gitops.signals().request_poll(),
            EventKind::Inspect => gitops.signals().request_inspect(),
            EventKind::Sync => {
                if gitops.status().state == StatusState::Backoff {
                    reset(gitops);
                }
                gitops.signals().request_sync();
            }
        }

        watcher.push(WorkItem::Reconcile)?;
        Ok(true)
    }

    /// Every known repository, local and mirrored, sorted by key.
    pub fn list(&self) -> Vec<GitopsSnapshot> {
        let mut snapshots: Vec<_> = self
            .ctx
            .registry
            .list()
            .iter()
            .map(|w| w.gitops().snapshot())
            .collect();

        let mirrors = self
            .mirrors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A repository still draining locally is listed once.
        snapshots.extend(
            mirrors
                .values()
                .filter(|s| {
                    !self
                        .ctx
                        .registry
                        .contains(&s.definition.meta.group, &s.definition.meta.name)
                })
                .cloned(),
        );
        snapshots.sort_by_key(|s| s.definition.key());
        snapshots
    }

    pub fn get(&self, group: &str, name: &str) -> Result<GitopsSnapshot> {
        if let Some(watcher) = self.ctx.registry.find_local(group, name) {
            return Ok(watcher.gitops().snapshot());
        }

        self.mirrors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&registry_key(group, name))
            .cloned()
            .ok_or_else(|| not_found(group, name))
    }

    pub fn remove(&self, group: &str, name: &str) -> Result<()> {
        self.delete(group, name)
    }

    pub fn refresh(&self, group: &str, name: &str) -> Result<bool> {
        self.event(&Event::new(EventKind::Refresh, group, name))
    }

    pub fn sync(&self, group: &str, name: &str) -> Result<bool> {
        self.event(&Event::new(EventKind::Sync, group, name))
    }

    pub fn inspect(&self, group: &str, name: &str) -> Result<bool> {
        self.event(&Event::new(EventKind::Inspect, group, name))
    }

    /// Writes a file into the repository and pushes it.
    ///
    /// Only accepted while the repository is INSYNC or DRIFTED.
    pub fn commit(&self, group: &str, name: &str, request: CommitRequest) -> Result<()> {
        let watcher = self
            .ctx
            .registry
            .find_local(group, name)
            .ok_or_else(|| not_found(group, name))?;
        let gitops = watcher.gitops();

        let status = gitops.status();
        if status.pending != Pending::None {
            return Err(conflict(gitops, "another operation is pending"));
        }
        if !matches!(status.state, StatusState::InSync | StatusState::Drifted) {
            return Err(conflict(
                gitops,
                &format!("cannot commit while {}", status.state),
            ));
        }

        gitops.signals().request_commit(request);
        watcher.push(WorkItem::Reconcile)
    }

    /// Records the status of a repository reconciled elsewhere.
    pub fn observe_status(&self, snapshot: GitopsSnapshot) {
        if snapshot.definition.spec.node == self.ctx.settings.node_id {
            return;
        }
        self.write_mirrors()
            .insert(snapshot.definition.key(), snapshot);
    }

    /// Resumes a repository from a persisted snapshot.
    pub fn restore(&self, snapshot: GitopsSnapshot) -> Result<()> {
        let GitopsSnapshot {
            definition,
            mut status,
            ..
        } = snapshot;
        definition.validate()?;

        if definition.spec.node != self.ctx.settings.node_id {
            self.observe_status(GitopsSnapshot {
                definition,
                status,
                commit: None,
                last_poll: None,
            });
            return Ok(());
        }

        if self
            .ctx
            .registry
            .contains(&definition.meta.group, &definition.meta.name)
        {
            return Err(GitOpsError::Conflict {
                group: definition.meta.group.clone(),
                name: definition.meta.name.clone(),
                reason: "already tracked".to_string(),
            });
        }

        status.reconciling = false;
        let deleting = status.pending == Pending::Delete;
        let gitops = Arc::new(Gitops::with_status(
            definition,
            &self.ctx.settings.data_dir,
            status,
        ));
        gitops.journal().info("restored");
        let watcher = Watcher::start(Arc::clone(&self.ctx), gitops);
        self.ctx.registry.add_or_update(Arc::clone(&watcher));

        watcher.push(if deleting {
            WorkItem::Delete
        } else {
            WorkItem::Reconcile
        })
    }

    /// Drains every local repository and waits for them to stop.
    pub async fn drain(&self, timeout: Duration) -> bool {
        if self.ctx.registry.drain() == 0 {
            return true;
        }
        self.ctx.registry.wait_empty(timeout).await
    }

    fn write_mirrors(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, GitopsSnapshot>> {
        self.mirrors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove_mirror(&self, group: &str, name: &str) -> bool {
        self.write_mirrors()
            .remove(&registry_key(group, name))
            .is_some()
    }
}

fn reset(gitops: &Gitops) {
    let group = gitops.group().to_string();
    let name = gitops.name().to_string();
    if gitops.update_status(|s| s.reset(&group, &name)) {
        gitops.journal().info("BACKOFF -> CREATED (reset)");
    }
}

fn not_found(group: &str, name: &str) -> GitOpsError {
    GitOpsError::NotFound {
        group: group.to_string(),
        name: name.to_string(),
    }
}

fn conflict(gitops: &Gitops, reason: &str) -> GitOpsError {
    GitOpsError::Conflict {
        group: gitops.group().to_string(),
        name: gitops.name().to_string(),
        reason: reason.to_string(),
    }
}
