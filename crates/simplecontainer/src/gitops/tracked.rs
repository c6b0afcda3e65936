//! A tracked repository: definition, status and runtime state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::journal::RepositoryJournal;
use super::resource::GitopsResource;
use super::runtime::{GitopsRuntimeState, Signals};
use super::status::{Status, StatusState};

/// Serialisable view of a tracked repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitopsSnapshot {
    pub definition: GitopsResource,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
struct Head {
    commit: Option<String>,
    last_poll: Option<DateTime<Utc>>,
}

/// One tracked repository.
///
/// The definition and status are readable from anywhere. The runtime state is
/// only locked by the reconcile worker; other tasks talk to it through
/// [`Signals`].
pub struct Gitops {
    group: String,
    name: String,
    definition: RwLock<GitopsResource>,
    status: Mutex<Status>,
    runtime: tokio::sync::Mutex<GitopsRuntimeState>,
    signals: Signals,
    head: Mutex<Head>,
    journal: RepositoryJournal,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Gitops {
    pub fn new(resource: GitopsResource, data_dir: &Path) -> Self {
        Self::with_status(resource, data_dir, Status::new())
    }

    /// Creates the entity with a status carried over from a snapshot.
    pub fn with_status(resource: GitopsResource, data_dir: &Path, status: Status) -> Self {
        let group = resource.meta.group.clone();
        let name = resource.meta.name.clone();
        let checkout = resource.checkout_path(data_dir);

        Self {
            journal: RepositoryJournal::new(data_dir, &group, &name),
            group,
            name,
            definition: RwLock::new(resource),
            status: Mutex::new(status),
            runtime: tokio::sync::Mutex::new(GitopsRuntimeState::new(checkout)),
            signals: Signals::default(),
            head: Mutex::new(Head::default()),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry key, `<group>.<name>`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    /// Current definition.
    pub fn definition(&self) -> GitopsResource {
        self.definition
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replaces the definition. Returns true if the repository or revision
    /// changed and the checkout must be re-cloned.
    pub fn replace_definition(&self, resource: GitopsResource) -> bool {
        let mut definition = self
            .definition
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let reclone = definition.spec.source_changed(&resource.spec);
        *definition = resource;
        reclone
    }

    /// Polling interval of the current definition.
    pub fn polling_interval(&self, default: Duration) -> Duration {
        self.definition
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .spec
            .polling_interval_or(default)
    }

    /// Copy of the current status.
    pub fn status(&self) -> Status {
        lock(&self.status).clone()
    }

    /// Runs `f` with the status locked.
    pub fn update_status<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        f(&mut lock(&self.status))
    }

    /// Moves the state machine, logging to the journal.
    pub fn transition(&self, destination: StatusState) -> bool {
        let (from, moved) = {
            let mut status = lock(&self.status);
            let from = status.state;
            (from, status.transition_state(&self.group, &self.name, destination))
        };

        if from != destination {
            if moved {
                self.journal.info(&format!("{} -> {}", from, destination));
            } else {
                self.journal
                    .warn(&format!("transition {} -> {} rejected", from, destination));
            }
        }
        moved
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn journal(&self) -> &RepositoryJournal {
        &self.journal
    }

    /// Runtime state. Locked by the reconcile worker only.
    pub(crate) fn runtime(&self) -> &tokio::sync::Mutex<GitopsRuntimeState> {
        &self.runtime
    }

    /// Publishes the commit and poll time for snapshots.
    pub(crate) fn record_head(&self, runtime: &GitopsRuntimeState) {
        let mut head = lock(&self.head);
        head.commit = runtime.commit.clone();
        head.last_poll = runtime.last_poll;
    }

    pub fn snapshot(&self) -> GitopsSnapshot {
        let head = lock(&self.head).clone();
        GitopsSnapshot {
            definition: self.definition(),
            status: self.status(),
            commit: head.commit,
            last_poll: head.last_poll,
        }
    }
}
