//! Mutable working state of one tracked repository.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::definitions::Request;
use super::git::Credentials;

/// State owned by the reconcile worker of one repository.
#[derive(Debug, Default)]
pub struct GitopsRuntimeState {
    /// Local checkout.
    pub checkout: PathBuf,
    /// Last commit observed locally.
    pub commit: Option<String>,
    /// Time of the last remote poll.
    pub last_poll: Option<DateTime<Utc>>,
    /// Poll the remote on the next fetch regardless of the interval.
    pub force_poll: bool,
    /// Sync on the next step regardless of automatic sync.
    pub force_sync: bool,
    /// Run a drift check on the next step.
    pub force_inspect: bool,
    /// Wipe the checkout before the next fetch.
    pub reclone: bool,
    /// Resolved credentials; `None` with an auth ref means unresolved.
    pub credentials: Option<Arc<Credentials>>,
    /// Whether credentials were resolved (or none are needed).
    pub auth_resolved: bool,
    /// Ordered definitions from the last successful read.
    pub definitions: Vec<Request>,
    /// Commit the definitions were read from.
    pub definitions_commit: Option<String>,
    /// Pending commit-back.
    pub commit_request: Option<CommitRequest>,
}

impl GitopsRuntimeState {
    /// Creates runtime state for a checkout at `checkout`.
    pub fn new(checkout: PathBuf) -> Self {
        Self {
            checkout,
            ..Self::default()
        }
    }

    /// True when the definitions were not read from the current commit.
    pub fn definitions_stale(&self) -> bool {
        self.commit.is_none() || self.definitions_commit != self.commit
    }

    /// Folds externally raised signals into the runtime flags.
    pub fn absorb(&mut self, signals: &Signals) {
        self.force_poll |= signals.force_poll.swap(false, Ordering::AcqRel);
        self.force_sync |= signals.force_sync.swap(false, Ordering::AcqRel);
        self.force_inspect |= signals.inspect.swap(false, Ordering::AcqRel);
        self.reclone |= signals.reclone.swap(false, Ordering::AcqRel);
        if let Some(request) = signals.take_commit() {
            self.commit_request = Some(request);
        }
    }
}

/// File change to commit back into a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Path relative to the definitions directory.
    pub path: PathBuf,
    pub content: String,
    pub message: String,
}

/// One-shot flags raised outside the reconcile worker.
#[derive(Debug, Default)]
pub struct Signals {
    pub force_poll: AtomicBool,
    pub force_sync: AtomicBool,
    pub inspect: AtomicBool,
    pub reclone: AtomicBool,
    commit: Mutex<Option<CommitRequest>>,
}

impl Signals {
    pub fn request_poll(&self) {
        self.force_poll.store(true, Ordering::Release);
    }

    pub fn request_sync(&self) {
        self.force_sync.store(true, Ordering::Release);
    }

    pub fn request_inspect(&self) {
        self.inspect.store(true, Ordering::Release);
    }

    /// Requests a fresh clone, which implies a poll.
    pub fn request_reclone(&self) {
        self.reclone.store(true, Ordering::Release);
        self.request_poll();
    }

    /// Hands a commit-back to the worker. A newer request replaces an
    /// unabsorbed one.
    pub fn request_commit(&self, request: CommitRequest) {
        *self
            .commit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request);
    }

    fn take_commit(&self) -> Option<CommitRequest> {
        self.commit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
