//! GitOps reconciliation engine.
//!
//! Each tracked repository (a `gitops` resource) gets a [`Watcher`]: a loop
//! with its own tickers and a single-worker [`WorkQueue`] that runs one
//! reconcile step at a time. A step moves the repository through the
//! [`StatusState`] machine: clone or poll the remote, read and order the
//! definitions it holds, compare them with the control plane and apply them.
//!
//! The [`Controller`] is the inbound surface; the [`Registry`] holds the
//! watchers of this node.

pub mod context;
pub mod controller;
pub mod controlplane;
pub mod definitions;
pub mod error;
pub mod events;
pub mod git;
pub mod journal;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod status;
pub mod syncer;
pub mod tracked;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{EngineContext, EngineSettings};
pub use controller::Controller;
pub use controlplane::{Comparison, ControlPlane, HttpControlPlane};
pub use definitions::{Definition, ReadOutcome, Request};
pub use error::{ErrorKind, GitOpsError, Result};
pub use events::{Event, EventBus, EventKind, GitopsEvent, GitopsEventKind};
pub use git::{Credentials, GitCli, SourceControl};
pub use journal::{JournalEntry, RepositoryJournal};
pub use queue::{Priority, WorkQueue};
pub use registry::Registry;
pub use resource::{
    AuthRef, AuthSource, GitopsResource, GitopsSpec, ObjectMeta, Owner, Resource, API_PREFIX,
    DEFAULT_POLLING_INTERVAL, KIND_GITOPS,
};
pub use runtime::{CommitRequest, GitopsRuntimeState, Signals};
pub use status::{Category, Pending, StateGraph, Status, StatusState};
pub use syncer::DriftReport;
pub use tracked::{Gitops, GitopsSnapshot};
pub use watcher::{Teardown, Watcher, WorkItem};
