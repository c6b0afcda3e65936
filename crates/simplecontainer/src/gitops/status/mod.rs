//! Status state machine for one tracked repository.

mod graph;
mod state;

pub use graph::StateGraph;
pub use state::{Category, Pending, StatusState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State-machine instance owned by one watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Current state.
    pub state: StatusState,
    /// State before the last real transition.
    pub previous_state: StatusState,
    /// Pending intent (sync or delete requested).
    #[serde(default)]
    pub pending: Pending,
    /// Set for the duration of one reconcile step.
    #[serde(default)]
    pub reconciling: bool,
    /// Whether live state matched the repository on the last check.
    #[serde(default)]
    pub in_sync: bool,
    /// Commit applied by the last successful sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_commit: Option<String>,
    /// Time of the last transition.
    pub last_update: DateTime<Utc>,
    /// Consecutive sync failures.
    #[serde(default)]
    pub failures: u32,
    /// Last error surfaced by a reconcile step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Definitions dropped on the last read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Status {
    /// Creates a status in `CREATED`.
    pub fn new() -> Self {
        Self {
            state: StatusState::Created,
            previous_state: StatusState::Created,
            pending: Pending::None,
            reconciling: false,
            in_sync: false,
            last_synced_commit: None,
            last_update: Utc::now(),
            failures: 0,
            last_error: None,
            warnings: Vec::new(),
        }
    }

    /// Returns the category of the current state.
    pub fn category(&self) -> Category {
        self.state.category()
    }

    /// Returns true once the state machine reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.category() == Category::End
    }

    /// Claims the reconcile slot. Returns false if a step is already running.
    pub fn begin_reconcile(&mut self) -> bool {
        if self.reconciling {
            return false;
        }
        self.reconciling = true;
        true
    }

    /// Releases the reconcile slot without transitioning.
    pub fn end_reconcile(&mut self) {
        self.reconciling = false;
    }

    /// Moves to `destination` if the graph has the edge.
    ///
    /// A transition onto the current state always succeeds; it only refreshes
    /// `last_update` and releases the reconcile slot.
    pub fn transition_state(&mut self, group: &str, name: &str, destination: StatusState) -> bool {
        if destination == self.state {
            self.reconciling = false;
            self.last_update = Utc::now();
            return true;
        }

        if !StateGraph::shared().permits(self.state, destination) {
            log::warn!(
                "gitops {}/{}: transition {} -> {} rejected, staying in {}",
                group,
                name,
                self.state,
                destination,
                self.state
            );
            return false;
        }

        log::info!(
            "gitops {}/{}: {} -> {}",
            group,
            name,
            self.state,
            destination
        );

        self.previous_state = self.state;
        self.state = destination;
        self.reconciling = false;
        self.last_update = Utc::now();
        true
    }

    /// Moves back to `CREATED` from an end state that allows it.
    pub fn reset(&mut self, group: &str, name: &str) -> bool {
        if !self.transition_state(group, name, StatusState::Created) {
            return false;
        }
        self.failures = 0;
        self.last_error = None;
        true
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}
