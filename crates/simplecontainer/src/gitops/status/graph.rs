//! Static transition graph shared by every tracked repository.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use super::state::StatusState;

static GRAPH: LazyLock<StateGraph> = LazyLock::new(StateGraph::new);

/// Directed graph of permitted state transitions.
#[derive(Debug)]
pub struct StateGraph {
    edges: HashMap<StatusState, HashSet<StatusState>>,
}

impl StateGraph {
    /// Builds the graph.
    pub fn new() -> Self {
        use StatusState::*;

        let table: &[(StatusState, &[StatusState])] = &[
            (Created, &[Syncing, InvalidGit, CloningGit, PendingDelete]),
            (
                CloningGit,
                &[InvalidGit, Syncing, ClonedGit, Inspecting, PendingDelete],
            ),
            (
                ClonedGit,
                &[Syncing, Inspecting, InvalidDefinitions, PendingDelete],
            ),
            (
                Inspecting,
                &[
                    ClonedGit,
                    CloningGit,
                    Drifted,
                    InSync,
                    Syncing,
                    InvalidDefinitions,
                    InvalidGit,
                    PendingDelete,
                ],
            ),
            (
                Syncing,
                &[
                    InSync,
                    Backoff,
                    CloningGit,
                    InvalidDefinitions,
                    Inspecting,
                    PendingDelete,
                ],
            ),
            (InvalidGit, &[Created, CloningGit, PendingDelete]),
            (InvalidDefinitions, &[CloningGit, PendingDelete]),
            (InSync, &[CloningGit, Inspecting, CommitGit, PendingDelete]),
            (Drifted, &[Syncing, Inspecting, CommitGit, PendingDelete]),
            (CommitGit, &[CloningGit, InvalidGit, PendingDelete]),
            (PendingDelete, &[]),
            (Backoff, &[Created, PendingDelete]),
        ];

        let edges = table
            .iter()
            .map(|(from, to)| (*from, to.iter().copied().collect()))
            .collect();

        Self { edges }
    }

    /// Returns the process-wide graph.
    pub fn shared() -> &'static StateGraph {
        &GRAPH
    }

    /// Returns true if `from -> to` is an edge.
    pub fn permits(&self, from: StatusState, to: StatusState) -> bool {
        self.edges
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}
