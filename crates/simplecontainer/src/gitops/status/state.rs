//! Named states of a tracked repository.

use serde::{Deserialize, Serialize};

/// A state of the gitops state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusState {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "CLONING_GIT")]
    CloningGit,
    #[serde(rename = "CLONED_GIT")]
    ClonedGit,
    #[serde(rename = "INSPECTING")]
    Inspecting,
    #[serde(rename = "SYNCING")]
    Syncing,
    #[serde(rename = "INVALID_GIT")]
    InvalidGit,
    #[serde(rename = "INVALID_DEFINITIONS")]
    InvalidDefinitions,
    #[serde(rename = "INSYNC")]
    InSync,
    #[serde(rename = "DRIFTED")]
    Drifted,
    #[serde(rename = "COMMIT_GIT")]
    CommitGit,
    #[serde(rename = "PENDING_DELETE")]
    PendingDelete,
    #[serde(rename = "BACKOFF")]
    Backoff,
}

impl StatusState {
    /// Returns all states.
    pub fn all() -> &'static [StatusState] {
        &[
            StatusState::Created,
            StatusState::CloningGit,
            StatusState::ClonedGit,
            StatusState::Inspecting,
            StatusState::Syncing,
            StatusState::InvalidGit,
            StatusState::InvalidDefinitions,
            StatusState::InSync,
            StatusState::Drifted,
            StatusState::CommitGit,
            StatusState::PendingDelete,
            StatusState::Backoff,
        ]
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Created => "CREATED",
            StatusState::CloningGit => "CLONING_GIT",
            StatusState::ClonedGit => "CLONED_GIT",
            StatusState::Inspecting => "INSPECTING",
            StatusState::Syncing => "SYNCING",
            StatusState::InvalidGit => "INVALID_GIT",
            StatusState::InvalidDefinitions => "INVALID_DEFINITIONS",
            StatusState::InSync => "INSYNC",
            StatusState::Drifted => "DRIFTED",
            StatusState::CommitGit => "COMMIT_GIT",
            StatusState::PendingDelete => "PENDING_DELETE",
            StatusState::Backoff => "BACKOFF",
        }
    }

    /// Category deciding whether the reconcile ticker stays armed.
    pub fn category(&self) -> Category {
        match self {
            StatusState::Created => Category::PreRun,
            StatusState::PendingDelete | StatusState::Backoff => Category::End,
            _ => Category::WhileRun,
        }
    }
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatusState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatusState::all()
            .iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown state: {}", s))
    }
}

/// Lifecycle category of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    PreRun,
    WhileRun,
    End,
}

/// Pending intent recorded beside the current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pending {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "PENDING_SYNC")]
    Sync,
    #[serde(rename = "PENDING_DELETE")]
    Delete,
}
