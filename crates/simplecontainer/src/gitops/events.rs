//! Inbound control events and the outbound event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::status::StatusState;

/// Events accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    /// Force a git poll.
    Refresh,
    /// Force a sync regardless of automatic sync.
    Sync,
    /// Force a drift check.
    Inspect,
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REFRESH" => Ok(EventKind::Refresh),
            "SYNC" => Ok(EventKind::Sync),
            "INSPECT" => Ok(EventKind::Inspect),
            _ => Err(format!("Unknown event: {}", s)),
        }
    }
}

/// Inbound event addressed to one tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub group: String,
    pub name: String,
}

impl Event {
    pub fn new(kind: EventKind, group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            group: group.into(),
            name: name.into(),
        }
    }
}

/// What happened to a tracked repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitopsEventKind {
    /// The state machine moved.
    Transition,
    /// A drift check finished.
    Inspect,
    /// Cleanup finished and the repository is gone.
    Deleted,
}

/// Event published on the [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitopsEvent {
    pub kind: GitopsEventKind,
    pub group: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StatusState>,
    pub timestamp: DateTime<Utc>,
}

impl GitopsEvent {
    pub fn new(
        kind: GitopsEventKind,
        group: &str,
        name: &str,
        state: Option<StatusState>,
    ) -> Self {
        Self {
            kind,
            group: group.to_string(),
            name: name.to_string(),
            state,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded broadcast of [`GitopsEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GitopsEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes `event`. Returns the number of subscribers that received it.
    pub fn emit(&self, event: GitopsEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                log::debug!(
                    "gitops {}/{}: {:?} event had no subscribers",
                    event.group,
                    event.name,
                    event.kind
                );
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GitopsEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
