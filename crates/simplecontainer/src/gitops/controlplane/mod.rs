//! Outbound interface to the control plane.

pub mod http;

use async_trait::async_trait;

pub use http::HttpControlPlane;

use super::definitions::Definition;
use super::error::Result;
use super::git::Credentials;
use super::resource::AuthSource;

/// Outcome of comparing a definition with live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Live object matches the definition.
    Same,
    /// Live object differs or does not exist.
    Drifted,
}

/// Control-plane operations the engine depends on.
///
/// Errors follow [`ErrorKind`](super::error::ErrorKind): a refusal is
/// `Rejected`, a missing or failing server is `Unreachable`.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Compares `definition` with the live object.
    async fn compare(&self, definition: &Definition) -> Result<Comparison>;

    /// Applies `definition`. An object already equal on the server is success.
    async fn apply(&self, definition: &Definition) -> Result<()>;

    /// Deletes the object described by `definition`. A missing object is success.
    async fn delete(&self, definition: &Definition) -> Result<()>;

    /// Fetches and decodes the credential resource named by `source`.
    async fn fetch_credentials(&self, source: &AuthSource) -> Result<Credentials>;

    /// Writes `body` under `key` in the replicated store and waits for the ack.
    async fn persist_state(&self, key: &str, body: &[u8]) -> Result<()>;

    /// Removes `key` from the replicated store.
    async fn remove_state(&self, key: &str) -> Result<()>;
}

/// Replicated store key of a tracked repository's state.
pub fn state_key(prefix: &str, group: &str, name: &str) -> String {
    format!(
        "{}/state/gitops/{}/{}",
        prefix.trim_end_matches('/'),
        group,
        name
    )
}
