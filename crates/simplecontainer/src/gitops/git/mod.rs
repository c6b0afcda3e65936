//! Git operations for tracked repositories.

pub mod auth;
pub mod fetch;
pub mod parse;
pub mod repository;

use std::path::Path;

use async_trait::async_trait;

pub use auth::Credentials;
pub use fetch::{fetch, FetchOutcome};
pub use repository::GitCli;

use crate::gitops::error::Result;

/// Version-control backend used by the reconcile loop.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Clones `revision` of `url` into `dest`.
    async fn clone_repo(
        &self,
        url: &str,
        revision: &str,
        dest: &Path,
        credentials: Option<&Credentials>,
    ) -> Result<()>;

    /// Brings the checkout to the remote head of `revision`.
    async fn pull(
        &self,
        checkout: &Path,
        revision: &str,
        credentials: Option<&Credentials>,
    ) -> Result<()>;

    /// Commit `revision` points at on the remote, without touching any checkout.
    async fn remote_head(
        &self,
        url: &str,
        revision: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String>;

    /// Commit checked out locally.
    async fn local_head(&self, checkout: &Path) -> Result<String>;

    /// Commits `files` and pushes to `revision`. Returns the new commit, or
    /// `None` when there was nothing to commit.
    async fn commit_and_push(
        &self,
        checkout: &Path,
        revision: &str,
        message: &str,
        files: &[&Path],
        credentials: Option<&Credentials>,
    ) -> Result<Option<String>>;
}

/// Returns true if `path` holds a git checkout.
pub fn is_checkout(path: &Path) -> bool {
    path.join(".git").exists()
}
