//! Poll-gated fetch of a tracked repository.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{is_checkout, SourceControl};
use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::resource::GitopsSpec;
use crate::gitops::runtime::GitopsRuntimeState;

/// Result of a fetch that reached the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// HEAD after the fetch.
    pub commit: String,
    /// Whether HEAD moved.
    pub changed: bool,
}

/// Brings the checkout up to date with the remote.
///
/// Clones when there is no checkout. Otherwise the remote is only contacted
/// once the polling interval has elapsed or a poll was forced, and pulled only
/// when its head differs from the local one.
///
/// Returns [`GitOpsError::IntervalNotElapsed`] when gated and
/// [`GitOpsError::NoChange`] when the remote has not moved.
pub async fn fetch(
    scm: &dyn SourceControl,
    spec: &GitopsSpec,
    polling_interval: Duration,
    runtime: &mut GitopsRuntimeState,
    now: DateTime<Utc>,
) -> Result<FetchOutcome> {
    let credentials = runtime.credentials.clone();
    let credentials = credentials.as_deref();

    if runtime.reclone && runtime.checkout.exists() {
        log::info!("Removing checkout {} for re-clone", runtime.checkout.display());
        tokio::fs::remove_dir_all(&runtime.checkout).await?;
    }
    runtime.reclone = false;

    if !is_checkout(&runtime.checkout) {
        if runtime.checkout.exists() {
            tokio::fs::remove_dir_all(&runtime.checkout).await?;
        }
        scm.clone_repo(&spec.repo_url, &spec.revision, &runtime.checkout, credentials)
            .await?;
        scm.pull(&runtime.checkout, &spec.revision, credentials)
            .await?;

        let commit = scm.local_head(&runtime.checkout).await?;
        runtime.last_poll = Some(now);
        runtime.force_poll = false;
        runtime.commit = Some(commit.clone());
        return Ok(FetchOutcome {
            commit,
            changed: true,
        });
    }

    if !runtime.force_poll && runtime.commit.is_some() {
        if let Some(last_poll) = runtime.last_poll {
            let elapsed = (now - last_poll).to_std().unwrap_or_default();
            if elapsed < polling_interval {
                return Err(GitOpsError::IntervalNotElapsed);
            }
        }
    }

    runtime.force_poll = false;
    runtime.last_poll = Some(now);

    let local = scm.local_head(&runtime.checkout).await?;
    let remote = scm
        .remote_head(&spec.repo_url, &spec.revision, credentials)
        .await?;

    if remote == local {
        runtime.commit = Some(local);
        return Err(GitOpsError::NoChange);
    }

    scm.pull(&runtime.checkout, &spec.revision, credentials)
        .await?;
    let commit = scm.local_head(&runtime.checkout).await?;
    let changed = commit != local;
    runtime.commit = Some(commit.clone());

    Ok(FetchOutcome { commit, changed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::git::Credentials;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records calls and serves fixed heads.
    #[derive(Default)]
    struct FakeScm {
        calls: Mutex<Vec<&'static str>>,
        remote: Mutex<String>,
        local: Mutex<String>,
    }

    impl FakeScm {
        fn with_heads(local: &str, remote: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                remote: Mutex::new(remote.to_string()),
                local: Mutex::new(local.to_string()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceControl for FakeScm {
        async fn clone_repo(
            &self,
            _url: &str,
            _revision: &str,
            dest: &Path,
            _credentials: Option<&Credentials>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push("clone");
            std::fs::create_dir_all(dest.join(".git")).unwrap();
            Ok(())
        }

        async fn pull(
            &self,
            _checkout: &Path,
            _revision: &str,
            _credentials: Option<&Credentials>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push("pull");
            let remote = self.remote.lock().unwrap().clone();
            *self.local.lock().unwrap() = remote;
            Ok(())
        }

        async fn remote_head(
            &self,
            _url: &str,
            _revision: &str,
            _credentials: Option<&Credentials>,
        ) -> Result<String> {
            self.calls.lock().unwrap().push("ls-remote");
            Ok(self.remote.lock().unwrap().clone())
        }

        async fn local_head(&self, _checkout: &Path) -> Result<String> {
            Ok(self.local.lock().unwrap().clone())
        }

        async fn commit_and_push(
            &self,
            _checkout: &Path,
            _revision: &str,
            _message: &str,
            _files: &[&Path],
            _credentials: Option<&Credentials>,
        ) -> Result<Option<String>> {
            Ok(None)
        }
    }

    const INTERVAL: Duration = Duration::from_secs(60);

    fn spec() -> GitopsSpec {
        GitopsSpec::new("https://example.com/repo.git")
    }

    fn existing_checkout(dir: &TempDir) -> GitopsRuntimeState {
        let checkout = dir.path().join("checkout");
        std::fs::create_dir_all(checkout.join(".git")).unwrap();
        GitopsRuntimeState::new(checkout)
    }

    #[tokio::test]
    async fn test_clone_when_no_checkout() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "a");
        let mut runtime = GitopsRuntimeState::new(dir.path().join("checkout"));
        runtime.force_poll = true;

        let outcome = fetch(&scm, &spec(), INTERVAL, &mut runtime, Utc::now()).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(scm.calls(), vec!["clone", "pull"]);
        assert_eq!(runtime.commit.as_deref(), Some("a"));
        assert!(runtime.last_poll.is_some());
        assert!(!runtime.force_poll);
    }

    #[tokio::test]
    async fn test_interval_gate_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "b");
        let mut runtime = existing_checkout(&dir);
        let now = Utc::now();
        runtime.commit = Some("a".to_string());
        runtime.last_poll = Some(now - chrono::Duration::seconds(10));

        let err = fetch(&scm, &spec(), INTERVAL, &mut runtime, now).await.unwrap_err();
        assert!(matches!(err, GitOpsError::IntervalNotElapsed));
        assert!(scm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_local_commit_is_not_gated() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "a");
        let mut runtime = existing_checkout(&dir);
        let now = Utc::now();
        runtime.last_poll = Some(now);

        let err = fetch(&scm, &spec(), INTERVAL, &mut runtime, now).await.unwrap_err();
        assert!(matches!(err, GitOpsError::NoChange));
        assert_eq!(runtime.commit.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_force_poll_bypasses_gate() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "b");
        let mut runtime = existing_checkout(&dir);
        let now = Utc::now();
        runtime.last_poll = Some(now);
        runtime.force_poll = true;

        let outcome = fetch(&scm, &spec(), INTERVAL, &mut runtime, now).await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome {
                commit: "b".to_string(),
                changed: true
            }
        );
        assert_eq!(scm.calls(), vec!["ls-remote", "pull"]);
        assert!(!runtime.force_poll);
    }

    #[tokio::test]
    async fn test_forced_poll_without_new_commit_is_no_change() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "a");
        let mut runtime = existing_checkout(&dir);
        runtime.last_poll = Some(Utc::now());
        runtime.force_poll = true;

        let err = fetch(&scm, &spec(), INTERVAL, &mut runtime, Utc::now()).await.unwrap_err();
        assert!(matches!(err, GitOpsError::NoChange));
        assert_eq!(scm.calls(), vec!["ls-remote"]);
        assert!(!runtime.force_poll);
    }

    #[tokio::test]
    async fn test_unchanged_remote_is_no_change() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "a");
        let mut runtime = existing_checkout(&dir);
        let now = Utc::now();
        runtime.last_poll = Some(now - chrono::Duration::seconds(120));

        let err = fetch(&scm, &spec(), INTERVAL, &mut runtime, now).await.unwrap_err();
        assert!(matches!(err, GitOpsError::NoChange));
        assert_eq!(scm.calls(), vec!["ls-remote"]);
        assert_eq!(runtime.last_poll, Some(now));
    }

    #[tokio::test]
    async fn test_elapsed_interval_pulls_new_commit() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "b");
        let mut runtime = existing_checkout(&dir);
        let now = Utc::now();
        runtime.last_poll = Some(now - chrono::Duration::seconds(61));

        let outcome = fetch(&scm, &spec(), INTERVAL, &mut runtime, now).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(runtime.commit.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_reclone_wipes_checkout() {
        let dir = TempDir::new().unwrap();
        let scm = FakeScm::with_heads("a", "a");
        let mut runtime = existing_checkout(&dir);
        std::fs::write(runtime.checkout.join("stale.yaml"), "x").unwrap();
        runtime.reclone = true;

        fetch(&scm, &spec(), INTERVAL, &mut runtime, Utc::now()).await.unwrap();
        assert_eq!(scm.calls(), vec!["clone", "pull"]);
        assert!(!runtime.checkout.join("stale.yaml").exists());
        assert!(!runtime.reclone);
    }
}
