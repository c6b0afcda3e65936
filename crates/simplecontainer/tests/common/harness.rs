//! Git fixtures and an engine wired for integration tests.
//!
//! `GitFixture` drives the real `git` executable: a bare `origin.git` plays the
//! remote, a private working clone is used to push commits to it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use simplecontainer::gitops::{
    Controller, EngineContext, EngineSettings, GitCli, GitopsEvent, GitopsEventKind,
    GitopsResource, GitopsSnapshot, GitopsSpec, StatusState, KIND_GITOPS,
};

use super::control_plane::RecordingControlPlane;

/// A network definition as it would appear in a repository.
pub const NETWORK_YAML: &str = r#"
kind: network
meta:
  group: internal
  name: cluster
spec:
  driver: bridge
"#;

/// A container definition depending on the network.
pub const CONTAINERS_YAML: &str = r#"
kind: containers
meta:
  group: web
  name: nginx
spec:
  image: nginx
  tag: "1.27"
  networks:
    - internal/cluster
"#;

/// Bare remote plus a working clone used to push to it.
pub struct GitFixture {
    dir: TempDir,
    origin: PathBuf,
    work: PathBuf,
}

impl GitFixture {
    /// Creates an empty remote tracking `main`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let origin = dir.path().join("origin.git");
        let work = dir.path().join("work");

        git(dir.path(), &["init", "--bare", "-b", "main", "origin.git"]);
        git(dir.path(), &["clone", "origin.git", "work"]);
        git(&work, &["config", "user.name", "Fixture"]);
        git(&work, &["config", "user.email", "fixture@example.com"]);

        Self { dir, origin, work }
    }

    /// A remote with one commit holding `files`.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let fixture = Self::new();
        fixture.commit(files, "initial definitions");
        fixture
    }

    /// URL the engine clones from.
    pub fn url(&self) -> String {
        self.origin.to_string_lossy().to_string()
    }

    /// Writes `files`, commits and pushes. Returns the new head.
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> String {
        for (path, content) in files {
            let target = self.work.join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, content).unwrap();
        }
        git(&self.work, &["add", "-A"]);
        git(&self.work, &["commit", "-m", message]);
        git(&self.work, &["push", "origin", "HEAD:main"]);
        self.head()
    }

    /// Head of `main` on the remote.
    pub fn head(&self) -> String {
        git(&self.origin, &["rev-parse", "main"]).trim().to_string()
    }

    /// Moves the remote away so every git operation against it fails.
    pub fn make_unreachable(&self) {
        std::fs::rename(&self.origin, self.moved()).unwrap();
    }

    /// Undoes [`make_unreachable`](Self::make_unreachable).
    pub fn restore(&self) {
        std::fs::rename(self.moved(), &self.origin).unwrap();
    }

    fn moved(&self) -> PathBuf {
        self.dir.path().join("origin.moved")
    }
}

fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Controller backed by the git CLI and a [`RecordingControlPlane`].
pub struct TestEngine {
    data_dir: TempDir,
    pub controller: Controller,
    pub control_plane: Arc<RecordingControlPlane>,
    events: broadcast::Receiver<GitopsEvent>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_control_plane(RecordingControlPlane::new())
    }

    pub fn with_control_plane(control_plane: Arc<RecordingControlPlane>) -> Self {
        let data_dir = TempDir::new().expect("Failed to create temp directory");
        let mut settings = EngineSettings::new("node-1", data_dir.path());
        settings.reconcile_interval = Duration::from_millis(50);

        let ctx = EngineContext::new(
            settings,
            Arc::new(GitCli::new("git", Duration::from_secs(30))),
            control_plane.clone(),
        );
        let controller = Controller::new(ctx);
        let events = controller.subscribe();

        Self {
            data_dir,
            controller,
            control_plane,
            events,
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        self.controller.context()
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    /// Applies a gitops resource `group/name` tracking `fixture`.
    pub fn track(
        &self,
        group: &str,
        name: &str,
        fixture: &GitFixture,
        configure: impl FnOnce(&mut GitopsSpec),
    ) -> GitopsSnapshot {
        let mut spec = GitopsSpec::new(fixture.url());
        configure(&mut spec);
        let resource = GitopsResource::new(KIND_GITOPS, group, name, spec);
        self.controller.apply(resource).expect("apply failed")
    }

    pub fn state(&self, group: &str, name: &str) -> Option<StatusState> {
        self.controller.get(group, name).ok().map(|s| s.status.state)
    }

    /// Collects the transitions of `group/name` until `target` is reached.
    ///
    /// Panics on timeout, listing what was seen.
    pub async fn transitions_until(
        &mut self,
        group: &str,
        name: &str,
        target: StatusState,
        timeout: Duration,
    ) -> Vec<StatusState> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = match tokio::time::timeout(remaining, self.events.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => {
                    panic!("{}/{} never reached {:?}, saw {:?}", group, name, target, seen)
                }
            };

            if event.group != group || event.name != name {
                continue;
            }
            if event.kind != GitopsEventKind::Transition {
                continue;
            }
            if let Some(state) = event.state {
                seen.push(state);
                if state == target {
                    return seen;
                }
            }
        }
    }

    /// Waits for an event of `kind` for `group/name`.
    pub async fn wait_event(
        &mut self,
        group: &str,
        name: &str,
        kind: GitopsEventKind,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Ok(Ok(event)) if event.group == group && event.name == name && event.kind == kind => {
                    return true
                }
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                _ => return false,
            }
        }
    }

    /// Polls until the state of `group/name` satisfies `predicate`.
    pub async fn wait_state(
        &self,
        group: &str,
        name: &str,
        timeout: Duration,
        predicate: impl Fn(Option<StatusState>) -> bool,
    ) -> bool {
        wait_until(timeout, || predicate(self.state(group, name))).await
    }
}

/// Polls `condition` until it holds. Returns false on timeout.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
