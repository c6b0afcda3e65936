//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;

use super::context::{EngineContext, EngineSettings};
use super::controlplane::{Comparison, ControlPlane};
use super::definitions::Definition;
use super::error::{GitOpsError, Result};
use super::git::{Credentials, SourceControl};
use super::resource::{AuthSource, GitopsResource, GitopsSpec};

pub fn gitops_resource(group: &str, name: &str, url: &str) -> GitopsResource {
    GitopsResource::new("gitops", group, name, GitopsSpec::new(url))
}

pub fn engine(
    data_dir: &Path,
    scm: Arc<FakeScm>,
    control_plane: Arc<FakeControlPlane>,
) -> Arc<EngineContext> {
    let mut settings = EngineSettings::new("node-1", data_dir);
    settings.reconcile_interval = Duration::from_millis(20);
    EngineContext::new(settings, scm, control_plane)
}

pub fn identity(definition: &Definition) -> String {
    format!(
        "{}/{}/{}",
        definition.kind, definition.meta.group, definition.meta.name
    )
}

/// Remote repository held in memory; checkouts are real directories.
#[derive(Default)]
pub struct FakeScm {
    files: Mutex<BTreeMap<PathBuf, String>>,
    head: AtomicU64,
    local: Mutex<Option<String>>,
    unreachable: AtomicBool,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeScm {
    /// A remote with one commit holding `files`.
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let scm = Self::default();
        scm.push(files);
        scm
    }

    /// Adds a commit on the remote.
    pub fn push(&self, files: &[(&str, &str)]) {
        let mut tree = self.files.lock().unwrap();
        for (path, content) in files {
            tree.insert(PathBuf::from(path), content.to_string());
        }
        self.head.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn remote(&self) -> String {
        format!("{:040x}", self.head.load(Ordering::SeqCst))
    }

    fn record(&self, call: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitOpsError::GitNetworkError("could not resolve host".to_string()));
        }
        Ok(())
    }

    fn checkout_into(&self, dest: &Path) {
        std::fs::create_dir_all(dest.join(".git")).unwrap();
        for (path, content) in self.files.lock().unwrap().iter() {
            let target = dest.join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, content).unwrap();
        }
        *self.local.lock().unwrap() = Some(self.remote());
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
        self.record("clone")?;
        self.checkout_into(dest);
        Ok(())
    }

    async fn pull(
        &self,
        checkout: &Path,
        _revision: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<()> {
        self.record("pull")?;
        self.checkout_into(checkout);
        Ok(())
    }

    async fn remote_head(
        &self,
        _url: &str,
        _revision: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<String> {
        self.record("ls-remote")?;
        Ok(self.remote())
    }

    async fn local_head(&self, _checkout: &Path) -> Result<String> {
        self.local
            .lock()
            .unwrap()
            .clone()
            .ok_or(GitOpsError::GitNotInitialized)
    }

    async fn commit_and_push(
        &self,
        checkout: &Path,
        _revision: &str,
        _message: &str,
        files: &[&Path],
        _credentials: Option<&Credentials>,
    ) -> Result<Option<String>> {
        self.record("push")?;
        let contents: Vec<(String, String)> = files
            .iter()
            .map(|f| {
                (
                    f.to_string_lossy().to_string(),
                    std::fs::read_to_string(checkout.join(f)).unwrap(),
                )
            })
            .collect();
        let refs: Vec<(&str, &str)> = contents
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        self.push(&refs);
        Ok(Some(self.remote()))
    }
}

/// Control plane keeping live objects in a map.
#[derive(Default)]
pub struct FakeControlPlane {
    live: Mutex<HashMap<String, Value>>,
    pub applied: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub reject: Mutex<HashSet<String>>,
    pub unreachable: AtomicBool,
    pub credentials: Mutex<Option<(String, String)>>,
    persisted: Mutex<HashMap<String, Vec<u8>>>,
    removed: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Changes a live object behind the engine's back.
    pub fn set_live(&self, identity: &str, spec: Value) {
        self.live.lock().unwrap().insert(identity.to_string(), spec);
    }

    pub fn persisted(&self, key: &str) -> Option<Value> {
        self.persisted
            .lock()
            .unwrap()
            .get(key)
            .map(|body| serde_json::from_slice(body).unwrap())
    }

    pub fn removed_state(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    fn check(&self, definition: &Definition) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitOpsError::ControlPlaneUnreachable("connection refused".to_string()));
        }
        if self.reject.lock().unwrap().contains(&definition.meta.name) {
            return Err(GitOpsError::Rejected {
                kind: definition.kind.clone(),
                name: definition.meta.name.clone(),
                reason: "rejected by test".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn compare(&self, definition: &Definition) -> Result<Comparison> {
        self.check(definition)?;
        let live = self.live.lock().unwrap();
        Ok(match live.get(&identity(definition)) {
            Some(spec) if *spec == definition.spec => Comparison::Same,
            _ => Comparison::Drifted,
        })
    }

    async fn apply(&self, definition: &Definition) -> Result<()> {
        self.check(definition)?;
        assert!(definition.meta.owner.is_some(), "definition without owner");
        self.live
            .lock()
            .unwrap()
            .insert(identity(definition), definition.spec.clone());
        self.applied.lock().unwrap().push(identity(definition));
        Ok(())
    }

    async fn delete(&self, definition: &Definition) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitOpsError::ControlPlaneUnreachable("connection refused".to_string()));
        }
        self.live.lock().unwrap().remove(&identity(definition));
        self.deleted.lock().unwrap().push(identity(definition));
        Ok(())
    }

    async fn fetch_credentials(&self, source: &AuthSource) -> Result<Credentials> {
        match self.credentials.lock().unwrap().clone() {
            Some((username, password)) => Ok(Credentials::HttpBasic {
                username,
                password: SecretString::from(password),
            }),
            None => Err(GitOpsError::GitAuthFailed(format!(
                "{} {} not found",
                source.kind(),
                source.reference().name
            ))),
        }
    }

    async fn persist_state(&self, key: &str, body: &[u8]) -> Result<()> {
        self.persisted
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }

    async fn remove_state(&self, key: &str) -> Result<()> {
        self.persisted.lock().unwrap().remove(key);
        self.removed.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Polls `condition` until it holds. Returns false on timeout.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
