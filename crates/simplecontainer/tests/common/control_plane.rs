//! Control plane double for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use simplecontainer::gitops::{
    AuthSource, Comparison, ControlPlane, Credentials, Definition, GitOpsError, Result,
};

type Probe = Arc<dyn Fn(&Definition) -> bool + Send + Sync>;

/// Keeps live objects in memory and records every call.
///
/// `delay` holds each compare/apply long enough for a test to act while a
/// reconcile step is in flight. `max_active` records the highest number of
/// calls seen running at once.
#[derive(Default)]
pub struct RecordingControlPlane {
    live: Mutex<HashMap<String, Value>>,
    applied: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    persisted: Mutex<HashMap<String, Value>>,
    removed: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    unreachable: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
    apply_started: AtomicUsize,
    delete_probe: Mutex<Option<Probe>>,
    probe_results: Mutex<Vec<bool>>,
}

pub fn identity(definition: &Definition) -> String {
    format!(
        "{}/{}/{}",
        definition.kind, definition.meta.group, definition.meta.name
    )
}

impl RecordingControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Runs `probe` on every delete and keeps its result.
    pub fn on_delete(&self, probe: impl Fn(&Definition) -> bool + Send + Sync + 'static) {
        *self.delete_probe.lock().unwrap() = Some(Arc::new(probe));
    }

    pub fn probe_results(&self) -> Vec<bool> {
        self.probe_results.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn apply_started(&self) -> usize {
        self.apply_started.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Changes a live object behind the engine's back.
    pub fn set_live(&self, identity: &str, spec: Value) {
        self.live.lock().unwrap().insert(identity.to_string(), spec);
    }

    pub fn persisted(&self, key: &str) -> Option<Value> {
        self.persisted.lock().unwrap().get(key).cloned()
    }

    pub fn removed_state(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<ActiveGuard<'_>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitOpsError::ControlPlaneUnreachable(
                "connection refused".to_string(),
            ));
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(&self.active);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(guard)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn compare(&self, definition: &Definition) -> Result<Comparison> {
        let _active = self.enter().await?;
        let live = self.live.lock().unwrap();
        Ok(match live.get(&identity(definition)) {
            Some(spec) if *spec == definition.spec => Comparison::Same,
            _ => Comparison::Drifted,
        })
    }

    async fn apply(&self, definition: &Definition) -> Result<()> {
        self.apply_started.fetch_add(1, Ordering::SeqCst);
        let _active = self.enter().await?;
        self.live
            .lock()
            .unwrap()
            .insert(identity(definition), definition.spec.clone());
        self.applied.lock().unwrap().push(identity(definition));
        Ok(())
    }

    async fn delete(&self, definition: &Definition) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GitOpsError::ControlPlaneUnreachable(
                "connection refused".to_string(),
            ));
        }
        let probe = self.delete_probe.lock().unwrap().clone();
        if let Some(probe) = probe {
            let result = probe(definition);
            self.probe_results.lock().unwrap().push(result);
        }
        self.live.lock().unwrap().remove(&identity(definition));
        self.deleted.lock().unwrap().push(identity(definition));
        Ok(())
    }

    async fn fetch_credentials(&self, source: &AuthSource) -> Result<Credentials> {
        Err(GitOpsError::GitAuthFailed(format!(
            "{} {} not found",
            source.kind(),
            source.reference().name
        )))
    }

    async fn persist_state(&self, key: &str, body: &[u8]) -> Result<()> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| GitOpsError::ControlPlaneUnreachable(e.to_string()))?;
        self.persisted
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_state(&self, key: &str) -> Result<()> {
        self.persisted.lock().unwrap().remove(key);
        self.removed.lock().unwrap().push(key.to_string());
        Ok(())
    }
}
