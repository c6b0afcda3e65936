//! Collaborators and settings shared by every watcher.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::controlplane::{state_key, ControlPlane};
use super::events::EventBus;
use super::git::SourceControl;
use super::registry::Registry;
use super::resource::{Owner, API_PREFIX, DEFAULT_POLLING_INTERVAL};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// This node; owner of repositories it reconciles.
    pub node_id: String,
    /// Root for checkouts and per-repository logs.
    pub data_dir: PathBuf,
    /// Prefix of replicated state keys.
    pub state_prefix: String,
    /// Reconcile ticker period.
    pub reconcile_interval: Duration,
    /// Sync failures before BACKOFF.
    pub backoff_threshold: u32,
    /// Polling interval for resources that set none.
    pub default_polling_interval: Duration,
}

impl EngineSettings {
    pub fn new(node_id: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            data_dir: data_dir.into(),
            state_prefix: API_PREFIX.to_string(),
            reconcile_interval: Duration::from_secs(5),
            backoff_threshold: 5,
            default_polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }
}

/// Everything a watcher needs, constructed once and passed by handle.
pub struct EngineContext {
    pub settings: EngineSettings,
    pub scm: Arc<dyn SourceControl>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub events: EventBus,
    pub registry: Arc<Registry>,
}

impl EngineContext {
    pub fn new(
        settings: EngineSettings,
        scm: Arc<dyn SourceControl>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Arc<Self> {
        let registry = Arc::new(Registry::new(
            Arc::clone(&control_plane),
            settings.state_prefix.clone(),
        ));

        Arc::new(Self {
            settings,
            scm,
            control_plane,
            events: EventBus::default(),
            registry,
        })
    }

    /// Owner stamped on definitions applied for `group`/`name`.
    pub fn owner(&self, group: &str, name: &str) -> Owner {
        Owner::gitops(group, name).on_node(self.settings.node_id.clone())
    }

    /// Replicated state key for `group`/`name`.
    pub fn state_key(&self, group: &str, name: &str) -> String {
        state_key(&self.settings.state_prefix, group, name)
    }
}
