use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gitops::resource::{API_PREFIX, DEFAULT_POLLING_INTERVAL};
use crate::gitops::EngineSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub node_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Minimal configuration for `node_id` with every default applied.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            data_dir: default_data_dir(),
            state_prefix: default_state_prefix(),
            control_plane: ControlPlaneConfig::default(),
            reconcile: ReconcileConfig::default(),
            git: GitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Settings handed to the engine.
    pub fn settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::new(self.node_id.clone(), self.data_dir.clone());
        settings.state_prefix = self.state_prefix.clone();
        settings.reconcile_interval = self.reconcile.interval;
        settings.backoff_threshold = self.reconcile.backoff_threshold;
        settings.default_polling_interval = self.reconcile.default_polling_interval;
        settings
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("simplecontainer"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/simplecontainer"))
}

fn default_state_prefix() -> String {
    API_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    #[serde(default = "default_control_plane_url")]
    pub url: String,
    #[serde(default = "default_control_plane_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_control_plane_url() -> String {
    "http://127.0.0.1:1443".to_string()
}

fn default_control_plane_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: default_control_plane_url(),
            timeout: default_control_plane_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_backoff_threshold")]
    pub backoff_threshold: u32,
    #[serde(default = "default_polling_interval", with = "humantime_serde")]
    pub default_polling_interval: Duration,
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_threshold() -> u32 {
    5
}

fn default_polling_interval() -> Duration {
    DEFAULT_POLLING_INTERVAL
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: default_reconcile_interval(),
            backoff_threshold: default_backoff_threshold(),
            default_polling_interval: default_polling_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default = "default_git_binary")]
    pub binary: String,
    #[serde(default = "default_git_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_git_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout: default_git_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Plain,
        }
    }
}
