//! GitOps reconciliation engine for the simplecontainer control plane.
//!
//! See [`gitops`] for the engine itself; [`config`] and [`telemetry`] set up
//! the process around it.

pub mod config;
pub mod error;
pub mod gitops;
pub mod telemetry;

use std::sync::Arc;

pub use config::{load_config, load_config_from_str, EngineConfig};
pub use error::{ConfigError, Result, SimplecontainerError};
pub use gitops::{Controller, EngineContext, GitOpsError};

use gitops::{GitCli, HttpControlPlane};

/// Builds a controller wired to the git CLI and the HTTP control plane.
pub fn start_engine(config: &EngineConfig) -> Result<Controller> {
    let control_plane = HttpControlPlane::new(
        &config.control_plane.url,
        config.node_id.clone(),
        config.control_plane.timeout,
    )?;
    let scm = GitCli::new(config.git.binary.clone(), config.git.timeout);

    log::info!(
        "Starting gitops engine on node {} (data dir {})",
        config.node_id,
        config.data_dir.display()
    );

    let ctx = EngineContext::new(config.settings(), Arc::new(scm), Arc::new(control_plane));
    Ok(Controller::new(ctx))
}
