pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, load_config_with};
pub use schema::{
    ControlPlaneConfig, EngineConfig, GitConfig, LogFormat, LoggingConfig, ReconcileConfig,
};
