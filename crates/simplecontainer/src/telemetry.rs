//! Process-wide logging setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Result, SimplecontainerError};

/// Installs the global subscriber and routes `log` records into it.
///
/// `RUST_LOG` takes precedence over the configured level. Only the first call
/// succeeds; later calls return an error and leave the installed subscriber
/// in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let configured = EnvFilter::try_new(&config.level).map_err(|e| {
        SimplecontainerError::Telemetry(format!("invalid level '{}': {}", config.level, e))
    })?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(configured);

    tracing_log::LogTracer::init()
        .map_err(|e| SimplecontainerError::Telemetry(format!("log bridge: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };

    installed.map_err(|e| SimplecontainerError::Telemetry(e.to_string()))
}
