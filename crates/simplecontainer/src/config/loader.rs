use std::path::Path;

use serde_json::Value;

use crate::config::schema::EngineConfig;
use crate::error::ConfigError;
use crate::gitops::resource::is_valid_identifier;

const SCHEMA_JSON: &str = include_str!("../../../../schema/engine-config-v1.json");

/// Environment variables overriding file values, with the key they replace.
const ENV_OVERRIDES: &[(&str, &[&str])] = &[
    ("SMR_NODE_ID", &["nodeId"]),
    ("SMR_DATA_DIR", &["dataDir"]),
    ("SMR_CONTROL_PLANE_URL", &["controlPlane", "url"]),
];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses YAML or JSON, applies `SMR_*` overrides from the environment and
/// validates the result.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    load_config_with(content, |name| std::env::var(name).ok())
}

/// Like [`load_config_from_str`] with an explicit environment lookup.
pub fn load_config_with(
    content: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig, ConfigError> {
    let mut value: Value = serde_yaml::from_str(content)?;
    if value.is_null() {
        value = Value::Object(Default::default());
    }

    apply_overrides(&mut value, env)?;
    validate_schema(&value)?;

    let config: EngineConfig = serde_json::from_value(value)?;
    validate_config(&config)?;

    Ok(config)
}

fn apply_overrides(
    value: &mut Value,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    for (name, path) in ENV_OVERRIDES {
        let Some(override_value) = env(name).filter(|v| !v.is_empty()) else {
            continue;
        };
        log::debug!("Config: {} overrides {}", name, path.join("."));

        let mut target = &mut *value;
        for (index, key) in path.iter().enumerate() {
            let object = target
                .as_object_mut()
                .ok_or_else(|| ConfigError::Validation {
                    message: format!("'{}' must be an object", path[..index].join(".")),
                })?;
            if index == path.len() - 1 {
                object.insert(key.to_string(), Value::String(override_value.clone()));
                break;
            }
            target = object
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
    }
    Ok(())
}

fn validate_schema(value: &Value) -> Result<(), ConfigError> {
    let schema: Value = serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
        message: format!("Invalid embedded schema JSON: {}", e),
    })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if !is_valid_identifier(&config.node_id) {
        return Err(ConfigError::Validation {
            message: format!("Invalid node id: '{}'", config.node_id),
        });
    }

    let url = &config.control_plane.url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("Control plane URL must be http(s): '{}'", url),
        });
    }

    for (name, duration) in [
        ("controlPlane.timeout", config.control_plane.timeout),
        ("reconcile.interval", config.reconcile.interval),
        (
            "reconcile.defaultPollingInterval",
            config.reconcile.default_polling_interval,
        ),
        ("git.timeout", config.git.timeout),
    ] {
        if duration.is_zero() {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    if config.reconcile.backoff_threshold == 0 {
        return Err(ConfigError::Validation {
            message: "reconcile.backoffThreshold must be at least 1".to_string(),
        });
    }

    if config.git.binary.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "git.binary must not be empty".to_string(),
        });
    }

    Ok(())
}
