//! Child definitions read from a repository.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::resource::{is_valid_identifier, Owner, Resource};

/// A definition of any kind, with its spec kept as raw JSON.
pub type Definition = Resource<Value>;

/// A parsed definition and the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub definition: Definition,
    pub file: PathBuf,
}

impl Request {
    /// Parses one YAML document.
    pub fn from_value(value: serde_yaml::Value, file: &Path) -> Result<Self> {
        let definition: Definition =
            serde_yaml::from_value(value).map_err(|e| GitOpsError::ParseYaml {
                path: file.to_path_buf(),
                message: e.to_string(),
            })?;

        for (field, value) in [
            ("group", &definition.meta.group),
            ("name", &definition.meta.name),
        ] {
            if !is_valid_identifier(value) {
                return Err(GitOpsError::InvalidResource {
                    name: format!("{}/{}", definition.kind, definition.meta.key()),
                    message: format!("invalid {} '{}' in {}", field, value, file.display()),
                });
            }
        }

        Ok(Self {
            definition,
            file: file.to_path_buf(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.definition.kind
    }

    pub fn group(&self) -> &str {
        &self.definition.meta.group
    }

    pub fn name(&self) -> &str {
        &self.definition.meta.name
    }

    /// Identity across kinds, `<kind>/<group>/<name>`.
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.kind(), self.group(), self.name())
    }

    /// Returns the definition stamped with `owner`.
    pub fn owned_by(&self, owner: &Owner) -> Definition {
        let mut definition = self.definition.clone();
        definition.meta.owner = Some(owner.clone());
        definition
    }
}
