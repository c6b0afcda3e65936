//! Gitops resource definition.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use super::error::{GitOpsError, Result};

/// Prefix carried by every definition.
pub const API_PREFIX: &str = "simplecontainer.io/v1";

/// Kind name of the gitops resource.
pub const KIND_GITOPS: &str = "gitops";

/// Canonical polling interval when a resource does not set one.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(360);

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9_.]*[a-z0-9])?$").unwrap());

/// Returns true if `value` is a valid group or name.
pub fn is_valid_identifier(value: &str) -> bool {
    value.len() <= 253 && RE_IDENTIFIER.is_match(value)
}

/// Reference to the resource that created a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub kind: String,
    pub group: String,
    pub name: String,
    /// Node that applied the definition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node: String,
}

impl Owner {
    /// Owner reference pointing at a gitops resource.
    pub fn gitops(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: KIND_GITOPS.to_string(),
            group: group.into(),
            name: name.into(),
            node: String::new(),
        }
    }

    /// Sets the reconciling node.
    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Value of the `Owner` header, `<kind>.<group>.<name>`.
    pub fn header_value(&self) -> String {
        format!("{}.{}.{}", self.kind, self.group, self.name)
    }
}

/// Metadata for a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Group the resource belongs to.
    pub group: String,

    /// Name of the resource within its group.
    pub name: String,

    /// Key-value labels.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Owner stamped on definitions applied on behalf of another resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
}

impl ObjectMeta {
    /// Creates metadata with a group and name.
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            labels: HashMap::new(),
            owner: None,
        }
    }

    /// Registry key, `<group>.<name>`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }
}

/// A generic simplecontainer resource wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<T> {
    /// API prefix, normally `simplecontainer.io/v1`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Kind of the resource.
    pub kind: String,

    /// Resource metadata.
    pub meta: ObjectMeta,

    /// The resource specification.
    pub spec: T,
}

fn default_prefix() -> String {
    API_PREFIX.to_string()
}

impl<T> Resource<T> {
    /// Creates a new resource.
    pub fn new(
        kind: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
        spec: T,
    ) -> Self {
        Self {
            prefix: API_PREFIX.to_string(),
            kind: kind.into(),
            meta: ObjectMeta::new(group, name),
            spec,
        }
    }

    /// Group of the resource.
    pub fn group(&self) -> &str {
        &self.meta.group
    }

    /// Name of the resource.
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

/// Reference to a credential resource held by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRef {
    pub group: String,
    pub name: String,
}

/// Which credential resource a gitops resource points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSource {
    /// `httpauth` resource with username and password.
    HttpAuth(AuthRef),
    /// `certkey` resource with an SSH private key.
    CertKey(AuthRef),
}

impl AuthSource {
    /// Kind of the referenced credential resource.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthSource::HttpAuth(_) => "httpauth",
            AuthSource::CertKey(_) => "certkey",
        }
    }

    /// The referenced resource.
    pub fn reference(&self) -> &AuthRef {
        match self {
            AuthSource::HttpAuth(r) | AuthSource::CertKey(r) => r,
        }
    }
}

/// Gitops specification: one tracked repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitopsSpec {
    /// Repository URL.
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    /// Branch to track.
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Directory inside the repository holding definitions.
    #[serde(default = "default_directory_path")]
    pub directory_path: String,

    /// How often the remote is polled. Falls back to the engine default.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub polling_interval: Option<Duration>,

    /// Whether drift is healed without an explicit sync.
    #[serde(default)]
    pub automatic_sync: bool,

    /// Basic-auth credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_auth_ref: Option<AuthRef>,

    /// SSH key credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_key_ref: Option<AuthRef>,

    /// Node authoritative for this repository. Empty until claimed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node: String,
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_directory_path() -> String {
    "/".to_string()
}

impl GitopsSpec {
    /// Creates a spec tracking `repo_url` with defaults.
    pub fn new(repo_url: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            revision: default_revision(),
            directory_path: default_directory_path(),
            polling_interval: None,
            automatic_sync: false,
            http_auth_ref: None,
            cert_key_ref: None,
            node: String::new(),
        }
    }

    /// Polling interval, or `default` when the resource sets none.
    pub fn polling_interval_or(&self, default: Duration) -> Duration {
        self.polling_interval.unwrap_or(default)
    }

    /// Returns the credential reference, if any.
    pub fn auth_source(&self) -> Option<AuthSource> {
        match (&self.http_auth_ref, &self.cert_key_ref) {
            (Some(r), _) => Some(AuthSource::HttpAuth(r.clone())),
            (None, Some(r)) => Some(AuthSource::CertKey(r.clone())),
            (None, None) => None,
        }
    }

    /// True if a change between `self` and `other` requires a fresh clone.
    pub fn source_changed(&self, other: &GitopsSpec) -> bool {
        self.repo_url != other.repo_url || self.revision != other.revision
    }
}

/// Type alias for the gitops resource.
pub type GitopsResource = Resource<GitopsSpec>;

impl GitopsResource {
    /// Parses a gitops resource from YAML (JSON is valid YAML).
    pub fn from_yaml(content: &str) -> Result<Self> {
        let resource: GitopsResource = serde_yaml::from_str(content)?;
        resource.validate()?;
        Ok(resource)
    }

    /// Registry key of the resource.
    pub fn key(&self) -> String {
        self.meta.key()
    }

    /// Validates the resource.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| GitOpsError::InvalidResource {
            name: self.key(),
            message: message.to_string(),
        };

        if self.kind != KIND_GITOPS {
            return Err(invalid(&format!("expected kind 'gitops', got '{}'", self.kind)));
        }
        if !is_valid_identifier(&self.meta.group) {
            return Err(invalid("group must be a lowercase identifier"));
        }
        if !is_valid_identifier(&self.meta.name) {
            return Err(invalid("name must be a lowercase identifier"));
        }
        if self.spec.repo_url.trim().is_empty() {
            return Err(invalid("repoURL is required"));
        }
        if self.spec.revision.trim().is_empty() {
            return Err(invalid("revision is required"));
        }
        if self.spec.polling_interval.is_some_and(|i| i.is_zero()) {
            return Err(invalid("pollingInterval must be greater than zero"));
        }
        if self.spec.http_auth_ref.is_some() && self.spec.cert_key_ref.is_some() {
            return Err(invalid("only one of httpAuthRef and certKeyRef may be set"));
        }
        if Path::new(&self.spec.directory_path)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(GitOpsError::PathTraversal(self.spec.directory_path.clone()));
        }

        Ok(())
    }

    /// Directory the repository is checked out into.
    pub fn checkout_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("repositories").join(format!(
            "{}-{}-{}",
            self.meta.group,
            self.meta.name,
            repository_base_name(&self.spec.repo_url)
        ))
    }
}

/// Last path segment of a repository URL without `.git`.
pub fn repository_base_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let segment = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    let base = segment.strip_suffix(".git").unwrap_or(segment);
    if base.is_empty() {
        "repository".to_string()
    } else {
        base.to_string()
    }
}
