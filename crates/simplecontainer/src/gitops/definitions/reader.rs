//! Reads definition files from a checkout.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use super::order::{insert_ordered, is_known_kind};
use super::request::Request;
use crate::gitops::error::{GitOpsError, Result};

/// Definitions read from one directory.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Requests in dependency order.
    pub requests: Vec<Request>,
    /// Documents dropped because of an empty or unknown kind.
    pub warnings: Vec<String>,
}

/// Resolves `directory_path` inside `checkout`, refusing paths that escape it.
pub fn definitions_dir(checkout: &Path, directory_path: &str) -> Result<PathBuf> {
    let relative = Path::new(directory_path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(GitOpsError::PathTraversal(directory_path.to_string()));
    }

    let dir = checkout.join(relative);
    let resolved = dir.canonicalize().map_err(|e| GitOpsError::ReadDirectory {
        path: dir.clone(),
        source: e,
    })?;
    let root = checkout.canonicalize().map_err(|e| GitOpsError::ReadDirectory {
        path: checkout.to_path_buf(),
        source: e,
    })?;

    // Symlinks inside the repository may still point outside of it.
    if !resolved.starts_with(&root) {
        return Err(GitOpsError::PathTraversal(directory_path.to_string()));
    }

    Ok(resolved)
}

/// Reads every `.yaml`/`.yml` file directly inside `dir`, in file-name order,
/// and returns the definitions in dependency order.
///
/// Files may hold several YAML documents. Documents with an empty or unknown
/// `kind` are dropped and reported in [`ReadOutcome::warnings`]. Any parse
/// error fails the whole read, as does a directory without definitions.
pub fn read_definitions(dir: &Path) -> Result<ReadOutcome> {
    if !dir.is_dir() {
        return Err(GitOpsError::ReadDirectory {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut outcome = ReadOutcome::default();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if hidden || (ext != "yaml" && ext != "yml") {
            continue;
        }

        let content = fs::read_to_string(path).map_err(|e| GitOpsError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        for document in serde_yaml::Deserializer::from_str(&content) {
            let value =
                serde_yaml::Value::deserialize(document).map_err(|e| GitOpsError::ParseYaml {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or("")
                .to_string();
            if !is_known_kind(&kind) {
                let warning = if kind.is_empty() {
                    format!("{}: definition without kind dropped", path.display())
                } else {
                    format!("{}: unknown kind '{}' dropped", path.display(), kind)
                };
                log::warn!("{}", warning);
                outcome.warnings.push(warning);
                continue;
            }

            let request = Request::from_value(value, path)?;
            if outcome
                .requests
                .iter()
                .any(|r| r.identity() == request.identity())
            {
                return Err(GitOpsError::InvalidResource {
                    name: request.identity(),
                    message: format!("defined twice, again in {}", path.display()),
                });
            }

            insert_ordered(&mut outcome.requests, request);
        }
    }

    if outcome.requests.is_empty() {
        return Err(GitOpsError::EmptyDefinitions(dir.to_path_buf()));
    }

    log::debug!(
        "Read {} definitions from {}",
        outcome.requests.len(),
        dir.display()
    );

    Ok(outcome)
}
