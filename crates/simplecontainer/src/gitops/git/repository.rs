//! Git CLI backend.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::auth::{build_auth_env, Credentials};
use super::parse::{format_git_error, parse_ls_remote, parse_rev_parse};
use super::{is_checkout, SourceControl};
use crate::gitops::error::{classify_git_error, GitOpsError, Result};

/// Identity used for commit-back.
const COMMIT_USER_NAME: &str = "simplecontainer";
const COMMIT_USER_EMAIL: &str = "gitops@simplecontainer.io";

/// Runs the `git` executable with a bounded timeout per invocation.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
}

impl GitCli {
    /// Creates a backend using `binary` and `timeout`.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Runs git with optional credentials. Fails on a non-zero exit.
    async fn run(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        credentials: Option<&Credentials>,
    ) -> Result<Output> {
        let auth = build_auth_env(credentials)?;

        let mut cmd = Command::new(&self.binary);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        log::debug!("git {}", args.first().copied().unwrap_or_default());

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitOpsError::GitTimeout(self.timeout.as_secs()))?
            .map_err(|e| GitOpsError::GitOperation(e.to_string()))?;

        // Keep credentials on disk until the command is done.
        drop(auth);

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git", Duration::from_secs(120))
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        revision: &str,
        dest: &Path,
        credentials: Option<&Credentials>,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let dest = dest.to_str().ok_or_else(|| {
            GitOpsError::FileOperation(format!("non-UTF8 checkout path: {}", dest.display()))
        })?;

        self.run(
            None,
            &[
                "clone",
                "--branch",
                revision,
                "--single-branch",
                "--",
                url,
                dest,
            ],
            credentials,
        )
        .await?;

        Ok(())
    }

    async fn pull(
        &self,
        checkout: &Path,
        revision: &str,
        credentials: Option<&Credentials>,
    ) -> Result<()> {
        if !is_checkout(checkout) {
            return Err(GitOpsError::GitNotInitialized);
        }

        // The checkout mirrors the remote branch exactly, so fetch + hard reset
        // instead of a merge.
        self.run(Some(checkout), &["fetch", "origin", revision], credentials)
            .await?;
        self.run(
            Some(checkout),
            &["reset", "--hard", "FETCH_HEAD"],
            None,
        )
        .await?;

        Ok(())
    }

    async fn remote_head(
        &self,
        url: &str,
        revision: &str,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let reference = format!("refs/heads/{}", revision);
        let output = self
            .run(None, &["ls-remote", "--heads", url, &reference], credentials)
            .await?;

        parse_ls_remote(&String::from_utf8_lossy(&output.stdout), revision).ok_or_else(|| {
            GitOpsError::GitOperation(format!("revision '{}' not found on remote", revision))
        })
    }

    async fn local_head(&self, checkout: &Path) -> Result<String> {
        if !is_checkout(checkout) {
            return Err(GitOpsError::GitNotInitialized);
        }

        let output = self
            .run(Some(checkout), &["rev-parse", "HEAD"], None)
            .await?;

        parse_rev_parse(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| GitOpsError::GitOperation("HEAD is not a commit".to_string()))
    }

    async fn commit_and_push(
        &self,
        checkout: &Path,
        revision: &str,
        message: &str,
        files: &[&Path],
        credentials: Option<&Credentials>,
    ) -> Result<Option<String>> {
        if !is_checkout(checkout) {
            return Err(GitOpsError::GitNotInitialized);
        }

        for file in files {
            let file = file.to_str().ok_or_else(|| {
                GitOpsError::FileOperation(format!("non-UTF8 path: {}", file.display()))
            })?;
            self.run(Some(checkout), &["add", "--", file], None).await?;
        }

        let staged = self
            .run(Some(checkout), &["diff", "--cached", "--name-only"], None)
            .await?;
        if String::from_utf8_lossy(&staged.stdout).trim().is_empty() {
            return Ok(None);
        }

        let user_name = format!("user.name={}", COMMIT_USER_NAME);
        let user_email = format!("user.email={}", COMMIT_USER_EMAIL);
        self.run(
            Some(checkout),
            &["-c", &user_name, "-c", &user_email, "commit", "-m", message],
            None,
        )
        .await?;

        let refspec = format!("HEAD:refs/heads/{}", revision);
        self.run(Some(checkout), &["push", "origin", &refspec], credentials)
            .await?;

        self.local_head(checkout).await.map(Some)
    }
}
