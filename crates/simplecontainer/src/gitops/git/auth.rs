//! Git authentication handling.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::resource::AuthSource;

/// Credentials resolved from an `httpauth` or `certkey` resource.
#[derive(Debug)]
pub enum Credentials {
    /// HTTP basic auth.
    HttpBasic {
        username: String,
        password: SecretString,
    },
    /// SSH private key with an optional passphrase.
    SshKey {
        private_key: SecretString,
        passphrase: Option<SecretString>,
    },
}

impl Credentials {
    /// Builds credentials from the spec of a credential resource.
    pub fn from_spec(source: &AuthSource, spec: &Value) -> Result<Self> {
        let field = |name: &str| {
            spec.get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let missing = |name: &str| {
            GitOpsError::GitAuthFailed(format!(
                "{} {}/{} has no '{}'",
                source.kind(),
                source.reference().group,
                source.reference().name,
                name
            ))
        };

        match source {
            AuthSource::HttpAuth(_) => Ok(Credentials::HttpBasic {
                username: field("username").ok_or_else(|| missing("username"))?,
                password: SecretString::from(
                    field("password").ok_or_else(|| missing("password"))?,
                ),
            }),
            AuthSource::CertKey(_) => Ok(Credentials::SshKey {
                private_key: SecretString::from(
                    field("privateKey").ok_or_else(|| missing("privateKey"))?,
                ),
                passphrase: field("privateKeyPassword").map(SecretString::from),
            }),
        }
    }
}

/// Escapes a value for safe use in single-quoted shell strings.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// RAII guard for temporary credential files.
///
/// Deletes every file it holds when dropped, so secrets are not left on disk
/// even if the git command fails.
#[derive(Debug, Default)]
pub struct TempFileCleanup {
    paths: Vec<PathBuf>,
}

impl TempFileCleanup {
    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }
}

impl Drop for TempFileCleanup {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up credential file {}: {}", path.display(), e);
            }
        }
    }
}

/// Authentication environment for git commands.
#[derive(Debug, Default)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command.
    pub _cleanup: TempFileCleanup,
}

/// Builds the git environment for `credentials`.
///
/// Basic auth goes through a `GIT_ASKPASS` script that answers the username
/// and password prompts. SSH keys are written to a 0600 file referenced from
/// `GIT_SSH_COMMAND`; a passphrase is answered through `SSH_ASKPASS`.
pub fn build_auth_env(credentials: Option<&Credentials>) -> Result<AuthEnv> {
    let mut auth = AuthEnv::default();
    auth.env_vars
        .push(("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()));

    let Some(credentials) = credentials else {
        return Ok(auth);
    };

    match credentials {
        Credentials::HttpBasic { username, password } => {
            let script = format!(
                "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
                shell_escape(username),
                shell_escape(password.expose_secret())
            );
            let path = write_private_file("git-askpass", ".sh", &script, true)?;
            auth._cleanup.push(path.clone());
            auth.env_vars
                .push(("GIT_ASKPASS".to_string(), path_str(&path)?));
        }
        Credentials::SshKey {
            private_key,
            passphrase,
        } => {
            let mut key = private_key.expose_secret().to_string();
            if !key.ends_with('\n') {
                key.push('\n');
            }
            let key_path = write_private_file("git-key", "", &key, false)?;
            auth._cleanup.push(key_path.clone());

            auth.env_vars.push((
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    shell_escape(&path_str(&key_path)?)
                ),
            ));

            if let Some(passphrase) = passphrase {
                let script = format!(
                    "#!/bin/sh\necho '{}'\n",
                    shell_escape(passphrase.expose_secret())
                );
                let askpass = write_private_file("ssh-askpass", ".sh", &script, true)?;
                auth._cleanup.push(askpass.clone());
                auth.env_vars
                    .push(("SSH_ASKPASS".to_string(), path_str(&askpass)?));
                auth.env_vars
                    .push(("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()));
            }
        }
    }

    Ok(auth)
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        GitOpsError::GitAuthFailed(
            "Temp directory path contains non-UTF8 characters".to_string(),
        )
    })
}

/// Writes `content` to a new file in the temp directory, readable only by the owner.
fn write_private_file(stem: &str, ext: &str, content: &str, executable: bool) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!(
        ".smr-{}-{}{}",
        stem,
        uuid::Uuid::new_v4(),
        ext
    ));

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mode = if executable { 0o700 } else { 0o600 };
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)?;
        std::io::Write::write_all(&mut file, content.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        let _ = executable;
        std::fs::write(&path, content)?;
    }

    Ok(path)
}
