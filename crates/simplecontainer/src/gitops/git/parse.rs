//! Git output parsing helpers.

use std::process::Output;

/// Formats a git error with both stdout and stderr.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Finds the commit of `refs/heads/<branch>` in `git ls-remote` output.
pub fn parse_ls_remote(stdout: &str, branch: &str) -> Option<String> {
    let wanted = format!("refs/heads/{}", branch);
    stdout.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let reference = parts.next()?;
        (reference == wanted && is_commit_hash(hash)).then(|| hash.to_string())
    })
}

/// First line of `git rev-parse` output as a commit hash.
pub fn parse_rev_parse(stdout: &str) -> Option<String> {
    let hash = stdout.lines().next()?.trim();
    is_commit_hash(hash).then(|| hash.to_string())
}

fn is_commit_hash(value: &str) -> bool {
    matches!(value.len(), 40 | 64) && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD_A: &str = "3f2a1c9d8e7b6a5f4e3d2c1b0a9f8e7d6c5b4a39";
    const HEAD_B: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_ls_remote() {
        let stdout = format!(
            "{}\trefs/heads/dev\n{}\trefs/heads/main\n",
            HEAD_B, HEAD_A
        );
        assert_eq!(parse_ls_remote(&stdout, "main"), Some(HEAD_A.to_string()));
        assert_eq!(parse_ls_remote(&stdout, "dev"), Some(HEAD_B.to_string()));
        assert_eq!(parse_ls_remote(&stdout, "missing"), None);
    }

    #[test]
    fn test_parse_ls_remote_ignores_prefix_matches() {
        let stdout = format!("{}\trefs/heads/main-old\n", HEAD_A);
        assert_eq!(parse_ls_remote(&stdout, "main"), None);
    }

    #[test]
    fn test_parse_rev_parse() {
        assert_eq!(
            parse_rev_parse(&format!("{}\n", HEAD_A)),
            Some(HEAD_A.to_string())
        );
        assert_eq!(parse_rev_parse("fatal: not a git repository"), None);
        assert_eq!(parse_rev_parse(""), None);
    }

    #[cfg(unix)]
    mod unix_tests {
        use super::*;
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        fn make_output(status_code: i32, stdout: &[u8], stderr: &[u8]) -> Output {
            Output {
                status: ExitStatus::from_raw(status_code << 8),
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
            }
        }

        #[test]
        fn test_format_git_error_empty_output() {
            let output = make_output(1, b"", b"");
            assert_eq!(format_git_error(&output), "Command failed with exit code 1");
        }

        #[test]
        fn test_format_git_error_both() {
            let output = make_output(128, b"hint", b"fatal: bad ref");
            assert_eq!(format_git_error(&output), "fatal: bad ref\nhint");
        }
    }
}
