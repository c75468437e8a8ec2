//! Commit, push and remote probes through the system `git` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::GitError;

/// Write-side source-control operations used by the publisher and preflight.
#[cfg_attr(test, mockall::automock)]
pub trait SourceControl: Send + Sync {
    /// Stage and commit exactly `path` with `message`, leaving other changes alone.
    fn commit_path(&self, path: &str, message: &str) -> Result<(), GitError>;

    /// Push the current branch to its upstream.
    fn push(&self) -> Result<(), GitError>;

    /// Probe `remote` with `git ls-remote`.
    fn remote_reachable(&self, remote: &str) -> Result<(), GitError>;
}

/// [`SourceControl`] backed by `git` run inside the repository root.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceControl for GitCli {
    fn commit_path(&self, path: &str, message: &str) -> Result<(), GitError> {
        run_git(&self.root, &["add", "--", path], "add")?;
        run_git(&self.root, &["commit", "-m", message, "--only", "--", path], "commit")?;
        Ok(())
    }

    fn push(&self) -> Result<(), GitError> {
        run_git(&self.root, &["push"], "push").map(|_| ())
    }

    fn remote_reachable(&self, remote: &str) -> Result<(), GitError> {
        run_git(&self.root, &["ls-remote", "--heads", remote], "ls-remote").map(|_| ())
    }
}

/// Run a git command in `root` and return its stdout.
fn run_git(root: &Path, args: &[&str], operation: &str) -> Result<String, GitError> {
    debug!("git {}", args.join(" "));
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|source| GitError::SpawnFailed {
            operation: operation.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed {
            operation: operation.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
