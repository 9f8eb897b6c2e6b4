//! Thin wrapper around the `git` command line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
}

pub type GitResult<T> = Result<T, GitError>;

/// Runs git commands for one repository with a per-command timeout.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_root: repo_root.into(),
            timeout,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Push `branch` from the checkout at `cwd` and set its upstream.
    pub async fn push_branch(&self, cwd: &Path, remote: &str, branch: &str) -> GitResult<()> {
        self.run(cwd, &["push", "--set-upstream", remote, branch])
            .await
            .map(drop)
    }

    pub async fn delete_remote_branch(&self, remote: &str, branch: &str) -> GitResult<()> {
        self.run(&self.repo_root, &["push", remote, "--delete", branch])
            .await
            .map(drop)
    }

    /// Remove a linked worktree, discarding local changes in it.
    pub async fn remove_worktree(&self, path: &Path) -> GitResult<()> {
        let path = path.to_string_lossy();
        self.run(&self.repo_root, &["worktree", "remove", "--force", path.as_ref()])
            .await
            .map(drop)
    }

    /// Run `git <args>` in `cwd` and return its stdout.
    pub async fn run(&self, cwd: &Path, args: &[&str]) -> GitResult<String> {
        let command = format!("git {}", args.join(" "));
        debug!(cwd = %cwd.display(), %command, "running git");

        let child = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| GitError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                warn!(%command, secs = self.timeout.as_secs(), "git command timed out");
                return Err(GitError::Timeout {
                    command,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(GitError::Failed {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
