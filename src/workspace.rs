//! Isolated workspaces that hold a work item's branch.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::git::{GitCli, GitError};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("git command failed")]
    Git(#[from] GitError),
}

/// Where a work item's changes live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDescriptor {
    pub work_item_key: String,
    pub path: PathBuf,
    pub branch: String,
}

/// Manages the isolated checkout of each work item.
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Location of the workspace for `key`.
    fn describe(&self, key: &str, branch: &str) -> WorkspaceDescriptor;

    /// Publish `branch` from the workspace of `key` to the remote.
    async fn push(&self, key: &str, branch: &str) -> Result<(), WorkspaceError>;

    /// Remove the workspace of `key`.
    async fn destroy(&self, key: &str) -> Result<(), WorkspaceError>;
}

/// Workspaces backed by `git worktree`, one per key under `worktrees_dir`.
/// Keys without a worktree fall back to the main checkout.
#[derive(Debug, Clone)]
pub struct GitWorktreeManager {
    git: GitCli,
    worktrees_dir: PathBuf,
    remote: String,
}

impl GitWorktreeManager {
    pub fn new(git: GitCli, worktrees_dir: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            git,
            worktrees_dir: worktrees_dir.into(),
            remote: remote.into(),
        }
    }

    fn worktree_path(&self, key: &str) -> PathBuf {
        self.worktrees_dir.join(key)
    }

    fn checkout_for(&self, key: &str) -> PathBuf {
        let worktree = self.worktree_path(key);
        if worktree.is_dir() {
            worktree
        } else {
            self.git.repo_root().to_path_buf()
        }
    }
}

#[async_trait]
impl WorkspaceManager for GitWorktreeManager {
    fn describe(&self, key: &str, branch: &str) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            work_item_key: key.to_string(),
            path: self.checkout_for(key),
            branch: branch.to_string(),
        }
    }

    async fn push(&self, key: &str, branch: &str) -> Result<(), WorkspaceError> {
        let cwd = self.checkout_for(key);
        self.git.push_branch(&cwd, &self.remote, branch).await?;
        info!(component = "workspace", work_item = key, branch, remote = %self.remote, "branch pushed");
        Ok(())
    }

    async fn destroy(&self, key: &str) -> Result<(), WorkspaceError> {
        let worktree = self.worktree_path(key);
        if !worktree.is_dir() {
            debug!(component = "workspace", work_item = key, "no worktree to remove");
            return Ok(());
        }
        self.git.remove_worktree(&worktree).await?;
        info!(component = "workspace", work_item = key, path = %worktree.display(), "worktree removed");
        Ok(())
    }
}
