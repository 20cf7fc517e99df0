//! Throwaway worktrees.
//!
//! `merge --worktree` performs its final restack in a linked worktree so the
//! user's checkout is left untouched while PRs land.

use std::path::PathBuf;

use crate::errors::Result;

use super::GitGateway;

/// Handle to a linked worktree created by `create_worktree`.
#[derive(Debug)]
pub struct WorktreeHandle {
    pub path: PathBuf,
    /// The ref the worktree was created on (kept for diagnostics).
    #[allow(dead_code)]
    pub branch: String,
}

impl GitGateway {
    /// Create a linked worktree at `path` checked out to `branch`.
    pub fn create_worktree(&self, path: &std::path::Path, branch: &str) -> Result<WorktreeHandle> {
        self.run_git_ok(&[
            "worktree",
            "add",
            path.to_string_lossy().as_ref(),
            branch,
        ])?;
        Ok(WorktreeHandle {
            path: path.to_path_buf(),
            branch: branch.to_string(),
        })
    }

    /// Remove a linked worktree, discarding its local state.
    pub fn remove_worktree(&self, handle: &WorktreeHandle) -> Result<()> {
        self.run_git_ok(&[
            "worktree",
            "remove",
            "--force",
            handle.path.to_string_lossy().as_ref(),
        ])?;
        Ok(())
    }

    /// Branches checked out in linked worktrees (cannot be rebased in place).
    /// The main worktree's branch is not included.
    pub fn worktree_branches(&self) -> Result<Vec<String>> {
        let out = self.run_git_ok(&["worktree", "list", "--porcelain"])?;
        let mut branches = Vec::new();
        let mut entry_index = 0usize;
        for line in out.lines() {
            if line.starts_with("worktree ") {
                entry_index += 1;
            } else if let Some(branch_ref) = line.strip_prefix("branch refs/heads/") {
                if entry_index > 1 {
                    branches.push(branch_ref.to_string());
                }
            }
        }
        Ok(branches)
    }
}
