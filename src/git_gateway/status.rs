//! Worktree status probes.

use crate::errors::{Error, Result};

use super::GitGateway;

impl GitGateway {
    /// Whether the worktree has staged or unstaged changes to tracked files.
    /// Untracked files do not count as dirty.
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses.iter().any(|e| {
            e.status().intersects(
                git2::Status::INDEX_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_DELETED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE
                    | git2::Status::WT_MODIFIED
                    | git2::Status::WT_DELETED
                    | git2::Status::WT_RENAMED
                    | git2::Status::WT_TYPECHANGE,
            )
        }))
    }

    /// Whether unstaged modifications to tracked files exist.
    pub fn has_unstaged_changes(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses.iter().any(|e| {
            e.status().intersects(
                git2::Status::WT_MODIFIED
                    | git2::Status::WT_DELETED
                    | git2::Status::WT_RENAMED
                    | git2::Status::WT_TYPECHANGE,
            )
        }))
    }

    /// Whether untracked files exist.
    pub fn has_untracked(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .any(|e| e.status().contains(git2::Status::WT_NEW)))
    }

    /// Fail with `DirtyWorktree` unless the worktree is clean enough to
    /// rebase (no staged or unstaged changes to tracked files).
    pub fn require_clean_worktree(&self) -> Result<()> {
        if self.has_uncommitted_changes()? {
            return Err(Error::DirtyWorktree);
        }
        Ok(())
    }
}
