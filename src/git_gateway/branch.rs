//! Branch operations.

use crate::errors::{Error, Result};

use super::refs::Oid;
use super::GitGateway;

impl GitGateway {
    /// Name of the currently checked out branch, or `None` on detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        match self.repo.head() {
            Ok(head) => {
                if head.is_branch() {
                    Ok(head.shorthand().map(|s| s.to_string()))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Current branch, failing with `NotOnBranch` when detached.
    pub fn require_current_branch(&self) -> Result<String> {
        self.current_branch()?.ok_or(Error::NotOnBranch)
    }

    /// All local branch names.
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for b in self.repo.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = b?;
            if let Some(name) = branch.name()? {
                out.push(name.to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Whether a local branch exists.
    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        match self.repo.find_branch(name, git2::BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Tip commit of a branch.
    pub fn branch_sha(&self, name: &str) -> Result<Oid> {
        self.rev_parse(&format!("refs/heads/{}", name))
    }

    /// Create a branch at a revision. Fails if the branch exists.
    pub fn create_branch(&self, name: &str, at: &str) -> Result<()> {
        if self.branch_exists(name)? {
            return Err(Error::BranchAlreadyExists(name.to_string()));
        }
        let target = self.rev_parse(at)?;
        let commit = self.repo.find_commit(target.to_git2()?)?;
        self.repo.branch(name, &commit, false)?;
        Ok(())
    }

    /// Delete a local branch.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let mut branch = self
            .repo
            .find_branch(name, git2::BranchType::Local)
            .map_err(|_| Error::RefNotFound(name.to_string()))?;
        branch.delete()?;
        Ok(())
    }

    /// Rename a local branch.
    pub fn rename_branch(&self, old: &str, new: &str) -> Result<()> {
        if self.branch_exists(new)? {
            return Err(Error::BranchAlreadyExists(new.to_string()));
        }
        let mut branch = self
            .repo
            .find_branch(old, git2::BranchType::Local)
            .map_err(|_| Error::RefNotFound(old.to_string()))?;
        branch.rename(new, false)?;
        Ok(())
    }

    /// Move a branch ref to a new target without touching the worktree.
    pub fn reset_branch(&self, name: &str, target: &Oid) -> Result<()> {
        self.update_reference(
            &format!("refs/heads/{}", name),
            target,
            &format!("stackit: reset {} to {}", name, target.short()),
        )
    }

    /// Checkout a branch. Fails with `DirtyWorktree` when local changes would
    /// be overwritten.
    pub fn checkout(&self, name: &str) -> Result<()> {
        let output = self.run_git(&["checkout", name])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("would be overwritten") || stderr.contains("Please commit your changes") {
            return Err(Error::DirtyWorktree);
        }
        if stderr.contains("did not match any") || stderr.contains("pathspec") {
            return Err(Error::RefNotFound(name.to_string()));
        }
        Err(Error::Fatal(format!(
            "git checkout {} failed: {}",
            name,
            stderr.trim()
        )))
    }

    /// Checkout the branch if it still exists, otherwise the first surviving
    /// fallback. Used to land somewhere sensible after deletes and restacks.
    pub fn checkout_or_fallback(&self, preferred: &str, fallbacks: &[String]) -> Result<String> {
        if self.branch_exists(preferred)? {
            self.checkout(preferred)?;
            return Ok(preferred.to_string());
        }
        for candidate in fallbacks {
            if self.branch_exists(candidate)? {
                self.checkout(candidate)?;
                return Ok(candidate.clone());
            }
        }
        Err(Error::NoBranches)
    }
}
