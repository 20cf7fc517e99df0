//! Rebase operations.
//!
//! A conflict is not an exception here: `rebase_onto` returns a tagged
//! `RebaseOutcome` and leaves git in its paused state, so callers can persist
//! continuation state instead of unwinding.

use std::process::Stdio;

use crate::errors::{Error, Result};

use super::refs::Oid;
use super::GitGateway;

/// Outcome of a rebase step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Completed cleanly.
    Ok,
    /// Paused on conflicts; `.git/rebase-{merge,apply}` exists.
    Conflicts,
}

impl RebaseOutcome {
    pub fn has_conflicts(&self) -> bool {
        matches!(self, RebaseOutcome::Conflicts)
    }
}

impl GitGateway {
    /// Rebase `branch` onto `new_base`, carrying only the commits after
    /// `upstream`: `git rebase --onto <new_base> <upstream> <branch>`.
    ///
    /// Scoping the rebase with the recorded base keeps already-restacked
    /// commits from being replayed when an ancestor was amended.
    pub fn rebase_onto(&self, new_base: &Oid, upstream: &Oid, branch: &str) -> Result<RebaseOutcome> {
        let output = self.run_git(&[
            "rebase",
            "--onto",
            new_base.as_str(),
            upstream.as_str(),
            branch,
        ])?;

        if output.status.success() {
            return Ok(RebaseOutcome::Ok);
        }
        if self.rebase_in_progress()? {
            return Ok(RebaseOutcome::Conflicts);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::Fatal(format!(
            "git rebase --onto failed: {}",
            stderr.trim()
        )))
    }

    /// Continue a paused rebase after the user resolved and staged conflicts.
    ///
    /// `GIT_EDITOR=true` suppresses the message editor; stdin is closed so a
    /// misconfigured hook can never block.
    pub fn rebase_continue(&self) -> Result<RebaseOutcome> {
        super::verbose_cmd(&["rebase", "--continue"]);
        let output = std::process::Command::new("git")
            .args(["rebase", "--continue"])
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| Error::Fatal(format!("failed to spawn git rebase --continue: {}", e)))?;

        if output.status.success() {
            return Ok(RebaseOutcome::Ok);
        }
        if self.rebase_in_progress()? {
            return Ok(RebaseOutcome::Conflicts);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::Fatal(format!(
            "git rebase --continue failed: {}",
            stderr.trim()
        )))
    }

    /// Abort a paused rebase.
    pub fn rebase_abort(&self) -> Result<()> {
        self.run_git_ok(&["rebase", "--abort"])?;
        Ok(())
    }

    /// Whether git has a rebase paused or running.
    pub fn rebase_in_progress(&self) -> Result<bool> {
        Ok(self.git_dir.join("rebase-merge").exists() || self.git_dir.join("rebase-apply").exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo};
    use tempfile::tempdir;

    #[test]
    fn test_rebase_onto_clean() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let base = Oid::from_git2(repo.head().unwrap().peel_to_commit().unwrap().id());

        // feature: one commit on top of base
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        gateway.create_branch("feature", "HEAD").unwrap();
        gateway.checkout("feature").unwrap();
        commit_file(&repo, "feature.txt", "f\n", "feature work").unwrap();
        gateway.checkout("main").unwrap();

        // advance main
        let new_base = Oid::from_git2(commit_file(&repo, "main.txt", "m\n", "main work").unwrap());

        let outcome = gateway.rebase_onto(&new_base, &base, "feature").unwrap();
        assert_eq!(outcome, RebaseOutcome::Ok);

        let feature_tip = gateway.branch_sha("feature").unwrap();
        assert!(gateway.is_ancestor(&new_base, &feature_tip).unwrap());
        assert!(!gateway.rebase_in_progress().unwrap());
    }

    #[test]
    fn test_rebase_onto_conflict_pauses() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let base = Oid::from_git2(repo.head().unwrap().peel_to_commit().unwrap().id());

        let gateway = GitGateway::from_path(dir.path()).unwrap();
        gateway.create_branch("feature", "HEAD").unwrap();
        gateway.checkout("feature").unwrap();
        commit_file(&repo, "clash.txt", "feature side\n", "feature edit").unwrap();
        gateway.checkout("main").unwrap();
        let new_base =
            Oid::from_git2(commit_file(&repo, "clash.txt", "main side\n", "main edit").unwrap());

        let outcome = gateway.rebase_onto(&new_base, &base, "feature").unwrap();
        assert_eq!(outcome, RebaseOutcome::Conflicts);
        assert!(gateway.rebase_in_progress().unwrap());

        gateway.rebase_abort().unwrap();
        assert!(!gateway.rebase_in_progress().unwrap());
    }
}
