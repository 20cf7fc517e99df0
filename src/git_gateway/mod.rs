//! Git operations gateway for stackit.
//!
//! One typed surface over the repository: `git2` for object and ref reads
//! (rev-parse, merge-base, ancestry, blobs, commit metadata) and the external
//! `git` binary for history surgery (rebase, apply, blame, update-ref
//! transactions), which libgit2 either lacks or handles poorly.
//!
//! All operations are atomic with respect to the calling process; concurrent
//! invocations against the same repository are not supported.

mod branch;
mod commit;
pub mod diff;
mod rebase;
pub mod refs;
mod status;
mod worktree;

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use colored::Colorize;

use crate::context::ExecutionContext;
use crate::errors::{Error, Result};

pub use commit::CommitMetadata;
pub use diff::{FilePatch, Hunk};
pub use rebase::RebaseOutcome;
pub use refs::Oid;
pub use worktree::WorktreeHandle;

/// Log a git command when verbose mode is enabled.
pub(crate) fn verbose_cmd(args: &[&str]) {
    if ExecutionContext::is_verbose() {
        eprintln!("  {} git {}", "[cmd]".dimmed(), args.join(" "));
    }
}

/// Unified interface to git operations.
pub struct GitGateway {
    pub(crate) repo: git2::Repository,
    pub(crate) git_dir: PathBuf,
    pub(crate) workdir: PathBuf,
}

impl GitGateway {
    /// Open the repository containing the current directory.
    ///
    /// In test builds, uses the thread-local test repository path if one is
    /// set via `TestRepoContext`.
    pub fn discover() -> Result<Self> {
        #[cfg(test)]
        {
            if let Some(path) = crate::test_context::test_repo_path() {
                return Self::from_path(&path);
            }
            panic!(
                "GitGateway::discover() called in a test without TestRepoContext; \
                 this would operate on the stackit repository itself"
            );
        }

        #[cfg(not(test))]
        {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Self::from_path(&cwd)
        }
    }

    /// Open the repository containing `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let repo = git2::Repository::discover(path).map_err(|_| Error::NotAGitRepo)?;
        let git_dir = repo.path().to_path_buf();
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::Fatal("bare repositories are not supported".to_string()))?
            .to_path_buf();
        Ok(Self {
            repo,
            git_dir,
            workdir,
        })
    }

    /// Path to the `.git` directory.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Path to the working directory.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run a git subcommand in the working directory and return its output.
    ///
    /// Non-zero exit is not an error here; callers classify the outcome.
    pub(crate) fn run_git(&self, args: &[&str]) -> Result<std::process::Output> {
        verbose_cmd(args);
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| Error::Fatal(format!("failed to spawn git {}: {}", args.join(" "), e)))
    }

    /// Run a git subcommand that must succeed, returning trimmed stdout.
    pub(crate) fn run_git_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Fatal(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Whether the repository has a remote with the given name.
    pub fn has_remote(&self, remote: &str) -> bool {
        self.repo.find_remote(remote).is_ok()
    }

    /// URL of a remote, if configured.
    pub fn remote_url(&self, remote: &str) -> Option<String> {
        self.repo
            .find_remote(remote)
            .ok()
            .and_then(|r| r.url().map(|u| u.to_string()))
    }

    /// Fetch a remote with pruning.
    pub fn fetch(&self, remote: &str) -> Result<()> {
        self.run_git_ok(&["fetch", "--prune", remote])?;
        Ok(())
    }

    /// Push a branch to the remote with `--force-with-lease`.
    pub fn push_branch(&self, remote: &str, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["push", "--set-upstream"];
        if force {
            args.push("--force");
        } else {
            args.push("--force-with-lease");
        }
        args.push(remote);
        args.push(branch);
        self.run_git_ok(&args)?;
        Ok(())
    }
}
