//! Classified errors for stackit.
//!
//! Every failure a command can surface maps to one of these kinds, and each
//! kind maps to an exit-code class:
//!
//! - 1: user error (bad arguments, unknown config key, plan rejected)
//! - 2: repository-state error (not a repo, dirty worktree, detached HEAD)
//! - 3: conflict requiring `continue`/`abort`
//! - 4: fatal git or forge failure
//!
//! Engine code returns `Error` directly; edge code may use `anyhow` for
//! context, which folds into `Error::Other` (exit class 1).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not inside a git repository")]
    NotAGitRepo,

    #[error("Repository is not initialized for stackit. Run 'stackit init' first.")]
    NotInitialized,

    #[error("No branches found in this repository")]
    NoBranches,

    #[error("Not currently on a branch (detached HEAD)")]
    NotOnBranch,

    #[error("Cannot perform this operation on trunk branch '{0}'")]
    OnTrunk(String),

    #[error("Worktree has uncommitted changes. Commit or stash them first.")]
    DirtyWorktree,

    #[error("A {kind} is already in progress. Use 'stackit continue' after resolving conflicts, or 'stackit abort' to cancel.")]
    RebaseInProgress { kind: String },

    #[error("No operation in progress to {0}")]
    NoRebaseInProgress(String),

    #[error("Reference '{0}' not found")]
    RefNotFound(String),

    #[error("Branch '{0}' already exists")]
    BranchAlreadyExists(String),

    #[error("Branch '{0}' is not tracked. Run 'stackit track {0}' first.")]
    BranchNotTracked(String),

    #[error("Circular parent reference detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Conflicts while rebasing '{branch}'. Resolve them, 'git add' the files, then run 'stackit continue' (or 'stackit abort').")]
    RebaseConflict { branch: String },

    #[error("Merge plan validation failed:\n{}", format_validation(.errors, .warnings))]
    ValidationFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("Forge request failed: {0}")]
    Forge(String),

    #[error("git failed: {0}")]
    Fatal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn format_validation(errors: &[String], warnings: &[String]) -> String {
    let mut out = String::new();
    for e in errors {
        out.push_str(&format!("  error: {}\n", e));
    }
    for w in warnings {
        out.push_str(&format!("  warning: {}\n", w));
    }
    out.trim_end().to_string()
}

impl Error {
    /// Exit-code class for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotAGitRepo
            | Error::NotInitialized
            | Error::NoBranches
            | Error::NotOnBranch
            | Error::OnTrunk(_)
            | Error::DirtyWorktree
            | Error::RebaseInProgress { .. }
            | Error::NoRebaseInProgress(_)
            | Error::RefNotFound(_)
            | Error::CycleDetected(_) => 2,
            Error::BranchAlreadyExists(_) | Error::BranchNotTracked(_) => 1,
            Error::RebaseConflict { .. } => 3,
            Error::ValidationFailed { .. } => 1,
            Error::Forge(_) | Error::Fatal(_) => 4,
            Error::Other(_) => 1,
        }
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::Fatal(e.message().to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Other(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_classes() {
        assert_eq!(Error::NotAGitRepo.exit_code(), 2);
        assert_eq!(Error::NotInitialized.exit_code(), 2);
        assert_eq!(Error::NotOnBranch.exit_code(), 2);
        assert_eq!(Error::DirtyWorktree.exit_code(), 2);
        assert_eq!(Error::OnTrunk("main".into()).exit_code(), 2);
        assert_eq!(
            Error::RebaseInProgress {
                kind: "restack".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(Error::NoRebaseInProgress("continue".into()).exit_code(), 2);
        assert_eq!(Error::RefNotFound("x".into()).exit_code(), 2);
        assert_eq!(Error::CycleDetected(vec!["a".into(), "b".into()]).exit_code(), 2);
        assert_eq!(Error::BranchAlreadyExists("x".into()).exit_code(), 1);
        assert_eq!(Error::BranchNotTracked("x".into()).exit_code(), 1);
        assert_eq!(
            Error::RebaseConflict {
                branch: "x".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Error::ValidationFailed {
                errors: vec![],
                warnings: vec![],
            }
            .exit_code(),
            1
        );
        assert_eq!(Error::Fatal("boom".into()).exit_code(), 4);
        assert_eq!(Error::Forge("down".into()).exit_code(), 4);
    }

    #[test]
    fn test_validation_message_lists_errors_and_warnings() {
        let err = Error::ValidationFailed {
            errors: vec!["no PR for branch 'a'".into()],
            warnings: vec!["checks pending on 'b'".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("error: no PR for branch 'a'"));
        assert!(msg.contains("warning: checks pending on 'b'"));
    }

    #[test]
    fn test_anyhow_folds_into_other() {
        let err: Error = anyhow::anyhow!("context lost").into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("context lost"));
    }

    #[test]
    fn test_conversions_classify() {
        let git_err: Error = git2::Error::from_str("object not found").into();
        assert_eq!(git_err.exit_code(), 4);
        assert!(git_err.to_string().contains("object not found"));

        let io_err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(io_err.exit_code(), 1);
    }

    #[test]
    fn test_conflict_message_names_branch_and_next_steps() {
        let err = Error::RebaseConflict {
            branch: "feature-2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("feature-2"));
        assert!(msg.contains("stackit continue"));
        assert!(msg.contains("stackit abort"));
    }
}
