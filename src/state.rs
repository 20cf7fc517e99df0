//! Continuation state and the operation lock.
//!
//! A conflict mid-operation is a first-class state transition: the engine
//! writes `.git/.stackit_continue` (temp + rename) and exits; `continue` and
//! `abort` pick the state back up. At most one continuation exists at a time.
//!
//! The operation lock (`.git/.stackit_lock`, fs2 + PID/timestamp) keeps two
//! stackit processes from mutating the same repository concurrently; stale
//! locks from crashed processes are detected and cleaned up.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::git_gateway::GitGateway;

const CONTINUE_FILE: &str = ".stackit_continue";
const LOCK_FILE: &str = ".stackit_lock";

/// Age past which a lock whose holder is dead is considered stale.
const STALE_LOCK_AGE_SECS: u64 = 300;

/// Which multi-step operation was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Restack,
    Sync,
    Absorb,
    Merge,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restack => write!(f, "restack"),
            Self::Sync => write!(f, "sync"),
            Self::Absorb => write!(f, "absorb"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Persisted state of an interrupted operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationState {
    pub kind: OperationKind,
    /// Branches still to be rebased, in order.
    pub remaining_branches: Vec<String>,
    /// The base the paused branch was being rebased onto.
    pub rebased_branch_base: Option<String>,
    /// The branch git is paused on.
    pub current_branch_override: Option<String>,
    /// The branch to return to once the operation completes.
    pub original_branch: String,
    /// Every branch that was part of the operation (progress display, abort).
    #[serde(default)]
    pub all_branches: Vec<String>,
    /// Branches already completed before the pause.
    #[serde(default)]
    pub completed_branches: Vec<String>,
    /// Opaque per-command payload (e.g. the unabsorbed leftover patch).
    #[serde(default)]
    pub command_args: serde_json::Value,
}

impl ContinuationState {
    pub fn new(kind: OperationKind, original_branch: String, branches: Vec<String>) -> Self {
        Self {
            kind,
            remaining_branches: branches.clone(),
            rebased_branch_base: None,
            current_branch_override: None,
            original_branch,
            all_branches: branches,
            completed_branches: Vec::new(),
            command_args: serde_json::Value::Null,
        }
    }

    fn path(git_dir: &Path) -> PathBuf {
        git_dir.join(CONTINUE_FILE)
    }

    pub fn exists(git_dir: &Path) -> bool {
        Self::path(git_dir).exists()
    }

    /// Load the continuation, if one is persisted.
    pub fn load(git_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(git_dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read continuation state at {:?}", path))?;
        let state = serde_json::from_str(&content).with_context(|| {
            format!(
                "Continuation state is corrupted. To recover, delete the file:\n  rm {:?}",
                path
            )
        })?;
        Ok(Some(state))
    }

    /// Persist atomically via temp + rename.
    pub fn save(&self, git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create continuation state at {:?}", tmp))?;
            file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn clear(git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Exclusive lock held for the duration of a mutating command.
///
/// Released on drop.
#[derive(Debug)]
pub struct OperationLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Acquire the lock, cleaning up stale locks from crashed processes.
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let lock_path = git_dir.join(LOCK_FILE);
        match Self::try_acquire(&lock_path) {
            Ok(lock) => Ok(lock),
            Err(first_error) => {
                if Self::is_stale(&lock_path) {
                    eprintln!("Cleaning up stale lock from crashed process...");
                    let _ = fs::remove_file(&lock_path);
                    Self::try_acquire(&lock_path)
                } else {
                    Err(first_error)
                }
            }
        }
    }

    fn try_acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(lock_path)
            .with_context(|| format!("Failed to create lock file at {:?}", lock_path))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut clone = file.try_clone()?;
                let timestamp = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                writeln!(clone, "{}:{}", std::process::id(), timestamp)?;
                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(_) => {
                let holder = fs::read_to_string(lock_path).unwrap_or_default();
                let pid = holder.split(':').next().unwrap_or("").trim();
                Err(Error::Other(anyhow::anyhow!(
                    "Another stackit operation is in progress{}.\n\n\
                     If this is incorrect (e.g. after a crash), delete the lock file:\n  rm {:?}",
                    if pid.is_empty() {
                        String::new()
                    } else {
                        format!(" (PID: {})", pid)
                    },
                    lock_path
                )))
            }
        }
    }

    fn is_stale(lock_path: &Path) -> bool {
        let Ok(content) = fs::read_to_string(lock_path) else {
            return false;
        };
        let parts: Vec<&str> = content.trim().split(':').collect();
        let pid: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
        let lock_time: u64 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);

        if pid == 0 || is_process_running(pid) {
            return false;
        }
        // The holder is dead; only treat the lock as stale once it has aged
        // past the race window of a just-started process.
        if lock_time > 0 {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if now.saturating_sub(lock_time) < STALE_LOCK_AGE_SECS {
                return false;
            }
        }
        true
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    // Conservative default where liveness cannot be probed.
    true
}

/// Acquire the operation lock and verify no interrupted operation is pending.
///
/// A continuation whose git-level rebase vanished (the user ran `git rebase
/// --abort` by hand) is stale: it is cleaned up with a warning instead of
/// blocking every future command.
pub fn acquire_operation_lock(gateway: &GitGateway) -> Result<OperationLock> {
    let lock = OperationLock::acquire(gateway.git_dir())?;

    if let Some(state) = ContinuationState::load(gateway.git_dir())? {
        if gateway.rebase_in_progress()? {
            return Err(Error::RebaseInProgress {
                kind: state.kind.to_string(),
            });
        }
        eprintln!(
            "Cleaning up stale {} state (git rebase was aborted externally)",
            state.kind
        );
        if !state.completed_branches.is_empty() {
            eprintln!(
                "  Note: {} of {} branches were modified before the abort.",
                state.completed_branches.len(),
                state.all_branches.len().max(state.completed_branches.len())
            );
            eprintln!("  Run 'stackit doctor' to verify repository consistency.");
        }
        ContinuationState::clear(gateway.git_dir())?;
    }
    Ok(lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::init_test_repo;
    use tempfile::tempdir;

    #[test]
    fn test_continuation_save_load_clear() {
        let dir = tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).unwrap();

        let mut state = ContinuationState::new(
            OperationKind::Restack,
            "main".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        state.current_branch_override = Some("a".to_string());
        state.rebased_branch_base = Some("c".repeat(40));
        state.save(&git_dir).unwrap();

        let loaded = ContinuationState::load(&git_dir).unwrap().unwrap();
        assert_eq!(loaded.kind, OperationKind::Restack);
        assert_eq!(loaded.remaining_branches, vec!["a", "b"]);
        assert_eq!(loaded.current_branch_override.as_deref(), Some("a"));
        assert_eq!(loaded.original_branch, "main");

        ContinuationState::clear(&git_dir).unwrap();
        assert!(ContinuationState::load(&git_dir).unwrap().is_none());
    }

    #[test]
    fn test_continuation_corrupt_gives_recovery_hint() {
        let dir = tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).unwrap();
        fs::write(git_dir.join(CONTINUE_FILE), "{ bad json").unwrap();

        let err = ContinuationState::load(&git_dir).unwrap_err().to_string();
        assert!(err.contains("corrupted"), "got: {}", err);
        assert!(err.contains("rm"), "got: {}", err);
    }

    #[test]
    fn test_lock_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).unwrap();

        let lock = OperationLock::acquire(&git_dir).unwrap();
        assert!(OperationLock::acquire(&git_dir).is_err());
        drop(lock);
        assert!(OperationLock::acquire(&git_dir).is_ok());
        assert!(!git_dir.join(LOCK_FILE).exists());
    }

    #[test]
    fn test_acquire_operation_lock_blocks_on_live_continuation() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();

        // Simulate a paused rebase plus continuation state.
        fs::create_dir_all(gateway.git_dir().join("rebase-merge")).unwrap();
        let state = ContinuationState::new(
            OperationKind::Restack,
            "main".to_string(),
            vec!["a".to_string()],
        );
        state.save(gateway.git_dir()).unwrap();

        let result = acquire_operation_lock(&gateway);
        assert!(matches!(result, Err(Error::RebaseInProgress { .. })));

        fs::remove_dir_all(gateway.git_dir().join("rebase-merge")).unwrap();
    }

    #[test]
    fn test_acquire_operation_lock_cleans_stale_continuation() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();

        // Continuation exists, but no git rebase is in progress.
        let state = ContinuationState::new(
            OperationKind::Sync,
            "main".to_string(),
            vec!["a".to_string()],
        );
        state.save(gateway.git_dir()).unwrap();

        let lock = acquire_operation_lock(&gateway).unwrap();
        assert!(!ContinuationState::exists(gateway.git_dir()));
        drop(lock);
    }
}
