//! Undo snapshots.
//!
//! Before any mutating command, the engine captures every tracked branch's
//! ref position and metadata into a numbered JSON file under
//! `.git/.stackit_undo/`. The files form a bounded ring: the oldest entry is
//! evicted only after the new snapshot has been fsynced. `undo` restores a
//! snapshot atomically (one ref transaction, one metadata batch, then a
//! checkout).

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::git_gateway::refs::RefUpdate;
use crate::git_gateway::{GitGateway, Oid};
use crate::metadata::{BranchMetadata, MetaMutation, MetadataStore};

const UNDO_DIR: &str = ".stackit_undo";

/// Captured state of one branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBranch {
    pub sha: String,
    /// `None` for trunks, which carry no metadata record.
    pub metadata: Option<BranchMetadata>,
}

/// A captured repository state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub command_args: Vec<String>,
    pub current_branch: Option<String>,
    pub branches: BTreeMap<String, SnapshotBranch>,
}

/// The bounded ring of snapshots.
pub struct SnapshotRing {
    dir: PathBuf,
    depth: usize,
}

impl SnapshotRing {
    pub fn open(git_dir: &Path, depth: usize) -> Self {
        Self {
            dir: git_dir.join(UNDO_DIR),
            depth: depth.max(1),
        }
    }

    fn entry_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{:03}", id))
    }

    /// Ids currently in the ring, ascending.
    pub fn ids(&self) -> Result<Vec<u64>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Capture the current state of all tracked branches.
    pub fn capture(
        &self,
        gateway: &GitGateway,
        trunks: &[String],
        metadata: &BTreeMap<String, BranchMetadata>,
        command: &str,
        command_args: &[String],
    ) -> Result<Snapshot> {
        let mut branches = BTreeMap::new();
        for trunk in trunks {
            if gateway.branch_exists(trunk)? {
                branches.insert(
                    trunk.clone(),
                    SnapshotBranch {
                        sha: gateway.branch_sha(trunk)?.to_string(),
                        metadata: None,
                    },
                );
            }
        }
        for (branch, meta) in metadata {
            if gateway.branch_exists(branch)? {
                branches.insert(
                    branch.clone(),
                    SnapshotBranch {
                        sha: gateway.branch_sha(branch)?.to_string(),
                        metadata: Some(meta.clone()),
                    },
                );
            }
        }

        let ids = self.ids()?;
        let id = ids.last().map(|last| last + 1).unwrap_or(1);
        let snapshot = Snapshot {
            id,
            timestamp: Utc::now(),
            command: command.to_string(),
            command_args: command_args.to_vec(),
            current_branch: gateway.current_branch()?,
            branches,
        };

        fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(id);
        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create snapshot at {:?}", tmp))?;
            file.write_all(serde_json::to_string_pretty(&snapshot)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        // Evict only after the new snapshot is durable.
        for old_id in ids {
            if id.saturating_sub(old_id) >= self.depth as u64 {
                let _ = fs::remove_file(self.entry_path(old_id));
            }
        }
        Ok(snapshot)
    }

    /// Load a snapshot by id.
    pub fn load(&self, id: u64) -> Result<Snapshot> {
        let path = self.entry_path(id);
        if !path.exists() {
            return Err(Error::Other(anyhow::anyhow!("No snapshot {:03}", id)));
        }
        let content = fs::read_to_string(&path)?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Snapshot {:?} is corrupted", path))?;
        Ok(snapshot)
    }

    /// The most recent snapshot, if any.
    pub fn latest(&self) -> Result<Option<Snapshot>> {
        match self.ids()?.last() {
            Some(&id) => Ok(Some(self.load(id)?)),
            None => Ok(None),
        }
    }

    /// Summaries of all snapshots, newest first.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let mut out = Vec::new();
        for id in self.ids()?.into_iter().rev() {
            out.push(self.load(id)?);
        }
        Ok(out)
    }

    /// Remove a snapshot after a successful restore.
    pub fn discard(&self, id: u64) -> Result<()> {
        let _ = fs::remove_file(self.entry_path(id));
        Ok(())
    }
}

/// Restore a snapshot: refs back to recorded SHAs, metadata replaced
/// wholesale, then checkout of the recorded current branch. Refuses on a
/// dirty worktree unless `force`.
pub fn restore(gateway: &GitGateway, snapshot: &Snapshot, force: bool) -> Result<()> {
    if !force {
        gateway.require_clean_worktree()?;
    }

    let mut ref_updates = Vec::new();
    for (branch, state) in &snapshot.branches {
        ref_updates.push(RefUpdate::Set {
            name: format!("refs/heads/{}", branch),
            target: Oid::parse(&state.sha)?,
        });
    }
    gateway.update_refs_atomic(&ref_updates)?;

    let store = MetadataStore::new(gateway);
    let mut mutations = Vec::new();
    for existing in store.tracked_branches()? {
        if !snapshot.branches.contains_key(&existing)
            || snapshot.branches[&existing].metadata.is_none()
        {
            mutations.push(MetaMutation::Delete(existing));
        }
    }
    for (branch, state) in &snapshot.branches {
        if let Some(meta) = &state.metadata {
            mutations.push(MetaMutation::Write(branch.clone(), meta.clone()));
        }
    }
    store.atomic_batch(&mutations)?;

    if let Some(branch) = &snapshot.current_branch {
        let fallbacks: Vec<String> = snapshot.branches.keys().cloned().collect();
        gateway.checkout_or_fallback(branch, &fallbacks)?;
    }
    // The checked-out branch's ref may have moved underneath the worktree
    // (checkout of the same branch is a no-op); resync explicitly. The
    // worktree was verified clean above unless forced.
    gateway.reset_hard_head()?;
    Ok(())
}
