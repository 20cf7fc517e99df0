//! Durable per-branch metadata.
//!
//! Each tracked branch owns one JSON record stored as a blob behind
//! `refs/branch-metadata/<branch>`. Refs travel with fetch/push, updates are
//! atomic via `update-ref`, and batch mutations go through a single
//! `update-ref --stdin` transaction so a batch lands entirely or not at all.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::git_gateway::{GitGateway, Oid};
use crate::git_gateway::refs::RefUpdate;

/// Ref namespace for branch metadata blobs.
pub const META_REF_PREFIX: &str = "refs/branch-metadata/";

/// State of a pull request on the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// Aggregate CI status of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksStatus {
    Pending,
    Success,
    Failure,
    None,
}

/// PR record held locally; the forge client owns the live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrRecord {
    pub number: u64,
    pub url: String,
    pub state: PrState,
    pub is_draft: bool,
    pub checks: ChecksStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pushed_sha: Option<String>,
}

/// The durable metadata record of one tracked branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchMetadata {
    /// Parent branch; `None` for trunks.
    pub parent: Option<String>,
    /// The parent's tip at the time this branch was last restacked.
    pub base_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrRecord>,
    /// Logical scope override; inherited from the parent when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl BranchMetadata {
    pub fn with_parent(parent: &str) -> Self {
        Self {
            parent: Some(parent.to_string()),
            ..Default::default()
        }
    }
}

/// One entry in a metadata batch: write a record, or delete it.
#[derive(Debug, Clone)]
pub enum MetaMutation {
    Write(String, BranchMetadata),
    Delete(String),
}

/// Store for branch metadata records.
pub struct MetadataStore<'a> {
    gateway: &'a GitGateway,
}

impl<'a> MetadataStore<'a> {
    pub fn new(gateway: &'a GitGateway) -> Self {
        Self { gateway }
    }

    fn ref_name(branch: &str) -> String {
        format!("{}{}", META_REF_PREFIX, branch)
    }

    /// Read a single branch's record, if tracked.
    pub fn read(&self, branch: &str) -> Result<Option<BranchMetadata>> {
        match self.gateway.find_reference(&Self::ref_name(branch))? {
            Some(oid) => Ok(Some(self.parse_record(branch, &oid)?)),
            None => Ok(None),
        }
    }

    fn parse_record(&self, branch: &str, oid: &Oid) -> Result<BranchMetadata> {
        let content = self.gateway.read_blob(oid)?;
        serde_json::from_slice(&content).map_err(|e| {
            Error::Other(anyhow::anyhow!(
                "Corrupted metadata for branch '{}' ({}). Run 'stackit doctor --fix' to repair.",
                branch,
                e
            ))
        })
    }

    /// Load every branch record.
    pub fn load_all(&self) -> Result<BTreeMap<String, BranchMetadata>> {
        let mut out = BTreeMap::new();
        let pattern = format!("{}*", META_REF_PREFIX);
        for (ref_name, oid) in self.gateway.list_references(&pattern)? {
            if let Some(branch) = ref_name.strip_prefix(META_REF_PREFIX) {
                out.insert(branch.to_string(), self.parse_record(branch, &oid)?);
            }
        }
        Ok(out)
    }

    /// Write one branch's record.
    pub fn write(&self, branch: &str, metadata: &BranchMetadata) -> Result<()> {
        let blob = self.gateway.create_blob(&serde_json::to_vec(metadata)?)?;
        self.gateway.update_reference(
            &Self::ref_name(branch),
            &blob,
            &format!("stackit: update metadata for {}", branch),
        )
    }

    /// Delete one branch's record (untrack). Idempotent.
    pub fn delete(&self, branch: &str) -> Result<()> {
        self.gateway.delete_reference(&Self::ref_name(branch))
    }

    /// Apply a set of mutations in one transaction; all land or none do.
    pub fn atomic_batch(&self, mutations: &[MetaMutation]) -> Result<()> {
        let mut updates = Vec::with_capacity(mutations.len());
        for m in mutations {
            match m {
                MetaMutation::Write(branch, metadata) => {
                    let blob = self.gateway.create_blob(&serde_json::to_vec(metadata)?)?;
                    updates.push(RefUpdate::Set {
                        name: Self::ref_name(branch),
                        target: blob,
                    });
                }
                MetaMutation::Delete(branch) => {
                    updates.push(RefUpdate::Delete {
                        name: Self::ref_name(branch),
                    });
                }
            }
        }
        self.gateway.update_refs_atomic(&updates)
    }

    /// Names of all tracked branches.
    pub fn tracked_branches(&self) -> Result<Vec<String>> {
        let pattern = format!("{}*", META_REF_PREFIX);
        let mut out: Vec<String> = self
            .gateway
            .list_references(&pattern)?
            .into_iter()
            .filter_map(|(name, _)| name.strip_prefix(META_REF_PREFIX).map(|s| s.to_string()))
            .collect();
        out.sort();
        Ok(out)
    }
}
