//! Forge abstraction: the seam between the stack engine and the remote
//! host's pull requests.
//!
//! The core only ever holds PR metadata (see `metadata::PrRecord`); every
//! network-touching operation goes through the `Forge` trait. The GitHub
//! implementation wraps the `gh` CLI; tests use the scripted mock. Forge
//! failures never roll back local state.

pub mod github;
pub mod mock;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::git_gateway::GitGateway;
use crate::metadata::PrRecord;

/// The remote name stack operations work against.
pub const DEFAULT_REMOTE: &str = "origin";

/// How a PR is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Squash => "squash",
            Self::Merge => "merge",
            Self::Rebase => "rebase",
        }
    }
}

/// Options for creating a PR.
#[derive(Debug, Clone, Default)]
pub struct PrOptions {
    pub draft: bool,
    pub title: String,
    pub body: String,
}

/// Operations the engine needs from a forge.
#[async_trait]
pub trait Forge: Send + Sync {
    /// The open or most recent PR whose head is `branch`.
    async fn pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>>;

    /// Create a PR for `branch` against `base`, returning its record.
    async fn create_pr(&self, branch: &str, base: &str, options: &PrOptions) -> Result<PrRecord>;

    /// Move an existing PR's base branch.
    async fn update_pr_base(&self, number: u64, new_base: &str) -> Result<()>;

    /// Replace a PR's body.
    async fn update_pr_body(&self, number: u64, body: &str) -> Result<()>;

    /// Mark a draft PR ready for review.
    async fn mark_ready(&self, number: u64) -> Result<()>;

    /// Merge a PR.
    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()>;

    /// Close a PR without merging.
    async fn close_pr(&self, number: u64) -> Result<()>;
}

/// Resolve PR records for many branches concurrently. Lookup failures map to
/// `None`; the planner treats an unknown PR like a missing one.
pub async fn prs_for_branches(
    forge: &dyn Forge,
    branches: &[String],
) -> BTreeMap<String, Option<PrRecord>> {
    let lookups = branches.iter().map(|b| forge.pr_for_branch(b));
    let results = futures::future::join_all(lookups).await;
    branches
        .iter()
        .cloned()
        .zip(results.into_iter().map(|r| r.ok().flatten()))
        .collect()
}

/// Pick the forge for this repository from its remote URL.
pub fn detect_forge(gateway: &GitGateway, config: &Config) -> Result<Box<dyn Forge>> {
    if !config.is_forge_enabled {
        return Err(Error::Forge(
            "forge integration is disabled (config is_forge_enabled=false)".to_string(),
        ));
    }
    let url = gateway.remote_url(DEFAULT_REMOTE).ok_or_else(|| {
        Error::Forge(format!("no '{}' remote configured", DEFAULT_REMOTE))
    })?;
    if url.contains("github.com") || url.contains("github") {
        Ok(Box::new(github::GitHubForge::new()))
    } else {
        Err(Error::Forge(format!(
            "unsupported forge for remote '{}' (only GitHub is supported)",
            url
        )))
    }
}
