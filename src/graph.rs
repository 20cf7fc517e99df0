//! The stack graph: an in-memory forest of tracked branches.
//!
//! Stored as parent pointers (from metadata) with a derived children view,
//! which makes cycles impossible to represent accidentally and sidesteps
//! pointer ownership entirely. Trunks are roots; untracked branches are not
//! nodes. Every mutation validates the forest invariants.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::git_gateway::GitGateway;
use crate::metadata::{BranchMetadata, MetaMutation};

/// Walk depth guard for corrupted parent chains.
const MAX_DEPTH: usize = 1000;

/// Which part of the stack an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeSpec {
    pub include_parents: bool,
    pub include_children: bool,
    pub include_self: bool,
    pub recursive: bool,
}

impl ScopeSpec {
    pub const ONLY: ScopeSpec = ScopeSpec {
        include_parents: false,
        include_children: false,
        include_self: true,
        recursive: false,
    };
    pub const UPSTACK: ScopeSpec = ScopeSpec {
        include_parents: false,
        include_children: true,
        include_self: true,
        recursive: true,
    };
    pub const DOWNSTACK: ScopeSpec = ScopeSpec {
        include_parents: true,
        include_children: false,
        include_self: true,
        recursive: true,
    };
    pub const FULL: ScopeSpec = ScopeSpec {
        include_parents: true,
        include_children: true,
        include_self: true,
        recursive: true,
    };
}

/// Why a branch was auto-reparented during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReparentReason {
    ParentMissing,
    ParentMerged,
}

/// A reparenting performed by `reconcile`, reported to the user and persisted
/// in the same metadata batch as the operation that triggered it.
#[derive(Debug, Clone)]
pub struct Reparent {
    pub branch: String,
    pub old_parent: Option<String>,
    pub new_parent: String,
    pub reason: ReparentReason,
}

/// The forest of tracked branches rooted at the configured trunks.
pub struct StackGraph {
    trunks: Vec<String>,
    primary_trunk: String,
    /// Metadata of tracked non-trunk branches.
    metadata: BTreeMap<String, BranchMetadata>,
    /// Derived children view; values sorted by name.
    children: BTreeMap<String, Vec<String>>,
    /// Branches whose metadata changed and must be persisted.
    dirty: BTreeSet<String>,
    /// Branches whose metadata must be deleted.
    removed: BTreeSet<String>,
}

impl StackGraph {
    /// Build the graph from config plus the metadata records of branches that
    /// still exist in git. Records for vanished branches are returned as
    /// `gone` and queued for deletion.
    pub fn build(
        config: &Config,
        mut metadata: BTreeMap<String, BranchMetadata>,
        existing_branches: &[String],
    ) -> (Self, Vec<String>) {
        let existing: HashSet<&str> = existing_branches.iter().map(|s| s.as_str()).collect();
        let gone: Vec<String> = metadata
            .keys()
            .filter(|b| !existing.contains(b.as_str()))
            .cloned()
            .collect();

        let mut removed = BTreeSet::new();
        for b in &gone {
            metadata.remove(b);
            removed.insert(b.clone());
        }
        // Trunks are roots; a stray metadata record for a trunk is dropped.
        for trunk in &config.trunks {
            if metadata.remove(trunk).is_some() {
                removed.insert(trunk.clone());
            }
        }

        let mut graph = Self {
            trunks: config.trunks.clone(),
            primary_trunk: config.trunk.clone(),
            metadata,
            children: BTreeMap::new(),
            dirty: BTreeSet::new(),
            removed,
        };
        graph.rebuild_children();
        (graph, gone)
    }

    fn rebuild_children(&mut self) {
        self.children.clear();
        for (branch, meta) in &self.metadata {
            if let Some(parent) = &meta.parent {
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .push(branch.clone());
            }
        }
        for siblings in self.children.values_mut() {
            siblings.sort();
        }
    }

    pub fn trunk(&self) -> &str {
        &self.primary_trunk
    }

    pub fn trunks(&self) -> &[String] {
        &self.trunks
    }

    pub fn is_trunk(&self, branch: &str) -> bool {
        self.trunks.iter().any(|t| t == branch)
    }

    /// Whether a branch is a node of the forest (tracked or trunk).
    pub fn is_tracked(&self, branch: &str) -> bool {
        self.is_trunk(branch) || self.metadata.contains_key(branch)
    }

    /// All tracked non-trunk branches.
    pub fn tracked_branches(&self) -> Vec<String> {
        self.metadata.keys().cloned().collect()
    }

    pub fn metadata(&self, branch: &str) -> Option<&BranchMetadata> {
        self.metadata.get(branch)
    }

    pub fn parent(&self, branch: &str) -> Option<&str> {
        self.metadata.get(branch).and_then(|m| m.parent.as_deref())
    }

    pub fn children(&self, branch: &str) -> &[String] {
        self.children.get(branch).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Ancestors of a branch, nearest first, up to and excluding the first
    /// trunk reached. The branch itself is not included.
    pub fn ancestors(&self, branch: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(branch.to_string());
        let mut current = branch.to_string();
        while let Some(parent) = self.parent(&current) {
            if self.is_trunk(parent) {
                break;
            }
            if !seen.insert(parent.to_string()) {
                let mut cycle: Vec<String> = seen.into_iter().collect();
                cycle.sort();
                return Err(Error::CycleDetected(cycle));
            }
            if out.len() >= MAX_DEPTH {
                return Err(Error::Other(anyhow::anyhow!(
                    "parent chain exceeds maximum depth ({})",
                    MAX_DEPTH
                )));
            }
            out.push(parent.to_string());
            current = parent.to_string();
        }
        Ok(out)
    }

    /// The nearest trunk above a branch, falling back to the primary trunk
    /// when the chain never reaches one.
    pub fn trunk_of(&self, branch: &str) -> Result<String> {
        let mut current = branch.to_string();
        let mut depth = 0;
        while let Some(parent) = self.parent(&current) {
            if self.is_trunk(parent) {
                return Ok(parent.to_string());
            }
            current = parent.to_string();
            depth += 1;
            if depth >= MAX_DEPTH {
                break;
            }
        }
        Ok(self.primary_trunk.clone())
    }

    /// All descendants in deterministic DFS order (children sorted by name,
    /// parents before children). The branch itself is not included.
    pub fn descendants(&self, branch: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        for child in self.children(branch).to_vec() {
            self.dfs(&child, &mut out, &mut visited);
        }
        out
    }

    /// Deterministic depth-first traversal starting at (and including) a root.
    pub fn depth_first(&self, root: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.dfs(root, &mut out, &mut visited);
        out
    }

    fn dfs(&self, branch: &str, out: &mut Vec<String>, visited: &mut HashSet<String>) {
        if !visited.insert(branch.to_string()) || visited.len() > MAX_DEPTH {
            return;
        }
        out.push(branch.to_string());
        for child in self.children(branch).to_vec() {
            self.dfs(&child, out, visited);
        }
    }

    /// The branches an operation on `branch` covers, per scope, in
    /// topological order (parents before children). Trunks are never
    /// included.
    pub fn relative_stack(&self, branch: &str, scope: ScopeSpec) -> Result<Vec<String>> {
        let mut set = Vec::new();

        if scope.include_parents {
            let mut ancestors = self.ancestors(branch)?;
            if !scope.recursive {
                ancestors.truncate(1);
            }
            // nearest-first -> parents-before-children order
            ancestors.reverse();
            set.extend(ancestors);
        }
        if scope.include_self && !self.is_trunk(branch) {
            set.push(branch.to_string());
        }
        if scope.include_children {
            if scope.recursive {
                set.extend(self.descendants(branch));
            } else {
                set.extend(self.children(branch).to_vec());
            }
        }
        Ok(set)
    }

    /// Order a set of branches so parents come before children; ties broken
    /// by name. Unknown branches are dropped.
    pub fn topological_order(&self, branches: &[String]) -> Vec<String> {
        let requested: HashSet<&str> = branches.iter().map(|s| s.as_str()).collect();
        let mut out = Vec::new();
        let mut roots: Vec<&String> = self.trunks.iter().collect();
        roots.sort();
        let mut visited = HashSet::new();
        for root in roots {
            for b in self.depth_first(root) {
                if requested.contains(b.as_str()) && visited.insert(b.clone()) && !self.is_trunk(&b)
                {
                    out.push(b);
                }
            }
        }
        out
    }

    /// Reparent a branch, validating the forest invariants first.
    pub fn set_parent(&mut self, branch: &str, new_parent: &str) -> Result<()> {
        if self.is_trunk(branch) {
            return Err(Error::OnTrunk(branch.to_string()));
        }
        if branch == new_parent {
            return Err(Error::CycleDetected(vec![
                branch.to_string(),
                new_parent.to_string(),
            ]));
        }
        if !self.is_tracked(new_parent) {
            return Err(Error::BranchNotTracked(new_parent.to_string()));
        }
        // A cycle would mean `branch` is an ancestor of its new parent.
        if !self.is_trunk(new_parent) {
            let mut chain = vec![new_parent.to_string()];
            chain.extend(self.ancestors(new_parent)?);
            if chain.iter().any(|a| a == branch) {
                let mut cycle = vec![branch.to_string()];
                cycle.extend(chain);
                return Err(Error::CycleDetected(cycle));
            }
        }

        let meta = self.metadata.entry(branch.to_string()).or_default();
        meta.parent = Some(new_parent.to_string());
        self.dirty.insert(branch.to_string());
        self.removed.remove(branch);
        self.rebuild_children();
        Ok(())
    }

    /// Record a branch as tracked with the given metadata.
    pub fn insert(&mut self, branch: &str, metadata: BranchMetadata) -> Result<()> {
        if self.is_trunk(branch) {
            return Err(Error::OnTrunk(branch.to_string()));
        }
        self.metadata.insert(branch.to_string(), metadata);
        self.dirty.insert(branch.to_string());
        self.removed.remove(branch);
        self.rebuild_children();
        Ok(())
    }

    /// Untrack a branch; children are left to the caller to reparent.
    pub fn remove(&mut self, branch: &str) {
        if self.metadata.remove(branch).is_some() {
            self.removed.insert(branch.to_string());
            self.dirty.remove(branch);
            self.rebuild_children();
        }
    }

    /// Update a branch's recorded base SHA.
    pub fn set_base_sha(&mut self, branch: &str, sha: String) {
        if let Some(meta) = self.metadata.get_mut(branch) {
            meta.base_sha = Some(sha);
            self.dirty.insert(branch.to_string());
        }
    }

    /// Update a branch's PR record.
    pub fn set_pr(&mut self, branch: &str, pr: Option<crate::metadata::PrRecord>) {
        if let Some(meta) = self.metadata.get_mut(branch) {
            meta.pr = pr;
            self.dirty.insert(branch.to_string());
        }
    }

    /// Update a branch's scope tag.
    pub fn set_scope(&mut self, branch: &str, scope: Option<String>) {
        if let Some(meta) = self.metadata.get_mut(branch) {
            meta.scope = scope;
            self.dirty.insert(branch.to_string());
        }
    }

    /// Effective logical scope of a branch (inherited from ancestors).
    pub fn effective_scope(&self, branch: &str) -> Result<Option<String>> {
        if let Some(scope) = self.metadata.get(branch).and_then(|m| m.scope.clone()) {
            return Ok(Some(scope));
        }
        for ancestor in self.ancestors(branch)? {
            if let Some(scope) = self.metadata.get(&ancestor).and_then(|m| m.scope.clone()) {
                return Ok(Some(scope));
            }
        }
        Ok(None)
    }

    /// Reconcile against git: branches whose recorded parent no longer exists
    /// or has been merged into a trunk are reparented to the nearest
    /// surviving tracked ancestor, falling back to the nearest trunk.
    pub fn reconcile(&mut self, gateway: &GitGateway) -> Result<Vec<Reparent>> {
        let mut reparents = Vec::new();
        let branches: Vec<String> = self.metadata.keys().cloned().collect();

        for branch in branches {
            let Some(recorded_parent) = self.parent(&branch).map(|s| s.to_string()) else {
                continue;
            };
            if self.is_trunk(&recorded_parent) {
                continue;
            }

            let parent_exists =
                self.is_tracked(&recorded_parent) && gateway.branch_exists(&recorded_parent)?;

            let reason = if !parent_exists {
                Some(ReparentReason::ParentMissing)
            } else {
                let trunk = self.trunk_of(&branch)?;
                let parent_tip = gateway.branch_sha(&recorded_parent)?;
                let trunk_tip = gateway.branch_sha(&trunk)?;
                if gateway.is_ancestor(&parent_tip, &trunk_tip)? {
                    Some(ReparentReason::ParentMerged)
                } else {
                    None
                }
            };

            let Some(reason) = reason else { continue };

            let new_parent = match reason {
                ReparentReason::ParentMissing => {
                    self.nearest_surviving_ancestor(&recorded_parent, gateway)?
                }
                // A merged parent's history is in trunk; its other ancestors
                // are too, so the branch lands directly on trunk.
                ReparentReason::ParentMerged => self.trunk_of(&branch)?,
            };

            let meta = self
                .metadata
                .get_mut(&branch)
                .expect("branch came from metadata keys");
            meta.parent = Some(new_parent.clone());
            self.dirty.insert(branch.clone());
            reparents.push(Reparent {
                branch,
                old_parent: Some(recorded_parent),
                new_parent,
                reason,
            });
        }

        if !reparents.is_empty() {
            self.rebuild_children();
        }
        Ok(reparents)
    }

    /// Walk the recorded parent chain of a vanished branch through whatever
    /// metadata remains, returning the first ancestor that still exists.
    fn nearest_surviving_ancestor(&self, from: &str, gateway: &GitGateway) -> Result<String> {
        let mut current = from.to_string();
        let mut depth = 0;
        loop {
            if self.is_trunk(&current) {
                return Ok(current);
            }
            if self.is_tracked(&current) && gateway.branch_exists(&current)? {
                return Ok(current);
            }
            match self.metadata.get(&current).and_then(|m| m.parent.clone()) {
                Some(parent) => current = parent,
                None => return Ok(self.primary_trunk.clone()),
            }
            depth += 1;
            if depth >= MAX_DEPTH {
                return Ok(self.primary_trunk.clone());
            }
        }
    }

    /// Drain pending metadata mutations for persistence in one batch.
    pub fn take_mutations(&mut self) -> Vec<MetaMutation> {
        let mut out = Vec::new();
        for branch in std::mem::take(&mut self.removed) {
            out.push(MetaMutation::Delete(branch));
        }
        for branch in std::mem::take(&mut self.dirty) {
            if let Some(meta) = self.metadata.get(&branch) {
                out.push(MetaMutation::Write(branch, meta.clone()));
            }
        }
        out
    }

    /// Whether uncommitted mutations exist.
    pub fn has_pending_mutations(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }
}
