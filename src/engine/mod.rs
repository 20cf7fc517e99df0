//! The engine facade.
//!
//! Commands open one `Engine` per invocation. It loads configuration and
//! metadata into the stack graph, and brackets every mutating operation:
//! `begin` takes the operation lock plus an undo snapshot, `commit` persists
//! pending metadata mutations in one atomic batch. Git-side effects already
//! applied are never rolled back; a conflict pause hands over to the
//! continuation machinery instead.

pub mod absorb;
pub mod merge;
pub mod restack;

use colored::Colorize;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::git_gateway::GitGateway;
use crate::graph::{Reparent, ReparentReason, StackGraph};
use crate::metadata::MetadataStore;
use crate::snapshot::SnapshotRing;
use crate::state::{acquire_operation_lock, OperationLock};

pub struct Engine {
    pub gateway: GitGateway,
    pub config: Config,
    pub graph: StackGraph,
    snapshots: SnapshotRing,
    /// Held for the duration of a mutating command; released on drop.
    #[allow(dead_code)]
    lock: Option<OperationLock>,
}

impl Engine {
    /// Open the engine for the repository containing the current directory.
    ///
    /// Fails with `NotInitialized` until `stackit init` has run.
    pub fn open() -> Result<Self> {
        let gateway = GitGateway::discover()?;
        Self::from_gateway(gateway)
    }

    pub fn from_gateway(gateway: GitGateway) -> Result<Self> {
        let config = Config::load(gateway.git_dir())?;
        let store = MetadataStore::new(&gateway);
        let metadata = store.load_all()?;
        let branches = gateway.list_branches()?;
        if branches.is_empty() {
            return Err(Error::NoBranches);
        }
        let (graph, gone) = StackGraph::build(&config, metadata, &branches);

        // Records of vanished branches are already queued for deletion in the
        // graph; the next metadata batch cleans them up.
        for branch in &gone {
            eprintln!(
                "{} Untracked '{}' (branch no longer exists)",
                "!".yellow(),
                branch
            );
        }

        let snapshots = SnapshotRing::open(gateway.git_dir(), config.undo_stack_depth);
        Ok(Self {
            gateway,
            config,
            graph,
            snapshots,
            lock: None,
        })
    }

    /// Begin a mutating operation: exclusive lock, then an undo snapshot.
    pub fn begin(&mut self, command: &str, args: &[String]) -> Result<()> {
        let lock = acquire_operation_lock(&self.gateway)?;
        self.lock = Some(lock);

        let mut metadata = std::collections::BTreeMap::new();
        for branch in self.graph.tracked_branches() {
            if let Some(meta) = self.graph.metadata(&branch) {
                metadata.insert(branch, meta.clone());
            }
        }
        self.snapshots.capture(
            &self.gateway,
            &self.config.trunks,
            &metadata,
            command,
            args,
        )?;
        Ok(())
    }

    /// Begin without capturing a snapshot (`continue`/`abort` resume a state
    /// the snapshot of the original command already covers).
    pub fn begin_resume(&mut self) -> Result<()> {
        let lock = OperationLock::acquire(self.gateway.git_dir())?;
        self.lock = Some(lock);
        Ok(())
    }

    /// Persist pending metadata mutations in one atomic batch.
    pub fn commit(&mut self) -> Result<()> {
        if !self.graph.has_pending_mutations() {
            return Ok(());
        }
        let mutations = self.graph.take_mutations();
        let store = MetadataStore::new(&self.gateway);
        store.atomic_batch(&mutations)
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.snapshots
    }

    /// Reconcile the graph against git (auto-reparenting) and report what
    /// changed. The reparents are persisted with the next `commit`.
    pub fn reconcile(&mut self) -> Result<Vec<Reparent>> {
        let reparents = self.graph.reconcile(&self.gateway)?;
        for r in &reparents {
            let why = match r.reason {
                ReparentReason::ParentMissing => "no longer exists",
                ReparentReason::ParentMerged => "was merged",
            };
            println!(
                "{} Reparented {} onto {} ('{}' {})",
                "→".blue(),
                r.branch.green(),
                r.new_parent.blue(),
                r.old_parent.as_deref().unwrap_or("?"),
                why
            );
        }
        Ok(reparents)
    }

    /// The current branch, which must be tracked and not a trunk.
    pub fn require_current_stack_branch(&self) -> Result<String> {
        let branch = self.gateway.require_current_branch()?;
        if self.graph.is_trunk(&branch) {
            return Err(Error::OnTrunk(branch));
        }
        if !self.graph.is_tracked(&branch) {
            return Err(Error::BranchNotTracked(branch));
        }
        Ok(branch)
    }

    /// A named branch, which must exist in git and be tracked.
    pub fn require_tracked(&self, branch: &str) -> Result<()> {
        if !self.gateway.branch_exists(branch)? {
            return Err(Error::RefNotFound(branch.to_string()));
        }
        if !self.graph.is_tracked(branch) {
            return Err(Error::BranchNotTracked(branch.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::BranchMetadata;
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    fn init_stackit(dir: &std::path::Path) -> GitGateway {
        let gateway = GitGateway::from_path(dir).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();
        gateway
    }

    #[test]
    fn test_open_requires_init() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        assert!(matches!(Engine::open(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_open_builds_graph_from_metadata() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = init_stackit(dir.path());
        gateway.create_branch("feature", "HEAD").unwrap();
        MetadataStore::new(&gateway)
            .write("feature", &BranchMetadata::with_parent("main"))
            .unwrap();

        let engine = Engine::open().unwrap();
        assert!(engine.graph.is_tracked("feature"));
        assert_eq!(engine.graph.parent("feature"), Some("main"));
        assert_eq!(engine.graph.trunk(), "main");
    }

    #[test]
    fn test_begin_takes_snapshot_and_lock() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = init_stackit(dir.path());
        gateway.create_branch("feature", "HEAD").unwrap();
        MetadataStore::new(&gateway)
            .write("feature", &BranchMetadata::with_parent("main"))
            .unwrap();

        let mut engine = Engine::open().unwrap();
        engine
            .begin("restack", &["--upstack".to_string()])
            .unwrap();

        let snapshot = engine.snapshots().latest().unwrap().unwrap();
        assert_eq!(snapshot.command, "restack");
        assert!(snapshot.branches.contains_key("feature"));
        assert!(snapshot.branches.contains_key("main"));
    }

    #[test]
    fn test_commit_persists_graph_mutations() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = init_stackit(dir.path());
        gateway.create_branch("feature", "HEAD").unwrap();

        let mut engine = Engine::open().unwrap();
        engine
            .graph
            .insert("feature", BranchMetadata::with_parent("main"))
            .unwrap();
        engine.commit().unwrap();

        let store = MetadataStore::new(&engine.gateway);
        assert_eq!(
            store.read("feature").unwrap().unwrap().parent.as_deref(),
            Some("main")
        );
    }

    #[test]
    fn test_require_current_stack_branch_rejects_trunk() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        init_stackit(dir.path());

        let engine = Engine::open().unwrap();
        assert!(matches!(
            engine.require_current_stack_branch(),
            Err(Error::OnTrunk(_))
        ));
    }
}
