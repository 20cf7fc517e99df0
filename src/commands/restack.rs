use colored::Colorize;

use crate::context::ExecutionContext;
use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::graph::ScopeSpec;
use crate::state::OperationKind;

/// `restack` with its scope flags.
pub fn run(branch: Option<String>, only: bool, downstack: bool, upstack: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;

    let scope = if only {
        ScopeSpec::ONLY
    } else if downstack {
        ScopeSpec::DOWNSTACK
    } else {
        // upstack is the default when a branch is named or implied
        let _ = upstack;
        ScopeSpec::UPSTACK
    };

    let target = match branch {
        Some(b) => {
            engine.require_tracked(&b)?;
            b
        }
        None => engine.gateway.require_current_branch()?,
    };
    if engine.graph.is_trunk(&target) {
        return Err(Error::OnTrunk(target));
    }
    if !engine.graph.is_tracked(&target) {
        return Err(Error::BranchNotTracked(target));
    }

    engine.begin("restack", &[target.clone()])?;

    // Repair stale parents before planning any rebase, and persist the
    // reparenting up front so a conflict pause cannot lose it.
    engine.reconcile()?;
    engine.commit()?;

    let branches = engine.graph.relative_stack(&target, scope)?;
    let branches = engine.graph.topological_order(&branches);

    if ExecutionContext::is_dry_run() {
        println!(
            "{} Dry run - would restack {} branch(es):",
            "[preview]".yellow().bold(),
            branches.len()
        );
        for b in &branches {
            let parent = engine.graph.parent(b).unwrap_or("(trunk)");
            println!("  • {} onto {}", b.green(), parent.blue());
        }
        return Ok(());
    }

    restack::execute(
        &mut engine,
        branches,
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::git_gateway::GitGateway;
    use crate::metadata::{BranchMetadata, MetadataStore};
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    fn setup_stack() -> (tempfile::TempDir, git2::Repository) {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();

        gateway.create_branch("a", "HEAD").unwrap();
        gateway.checkout("a").unwrap();
        commit_file(&repo, "a.txt", "a\n", "a work").unwrap();
        gateway.create_branch("b", "HEAD").unwrap();
        gateway.checkout("b").unwrap();
        commit_file(&repo, "b.txt", "b\n", "b work").unwrap();

        let store = MetadataStore::new(&gateway);
        let mut a_meta = BranchMetadata::with_parent("main");
        a_meta.base_sha = Some(gateway.branch_sha("main").unwrap().to_string());
        store.write("a", &a_meta).unwrap();
        let mut b_meta = BranchMetadata::with_parent("a");
        b_meta.base_sha = Some(gateway.branch_sha("a").unwrap().to_string());
        store.write("b", &b_meta).unwrap();

        gateway.checkout("a").unwrap();
        (dir, repo)
    }

    #[test]
    fn test_restack_trunk_rejected() {
        let (dir, _repo) = setup_stack();
        let _ctx = TestRepoContext::new(dir.path());
        assert!(matches!(
            run(Some("main".to_string()), true, false, false),
            Err(Error::OnTrunk(_))
        ));
    }

    #[test]
    fn test_restack_upstack_after_amend() {
        let (dir, repo) = setup_stack();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::discover().unwrap();

        // Amend a: add a commit so b's base goes stale.
        commit_file(&repo, "a2.txt", "more\n", "a amended").unwrap();

        run(None, false, false, true).unwrap();

        let a_tip = gateway.branch_sha("a").unwrap();
        let b_tip = gateway.branch_sha("b").unwrap();
        assert_eq!(gateway.merge_base(&a_tip, &b_tip).unwrap(), a_tip);
    }

    #[test]
    fn test_restack_untracked_branch_rejected() {
        let (dir, _repo) = setup_stack();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::discover().unwrap();
        gateway.create_branch("loose", "HEAD").unwrap();

        assert!(matches!(
            run(Some("loose".to_string()), true, false, false),
            Err(Error::BranchNotTracked(_))
        ));
    }

    #[test]
    fn test_restack_auto_reparents_after_parent_merged() {
        let (dir, _repo) = setup_stack();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::discover().unwrap();

        // Merge a into main (fast-forward makes a's tip an ancestor of main).
        gateway.checkout("main").unwrap();
        gateway.run_git_ok(&["merge", "--no-ff", "a"]).unwrap();
        gateway.checkout("b").unwrap();

        run(None, true, false, false).unwrap();

        let engine = Engine::open().unwrap();
        assert_eq!(engine.graph.parent("b"), Some("main"));
        let main_tip = gateway.branch_sha("main").unwrap();
        let b_tip = gateway.branch_sha("b").unwrap();
        assert_eq!(gateway.merge_base(&main_tip, &b_tip).unwrap(), main_tip);
    }
}
