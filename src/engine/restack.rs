//! The rebase engine.
//!
//! Restacks a set of branches in topological order (parents strictly before
//! children), scoping every rebase with the recorded base:
//! `git rebase --onto <parent-tip> <base_sha> <branch>`. A branch's
//! `base_sha` is updated only after the branch itself has been rebased, so
//! "base_sha equals the sha the branch was last restacked onto" survives
//! crashes and conflict pauses.
//!
//! On conflict the engine persists continuation state and surfaces
//! `RebaseConflict`; completed branches are never reverted. `continue` and
//! `abort` drive the persisted state.

use colored::Colorize;

use crate::errors::{Error, Result};
use crate::git_gateway::Oid;
use crate::metadata::MetadataStore;
use crate::state::{ContinuationState, OperationKind};

use super::Engine;

/// Whether a branch needs restacking: its parent's tip is not its merge base,
/// or the recorded base has fallen behind the parent's tip.
pub fn needs_restack(engine: &Engine, branch: &str) -> Result<bool> {
    let Some(parent) = engine.graph.parent(branch) else {
        return Ok(false);
    };
    let parent_tip = engine.gateway.branch_sha(parent)?;
    let tip = engine.gateway.branch_sha(branch)?;

    let merge_base = engine.gateway.merge_base(&parent_tip, &tip)?;
    if merge_base != parent_tip {
        return Ok(true);
    }
    let base_current = engine
        .graph
        .metadata(branch)
        .and_then(|m| m.base_sha.as_deref())
        == Some(parent_tip.as_str());
    Ok(!base_current)
}

/// The upstream bound for a branch's rebase: the recorded base, or the merge
/// base with the parent when no base was ever recorded.
fn rebase_upstream(engine: &Engine, branch: &str, parent_tip: &Oid) -> Result<Oid> {
    if let Some(base) = engine
        .graph
        .metadata(branch)
        .and_then(|m| m.base_sha.as_deref())
    {
        if let Ok(oid) = Oid::parse(base) {
            return Ok(oid);
        }
    }
    let tip = engine.gateway.branch_sha(branch)?;
    engine.gateway.merge_base(parent_tip, &tip)
}

/// Record `merge_base(parent_tip, tip)` as the base of every listed branch
/// that has none. Run before history is rewritten, while the merge base still
/// reflects reality.
pub fn normalize_base_shas(engine: &mut Engine, branches: &[String]) -> Result<()> {
    for branch in branches {
        let has_base = engine
            .graph
            .metadata(branch)
            .map(|m| m.base_sha.is_some())
            .unwrap_or(true);
        if has_base {
            continue;
        }
        let Some(parent) = engine.graph.parent(branch).map(|s| s.to_string()) else {
            continue;
        };
        let parent_tip = engine.gateway.branch_sha(&parent)?;
        let tip = engine.gateway.branch_sha(branch)?;
        let base = engine.gateway.merge_base(&parent_tip, &tip)?;
        engine.graph.set_base_sha(branch, base.to_string());
    }
    Ok(())
}

/// Restack `branches` (already in topological order). Persists continuation
/// state before the first rebase so a crash at any point is recoverable.
pub fn execute(
    engine: &mut Engine,
    branches: Vec<String>,
    kind: OperationKind,
    command_args: serde_json::Value,
) -> Result<()> {
    if branches.is_empty() {
        println!("{} No branches to restack", "✓".green().bold());
        return Ok(());
    }

    for branch in &branches {
        if !engine.gateway.branch_exists(branch)? {
            return Err(Error::Other(anyhow::anyhow!(
                "Cannot restack: branch '{}' is tracked but doesn't exist in git.\n\
                 Run 'stackit doctor --fix' to clean up metadata.",
                branch
            )));
        }
    }

    let original_branch = engine.gateway.require_current_branch()?;
    let mut state = ContinuationState::new(kind, original_branch, branches);
    state.command_args = command_args;
    state.save(engine.gateway.git_dir())?;

    run_loop(engine, &mut state)
}

/// Drive the restack loop from (possibly resumed) continuation state.
pub fn run_loop(engine: &mut Engine, state: &mut ContinuationState) -> Result<()> {
    let total = state.completed_branches.len() + state.remaining_branches.len();
    let mut completed = state.completed_branches.len();

    while !state.remaining_branches.is_empty() {
        let branch = state.remaining_branches.remove(0);

        let Some(parent) = engine.graph.parent(&branch).map(|s| s.to_string()) else {
            // Reconciliation guarantees a parent for tracked branches; a
            // branch that lost its metadata mid-operation is skipped.
            completed += 1;
            state.completed_branches.push(branch);
            continue;
        };
        let parent_tip = engine.gateway.branch_sha(&parent)?;

        if !needs_restack(engine, &branch)? {
            println!(
                "{} [{}/{}] {} does not need to be restacked",
                "✓".green(),
                completed + 1,
                total,
                branch
            );
            completed += 1;
            state.completed_branches.push(branch);
            continue;
        }

        let upstream = rebase_upstream(engine, &branch, &parent_tip)?;

        println!(
            "{} [{}/{}] Restacking {} on {}...",
            "→".blue(),
            completed + 1,
            total,
            branch.green(),
            parent.blue()
        );

        // Checkpoint before the rebase so a crash resumes here.
        state.current_branch_override = Some(branch.clone());
        state.rebased_branch_base = Some(parent_tip.to_string());
        state.save(engine.gateway.git_dir())?;

        let outcome = match engine.gateway.rebase_onto(&parent_tip, &upstream, &branch) {
            Ok(outcome) => outcome,
            Err(fatal) => {
                // A fatal failure (not a conflict) aborts any half-started
                // rebase and propagates; the continuation stays for `abort`.
                if engine.gateway.rebase_in_progress()? {
                    let _ = engine.gateway.rebase_abort();
                }
                return Err(fatal);
            }
        };

        if outcome.has_conflicts() {
            state.save(engine.gateway.git_dir())?;
            display_conflict_help(&branch, &parent, &state.remaining_branches);
            return Err(Error::RebaseConflict { branch });
        }

        finish_branch(engine, state, &branch, &parent_tip)?;
        completed += 1;
    }

    finish_operation(engine, state)
}

/// Record a successfully restacked branch: base_sha update persisted
/// immediately, before any later branch can pause the batch.
fn finish_branch(
    engine: &mut Engine,
    state: &mut ContinuationState,
    branch: &str,
    new_base: &Oid,
) -> Result<()> {
    engine.graph.set_base_sha(branch, new_base.to_string());
    if let Some(meta) = engine.graph.metadata(branch) {
        MetadataStore::new(&engine.gateway).write(branch, meta)?;
    }
    state.current_branch_override = None;
    state.rebased_branch_base = None;
    state.completed_branches.push(branch.to_string());
    state.save(engine.gateway.git_dir())?;
    Ok(())
}

fn finish_operation(engine: &mut Engine, state: &ContinuationState) -> Result<()> {
    ContinuationState::clear(engine.gateway.git_dir())?;
    engine.commit()?;

    // Return to where the user was; if that branch is gone, the nearest
    // surviving tracked ancestor, then trunk.
    let mut fallbacks = engine
        .graph
        .ancestors(&state.original_branch)
        .unwrap_or_default();
    fallbacks.push(engine.graph.trunk().to_string());
    engine
        .gateway
        .checkout_or_fallback(&state.original_branch, &fallbacks)?;

    println!();
    println!("{} Restack complete!", "✓".green().bold());
    Ok(())
}

fn display_conflict_help(branch: &str, onto: &str, remaining: &[String]) {
    println!();
    println!(
        "{} Conflicts while rebasing {} onto {}",
        "✗".red().bold(),
        branch.yellow(),
        onto.blue()
    );
    if !remaining.is_empty() {
        println!("  {} branch(es) still queued after this one", remaining.len());
    }
    println!();
    println!("Resolve the conflicts, then:");
    println!("  git add <resolved files>");
    println!("  stackit continue");
    println!();
    println!("Or cancel with: stackit abort");
}

/// `continue` entry point: finish the paused git rebase, then resume the
/// stored plan.
pub fn continue_op(engine: &mut Engine) -> Result<()> {
    let Some(mut state) = ContinuationState::load(engine.gateway.git_dir())? else {
        return Err(Error::NoRebaseInProgress("continue".to_string()));
    };

    verify_state_matches(engine, &state)?;

    if engine.gateway.rebase_in_progress()? {
        let outcome = engine.gateway.rebase_continue()?;
        if outcome.has_conflicts() {
            let branch = state
                .current_branch_override
                .clone()
                .unwrap_or_else(|| "current branch".to_string());
            println!(
                "{} Still conflicted. Resolve remaining conflicts and re-run 'stackit continue'.",
                "✗".red().bold()
            );
            return Err(Error::RebaseConflict { branch });
        }
        if let Some(branch) = state.current_branch_override.clone() {
            println!("{} Resolved conflicts in {}", "✓".green(), branch);
            match state.rebased_branch_base.as_deref() {
                // A restack pause records the parent tip the branch was being
                // rebased onto; that tip becomes the branch's new base.
                Some(base) => {
                    let base = Oid::parse(base)?;
                    finish_branch(engine, &mut state, &branch, &base)?;
                }
                // An absorb graft pause rebases within the branch; its
                // parent relation (and base_sha) are untouched.
                None => {
                    state.current_branch_override = None;
                    state.save(engine.gateway.git_dir())?;
                }
            }
        }
    }

    match state.kind {
        OperationKind::Restack | OperationKind::Sync | OperationKind::Merge => {
            run_loop(engine, &mut state)
        }
        OperationKind::Absorb => {
            run_loop(engine, &mut state)?;
            super::absorb::reapply_leftover(engine, &state)
        }
    }
}

/// `abort` entry point: abort the paused git rebase, clear the continuation,
/// land on the branch the pause happened on.
pub fn abort_op(engine: &mut Engine) -> Result<()> {
    let Some(state) = ContinuationState::load(engine.gateway.git_dir())? else {
        return Err(Error::NoRebaseInProgress("abort".to_string()));
    };

    if engine.gateway.rebase_in_progress()? {
        engine.gateway.rebase_abort()?;
    }
    ContinuationState::clear(engine.gateway.git_dir())?;

    let landing = state
        .current_branch_override
        .unwrap_or(state.original_branch);
    let fallbacks = vec![engine.graph.trunk().to_string()];
    engine.gateway.checkout_or_fallback(&landing, &fallbacks)?;

    println!(
        "{} Aborted {}. Completed branches were not reverted; use 'stackit undo' to roll back.",
        "✓".green(),
        state.kind
    );
    Ok(())
}

fn verify_state_matches(engine: &Engine, state: &ContinuationState) -> Result<()> {
    for branch in &state.remaining_branches {
        if !engine.gateway.branch_exists(branch)? {
            return Err(Error::Other(anyhow::anyhow!(
                "Branch '{}' no longer exists.\nRun 'stackit abort' to cancel the operation.",
                branch
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metadata::{BranchMetadata, MetadataStore};
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: git2::Repository,
    }

    /// main -> a -> b, each with one commit.
    fn linear_stack() -> (Fixture, Engine) {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let gateway = crate::git_gateway::GitGateway::from_path(dir.path()).unwrap();
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
        drop(gateway);
        let engine = {
            let _ctx = TestRepoContext::new(dir.path());
            Engine::open().unwrap()
        };
        (Fixture { _dir: dir, repo }, engine)
    }

    /// Amend branch `a` by committing to it (tip moves, children stale).
    fn advance_branch(fx: &Fixture, engine: &Engine, branch: &str, file: &str) {
        engine.gateway.checkout(branch).unwrap();
        commit_file(&fx.repo, file, "amended\n", &format!("{} amended", branch)).unwrap();
    }

    #[test]
    fn test_needs_restack_false_when_aligned() {
        let (_fx, engine) = linear_stack();
        assert!(!needs_restack(&engine, "a").unwrap());
        assert!(!needs_restack(&engine, "b").unwrap());
    }

    #[test]
    fn test_needs_restack_after_parent_advances() {
        let (fx, engine) = linear_stack();
        advance_branch(&fx, &engine, "a", "extra.txt");
        assert!(needs_restack(&engine, "b").unwrap());
    }

    #[test]
    fn test_restack_upstack_realigns_children() {
        let (fx, mut engine) = linear_stack();
        advance_branch(&fx, &engine, "a", "extra.txt");
        engine.gateway.checkout("a").unwrap();

        execute(
            &mut engine,
            vec!["b".to_string()],
            OperationKind::Restack,
            serde_json::Value::Null,
        )
        .unwrap();

        let a_tip = engine.gateway.branch_sha("a").unwrap();
        let b_tip = engine.gateway.branch_sha("b").unwrap();
        assert_eq!(engine.gateway.merge_base(&a_tip, &b_tip).unwrap(), a_tip);

        // base_sha is observed only after the child itself was rebased.
        let store = MetadataStore::new(&engine.gateway);
        let b_meta = store.read("b").unwrap().unwrap();
        assert_eq!(b_meta.base_sha.as_deref(), Some(a_tip.as_str()));

        // Continuation cleared, back on the original branch.
        assert!(!ContinuationState::exists(engine.gateway.git_dir()));
        assert_eq!(
            engine.gateway.current_branch().unwrap().as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_restack_idempotent_when_aligned() {
        let (_fx, mut engine) = linear_stack();
        engine.gateway.checkout("a").unwrap();
        let b_before = engine.gateway.branch_sha("b").unwrap();

        execute(
            &mut engine,
            vec!["a".to_string(), "b".to_string()],
            OperationKind::Restack,
            serde_json::Value::Null,
        )
        .unwrap();

        assert_eq!(engine.gateway.branch_sha("b").unwrap(), b_before);
    }

    #[test]
    fn test_conflict_persists_continuation_and_pauses() {
        let (fx, mut engine) = linear_stack();

        // Both a and b edit the same line of the same file.
        engine.gateway.checkout("a").unwrap();
        commit_file(&fx.repo, "clash.txt", "from a\n", "a clash").unwrap();
        engine.gateway.checkout("b").unwrap();
        commit_file(&fx.repo, "clash.txt", "from b\n", "b clash").unwrap();
        engine.gateway.checkout("a").unwrap();

        let result = execute(
            &mut engine,
            vec!["b".to_string()],
            OperationKind::Restack,
            serde_json::Value::Null,
        );
        match result {
            Err(Error::RebaseConflict { branch }) => assert_eq!(branch, "b"),
            other => panic!("expected RebaseConflict, got {:?}", other.err()),
        }

        let state = ContinuationState::load(engine.gateway.git_dir())
            .unwrap()
            .unwrap();
        assert_eq!(state.kind, OperationKind::Restack);
        assert!(state.remaining_branches.is_empty());
        assert_eq!(state.current_branch_override.as_deref(), Some("b"));
        assert!(engine.gateway.rebase_in_progress().unwrap());

        // Resolve in b's favor and continue.
        std::fs::write(fx._dir.path().join("clash.txt"), "from b\n").unwrap();
        engine.gateway.stage_all().unwrap();
        continue_op(&mut engine).unwrap();

        assert!(!ContinuationState::exists(engine.gateway.git_dir()));
        let a_tip = engine.gateway.branch_sha("a").unwrap();
        let b_meta = MetadataStore::new(&engine.gateway)
            .read("b")
            .unwrap()
            .unwrap();
        assert_eq!(b_meta.base_sha.as_deref(), Some(a_tip.as_str()));
    }

    #[test]
    fn test_abort_clears_state_and_git_pause() {
        let (fx, mut engine) = linear_stack();
        engine.gateway.checkout("a").unwrap();
        commit_file(&fx.repo, "clash.txt", "from a\n", "a clash").unwrap();
        engine.gateway.checkout("b").unwrap();
        commit_file(&fx.repo, "clash.txt", "from b\n", "b clash").unwrap();
        engine.gateway.checkout("a").unwrap();

        let _ = execute(
            &mut engine,
            vec!["b".to_string()],
            OperationKind::Restack,
            serde_json::Value::Null,
        );
        assert!(engine.gateway.rebase_in_progress().unwrap());

        abort_op(&mut engine).unwrap();
        assert!(!engine.gateway.rebase_in_progress().unwrap());
        assert!(!ContinuationState::exists(engine.gateway.git_dir()));
    }

    #[test]
    fn test_continue_without_state_fails() {
        let (_fx, mut engine) = linear_stack();
        assert!(matches!(
            continue_op(&mut engine),
            Err(Error::NoRebaseInProgress(_))
        ));
        assert!(matches!(
            abort_op(&mut engine),
            Err(Error::NoRebaseInProgress(_))
        ));
    }
}
