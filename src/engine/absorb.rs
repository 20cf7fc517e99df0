//! The absorb engine.
//!
//! Attributes each staged hunk to the nearest ancestor commit that introduced
//! the lines it modifies, amends those commits preserving author identity and
//! message, then restacks everything above the oldest amended branch.
//!
//! Attribution is blame-driven: every pre-image line of a hunk is owned by
//! the commit that last modified it (`git blame HEAD`). A hunk is absorbable
//! iff all its owners lie inside the ancestor chain; the newest owner is the
//! target (the nearest ancestor that can accept the hunk deterministically).
//! A commutation probe (`git apply --check` against the target's tree)
//! confirms the amend will apply before anything is mutated.
//!
//! The staged diff is captured once, up front, and every later step works
//! from that capture, never from the evolving index.

use std::collections::{BTreeMap, HashMap};

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::git_gateway::diff::parse_patch;
use crate::git_gateway::Oid;
use crate::graph::ScopeSpec;
use crate::state::{ContinuationState, OperationKind};

use super::restack;
use super::Engine;

/// One hunk attributed to the commit that will absorb it.
#[derive(Debug, Clone)]
pub struct Attribution {
    pub file: String,
    pub hunk_header: String,
    pub target_commit: Oid,
    pub target_branch: String,
    pub target_summary: String,
    /// Minimal patch (file header + this hunk) used for the amend.
    patch: String,
    /// Position of the target in the chain history; higher = newer.
    chain_index: usize,
}

/// A hunk that no ancestor commit can accept.
#[derive(Debug, Clone)]
pub struct Unabsorbable {
    pub file: String,
    pub hunk_header: String,
    pub reason: String,
    patch: String,
}

/// The computed absorb plan.
pub struct AbsorbPlan {
    pub attributions: Vec<Attribution>,
    pub unabsorbable: Vec<Unabsorbable>,
    /// Chain branches, nearest first (current branch first).
    pub chain: Vec<String>,
}

/// Opaque continuation payload: the patch of hunks left un-absorbed, restored
/// to the index once the post-absorb restack completes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AbsorbArgs {
    leftover_patch: String,
}

/// Compute the absorb plan for the currently staged changes.
pub fn compute_plan(engine: &Engine) -> Result<AbsorbPlan> {
    if engine.gateway.rebase_in_progress()? {
        return Err(Error::RebaseInProgress {
            kind: "rebase".to_string(),
        });
    }
    let current = engine.require_current_stack_branch()?;

    // Ancestor chain, nearest first, trunk excluded.
    let mut chain = vec![current.clone()];
    chain.extend(engine.graph.ancestors(&current)?);

    // Chain history: commits of each branch beyond its parent, deepest branch
    // first, so indices increase from oldest to newest.
    let mut commit_branch: HashMap<Oid, String> = HashMap::new();
    let mut commit_index: HashMap<Oid, usize> = HashMap::new();
    let mut index = 0usize;
    for branch in chain.iter().rev() {
        let parent = engine
            .graph
            .parent(branch)
            .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
        let parent_tip = engine.gateway.branch_sha(parent)?;
        let tip = engine.gateway.branch_sha(branch)?;
        let base = engine.gateway.merge_base(&parent_tip, &tip)?;
        for commit in engine.gateway.commits_between(&base, &tip)? {
            commit_branch.insert(commit.clone(), branch.clone());
            commit_index.insert(commit, index);
            index += 1;
        }
    }

    let staged = engine.gateway.staged_diff()?;
    if staged.trim().is_empty() {
        return Ok(AbsorbPlan {
            attributions: Vec::new(),
            unabsorbable: Vec::new(),
            chain,
        });
    }

    let mut attributions = Vec::new();
    let mut unabsorbable = Vec::new();
    let mut blame_cache: HashMap<String, Vec<Oid>> = HashMap::new();

    for file in parse_patch(&staged) {
        if file.is_structural_change {
            for hunk in &file.hunks {
                unabsorbable.push(Unabsorbable {
                    file: file.path.clone(),
                    hunk_header: hunk.header.clone(),
                    reason: "new, deleted, renamed or binary file".to_string(),
                    patch: file.patch_for_hunks(&[hunk]),
                });
            }
            if file.hunks.is_empty() {
                unabsorbable.push(Unabsorbable {
                    file: file.path.clone(),
                    hunk_header: String::new(),
                    reason: "new, deleted, renamed or binary file".to_string(),
                    patch: file.patch_for_hunks(&[]),
                });
            }
            continue;
        }

        let blame = match blame_cache.get(&file.old_path) {
            Some(b) => b.clone(),
            None => {
                let b = engine.gateway.blame_lines(&file.old_path)?;
                blame_cache.insert(file.old_path.clone(), b.clone());
                b
            }
        };

        for hunk in &file.hunks {
            let patch = file.patch_for_hunks(&[hunk]);
            let lines = hunk.pre_image_lines();
            if lines.is_empty() {
                unabsorbable.push(Unabsorbable {
                    file: file.path.clone(),
                    hunk_header: hunk.header.clone(),
                    reason: "no pre-image lines to attribute".to_string(),
                    patch,
                });
                continue;
            }

            let mut owners = Vec::new();
            let mut out_of_range = false;
            for line in &lines {
                match blame.get(line - 1) {
                    Some(owner) => owners.push(owner.clone()),
                    None => out_of_range = true,
                }
            }
            if out_of_range {
                unabsorbable.push(Unabsorbable {
                    file: file.path.clone(),
                    hunk_header: hunk.header.clone(),
                    reason: "staged hunk does not match HEAD".to_string(),
                    patch,
                });
                continue;
            }

            // The newest owner is the nearest ancestor that can accept the
            // hunk; any owner outside the chain pins the lines to trunk
            // history we must not rewrite.
            let mut target: Option<(&Oid, usize)> = None;
            let mut foreign = false;
            for owner in &owners {
                match commit_index.get(owner) {
                    Some(&idx) => {
                        if target.map(|(_, best)| idx > best).unwrap_or(true) {
                            target = Some((owner, idx));
                        }
                    }
                    None => foreign = true,
                }
            }
            let (commit, chain_index) = match (foreign, target) {
                (false, Some(t)) => t,
                _ => {
                    unabsorbable.push(Unabsorbable {
                        file: file.path.clone(),
                        hunk_header: hunk.header.clone(),
                        reason: "touches lines owned by commits outside this stack".to_string(),
                        patch,
                    });
                    continue;
                }
            };

            if !engine.gateway.apply_check_on_commit(&patch, commit)? {
                unabsorbable.push(Unabsorbable {
                    file: file.path.clone(),
                    hunk_header: hunk.header.clone(),
                    reason: format!("does not apply cleanly onto {}", commit.short()),
                    patch,
                });
                continue;
            }

            attributions.push(Attribution {
                file: file.path.clone(),
                hunk_header: hunk.header.clone(),
                target_commit: commit.clone(),
                target_branch: commit_branch[commit].clone(),
                target_summary: engine.gateway.commit_subject(commit)?,
                patch,
                chain_index,
            });
        }
    }

    Ok(AbsorbPlan {
        attributions,
        unabsorbable,
        chain,
    })
}

/// Print the plan without mutating anything.
pub fn print_plan(plan: &AbsorbPlan) {
    if plan.attributions.is_empty() && plan.unabsorbable.is_empty() {
        println!("{} No staged changes to absorb.", "ℹ".blue());
        return;
    }
    if !plan.attributions.is_empty() {
        println!("{} Would absorb:", "→".blue());
        for a in &plan.attributions {
            println!(
                "  {} {} {} into {} ({}, {})",
                "↳".cyan(),
                a.file,
                a.hunk_header.dimmed(),
                a.target_commit.short().yellow(),
                a.target_summary,
                a.target_branch.green()
            );
        }
    }
    report_unabsorbable(&plan.unabsorbable);
}

fn report_unabsorbable(unabsorbable: &[Unabsorbable]) {
    if unabsorbable.is_empty() {
        return;
    }
    println!("{} Cannot absorb (left staged):", "!".yellow().bold());
    for u in unabsorbable {
        println!(
            "  {} {} {} ({})",
            "↳".cyan(),
            u.file,
            u.hunk_header.dimmed(),
            u.reason
        );
    }
}

/// Execute an absorb plan.
pub fn execute(engine: &mut Engine, plan: AbsorbPlan) -> Result<()> {
    if plan.attributions.is_empty() {
        print_plan(&plan);
        return Ok(());
    }
    if engine.gateway.has_unstaged_changes()? {
        return Err(Error::DirtyWorktree);
    }

    let leftover_patch: String = plan.unabsorbable.iter().map(|u| u.patch.as_str()).collect();

    // Record bases before history is rewritten; the restack below depends on
    // them to scope each rebase.
    let mut all_affected = plan.chain.clone();
    for branch in &plan.chain {
        all_affected.extend(engine.graph.descendants(branch));
    }
    all_affected.sort();
    all_affected.dedup();
    restack::normalize_base_shas(engine, &all_affected)?;
    // Persist the normalized bases before any history rewriting; a conflict
    // pause must find them on disk.
    engine.commit()?;

    // Group hunks per target commit, then amend newest-first so older
    // targets keep stable SHAs while newer history is rewritten above them.
    let mut groups: BTreeMap<usize, Vec<&Attribution>> = BTreeMap::new();
    for a in &plan.attributions {
        groups.entry(a.chain_index).or_default().push(a);
    }

    // The staged changes now live only in the captured patches; clear the
    // index and worktree so rebases run on a clean tree.
    engine.gateway.reset_hard_head()?;

    let ordered_groups: Vec<&Vec<&Attribution>> = groups.values().rev().collect();
    let mut oldest_amended_branch: Option<String> = None;
    for (i, group) in ordered_groups.iter().enumerate() {
        let target = &group[0].target_commit;
        let branch = &group[0].target_branch;
        let combined: String = group.iter().map(|a| a.patch.as_str()).collect();

        println!(
            "{} Absorbing {} hunk(s) into {} ({})",
            "→".blue(),
            group.len(),
            target.short().yellow(),
            branch.green()
        );

        let new_commit = engine.gateway.amend_commit_with_patch(target, &combined)?;
        let branch_tip = engine.gateway.branch_sha(branch)?;

        if &branch_tip == target {
            engine.gateway.reset_branch(branch, &new_commit)?;
        } else {
            // Graft the branch's remaining commits onto the amended one.
            let outcome = engine.gateway.rebase_onto(&new_commit, target, branch)?;
            if outcome.has_conflicts() {
                // Hunks of groups not yet amended must not be lost: they join
                // the leftover patch and return to the index after `continue`.
                let mut pending = leftover_patch.clone();
                for later in &ordered_groups[i + 1..] {
                    for a in later.iter() {
                        pending.push_str(&a.patch);
                    }
                }
                // Queue the upstack restack for after the graft completes.
                // `rebased_branch_base` stays empty: the graft's base is an
                // internal commit of the branch, not its parent's tip.
                let remaining = engine
                    .graph
                    .relative_stack(branch, ScopeSpec::UPSTACK)?
                    .into_iter()
                    .filter(|b| b != branch)
                    .collect();
                let mut state = ContinuationState::new(
                    OperationKind::Absorb,
                    plan.chain[0].clone(),
                    remaining,
                );
                state.current_branch_override = Some(branch.clone());
                state.command_args = serde_json::to_value(AbsorbArgs {
                    leftover_patch: pending,
                })?;
                state.save(engine.gateway.git_dir())?;
                return Err(Error::RebaseConflict {
                    branch: branch.clone(),
                });
            }
        }
        oldest_amended_branch = Some(branch.clone());
    }

    // Ref surgery may have moved the checked-out branch under the worktree;
    // resync, then return to the branch the user started on so the restack
    // records it as the branch to land back on.
    engine.gateway.reset_hard_head()?;
    engine.gateway.checkout(&plan.chain[0])?;

    // Restack everything above the oldest amended ancestor.
    let root = oldest_amended_branch.expect("attributions were non-empty");
    let mut to_restack = engine.graph.relative_stack(&root, ScopeSpec::UPSTACK)?;
    // The root itself was rewritten in place; restacking starts at its
    // children, but keeping it in the list is a cheap no-op guard.
    to_restack.retain(|b| engine.gateway.branch_exists(b).unwrap_or(false));

    let args = serde_json::to_value(AbsorbArgs {
        leftover_patch: leftover_patch.clone(),
    })?;
    restack::execute(engine, to_restack, OperationKind::Absorb, args)?;

    if !leftover_patch.is_empty() {
        engine.gateway.apply_patch_to_index(&leftover_patch)?;
    }
    report_unabsorbable(&plan.unabsorbable);
    println!("{} Absorb complete!", "✓".green().bold());
    Ok(())
}

/// After a continued absorb finishes its restack, put un-absorbed hunks back
/// into the index.
pub fn reapply_leftover(engine: &mut Engine, state: &ContinuationState) -> Result<()> {
    let args: AbsorbArgs =
        serde_json::from_value(state.command_args.clone()).unwrap_or_default();
    if !args.leftover_patch.is_empty() {
        engine.gateway.apply_patch_to_index(&args.leftover_patch)?;
        println!("{} Restored un-absorbed hunks to the index", "ℹ".blue());
    }
    println!("{} Absorb complete!", "✓".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metadata::{BranchMetadata, MetadataStore};
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    /// main -> A (adds fileA) -> B (adds fileB); B checked out.
    fn absorb_fixture() -> (tempfile::TempDir, git2::Repository, Engine) {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let gateway = crate::git_gateway::GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();

        gateway.create_branch("A", "HEAD").unwrap();
        gateway.checkout("A").unwrap();
        commit_file(&repo, "fileA.txt", "a1\na2\na3\n", "add fileA").unwrap();
        gateway.create_branch("B", "HEAD").unwrap();
        gateway.checkout("B").unwrap();
        commit_file(&repo, "fileB.txt", "b1\nb2\n", "add fileB").unwrap();

        let store = MetadataStore::new(&gateway);
        let mut a_meta = BranchMetadata::with_parent("main");
        a_meta.base_sha = Some(gateway.branch_sha("main").unwrap().to_string());
        store.write("A", &a_meta).unwrap();
        let mut b_meta = BranchMetadata::with_parent("A");
        b_meta.base_sha = Some(gateway.branch_sha("A").unwrap().to_string());
        store.write("B", &b_meta).unwrap();
        drop(gateway);

        let engine = {
            let _ctx = TestRepoContext::new(dir.path());
            Engine::open().unwrap()
        };
        (dir, repo, engine)
    }

    #[test]
    fn test_plan_attributes_hunks_to_introducing_commits() {
        let (dir, _repo, engine) = absorb_fixture();

        std::fs::write(dir.path().join("fileA.txt"), "a1 EDIT\na2\na3\n").unwrap();
        std::fs::write(dir.path().join("fileB.txt"), "b1\nb2 EDIT\n").unwrap();
        engine.gateway.stage_all().unwrap();

        let plan = compute_plan(&engine).unwrap();
        assert!(plan.unabsorbable.is_empty(), "{:?}", plan.unabsorbable);
        assert_eq!(plan.attributions.len(), 2);

        let by_file: BTreeMap<&str, &Attribution> = plan
            .attributions
            .iter()
            .map(|a| (a.file.as_str(), a))
            .collect();
        assert_eq!(by_file["fileA.txt"].target_branch, "A");
        assert_eq!(by_file["fileA.txt"].target_summary, "add fileA");
        assert_eq!(by_file["fileB.txt"].target_branch, "B");
    }

    #[test]
    fn test_plan_marks_trunk_owned_lines_unabsorbable() {
        let (dir, _repo, engine) = absorb_fixture();

        // README.md was created by the trunk's initial commit.
        std::fs::write(dir.path().join("README.md"), "# rewritten\n").unwrap();
        engine.gateway.stage_all().unwrap();

        let plan = compute_plan(&engine).unwrap();
        assert!(plan.attributions.is_empty());
        assert_eq!(plan.unabsorbable.len(), 1);
        assert!(plan.unabsorbable[0].reason.contains("outside this stack"));
    }

    #[test]
    fn test_plan_marks_new_files_unabsorbable() {
        let (dir, _repo, engine) = absorb_fixture();

        std::fs::write(dir.path().join("brand-new.txt"), "hello\n").unwrap();
        engine.gateway.stage_all().unwrap();

        let plan = compute_plan(&engine).unwrap();
        assert!(plan.attributions.is_empty());
        assert!(!plan.unabsorbable.is_empty());
    }

    #[test]
    fn test_execute_absorbs_into_ancestors_and_restacks() {
        let (dir, _repo, mut engine) = absorb_fixture();

        std::fs::write(dir.path().join("fileA.txt"), "a1 EDIT\na2\na3\n").unwrap();
        std::fs::write(dir.path().join("fileB.txt"), "b1\nb2 EDIT\n").unwrap();
        engine.gateway.stage_all().unwrap();

        let plan = compute_plan(&engine).unwrap();
        execute(&mut engine, plan).unwrap();

        // Staged diff fully consumed.
        assert!(!engine.gateway.has_staged_changes().unwrap());

        // A's tip now contains the fileA edit, authored as before.
        let a_tip = engine.gateway.branch_sha("A").unwrap();
        let a_meta = engine.gateway.commit_metadata(&a_tip).unwrap();
        assert_eq!(a_meta.summary, "add fileA");
        assert_eq!(a_meta.author_name, "Test User");

        // B restacked onto the new A, base recorded.
        let b_tip = engine.gateway.branch_sha("B").unwrap();
        assert_eq!(engine.gateway.merge_base(&a_tip, &b_tip).unwrap(), a_tip);
        let b_record = MetadataStore::new(&engine.gateway)
            .read("B")
            .unwrap()
            .unwrap();
        assert_eq!(b_record.base_sha.as_deref(), Some(a_tip.as_str()));

        // Worktree reflects both edits.
        let file_a = std::fs::read_to_string(dir.path().join("fileA.txt")).unwrap();
        assert!(file_a.contains("a1 EDIT"));
    }

    #[test]
    fn test_execute_leaves_unabsorbable_staged() {
        let (dir, _repo, mut engine) = absorb_fixture();

        std::fs::write(dir.path().join("fileA.txt"), "a1 EDIT\na2\na3\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# rewritten\n").unwrap();
        engine.gateway.stage_all().unwrap();

        let plan = compute_plan(&engine).unwrap();
        assert_eq!(plan.attributions.len(), 1);
        assert_eq!(plan.unabsorbable.len(), 1);
        execute(&mut engine, plan).unwrap();

        // The README hunk is back in the index; the fileA hunk was absorbed.
        let staged = engine.gateway.staged_diff().unwrap();
        assert!(staged.contains("README.md"));
        assert!(!staged.contains("fileA.txt"));
    }

    #[test]
    fn test_refuses_on_trunk() {
        let (_dir, _repo, engine) = absorb_fixture();
        engine.gateway.checkout("main").unwrap();
        assert!(matches!(
            compute_plan(&engine),
            Err(Error::OnTrunk(_)) | Err(Error::BranchNotTracked(_))
        ));
    }
}
