use std::collections::BTreeMap;

use colored::Colorize;
use dialoguer::Confirm;

use crate::context::ExecutionContext;
use crate::engine::merge::{compute_plan, BranchStatus, MergePlan, MergeStrategy, PlanStep};
use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::forge::{detect_forge, prs_for_branches, Forge, MergeMethod, DEFAULT_REMOTE};
use crate::state::OperationKind;

/// Merge the stack from trunk up to the current branch (or a named scope).
pub async fn run(
    strategy: MergeStrategy,
    force: bool,
    yes: bool,
    scope_name: Option<String>,
    use_worktree: bool,
) -> Result<()> {
    let mut engine = Engine::open()?;

    // The stack to merge, bottom-up.
    let stack: Vec<String> = match &scope_name {
        Some(scope) => {
            let mut tagged: Vec<String> = engine
                .graph
                .tracked_branches()
                .into_iter()
                .filter(|b| {
                    engine
                        .graph
                        .effective_scope(b)
                        .ok()
                        .flatten()
                        .as_deref()
                        == Some(scope.as_str())
                })
                .collect();
            tagged = engine.graph.topological_order(&tagged);
            tagged
        }
        None => {
            let current = engine.require_current_stack_branch()?;
            let mut chain = engine.graph.ancestors(&current)?;
            chain.reverse();
            chain.push(current);
            chain
        }
    };
    if stack.is_empty() {
        return Err(Error::Other(anyhow::anyhow!("nothing to merge")));
    }

    // Branches above the stack that survive the merge.
    let mut upstack: Vec<String> = Vec::new();
    if let Some(top) = stack.last() {
        upstack.extend(engine.graph.descendants(top));
    }

    let forge = detect_forge(&engine.gateway, &engine.config)?;
    let prs = prs_for_branches(forge.as_ref(), &stack).await;

    let mut statuses = BTreeMap::new();
    for branch in &stack {
        statuses.insert(
            branch.clone(),
            BranchStatus {
                local_tip: engine.gateway.branch_sha(branch)?.to_string(),
                pr: prs.get(branch).cloned().flatten(),
            },
        );
    }

    let (plan, validation) = compute_plan(
        engine.graph.trunk(),
        &stack,
        &upstack,
        &statuses,
        strategy,
        force,
    );

    for info in &validation.infos {
        println!("{} {}", "ℹ".blue(), info);
    }
    for warning in &validation.warnings {
        println!("{} {}", "!".yellow().bold(), warning);
    }
    if !validation.valid() {
        return Err(Error::ValidationFailed {
            errors: validation.errors,
            warnings: validation.warnings,
        });
    }
    if !validation.warnings.is_empty() && !force {
        return Err(Error::ValidationFailed {
            errors: vec!["warnings present; re-run with --force to proceed".to_string()],
            warnings: validation.warnings,
        });
    }

    print_plan(&plan);
    if ExecutionContext::is_dry_run() {
        println!("{} No changes made (dry-run mode)", "✓".green().bold());
        return Ok(());
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Execute this merge plan?")
            .default(false)
            .interact()
            .map_err(|_| {
                Error::Other(anyhow::anyhow!(
                    "confirmation unavailable; re-run with --yes in non-interactive mode"
                ))
            })?;
        if !confirmed {
            return Err(Error::Other(anyhow::anyhow!("aborted")));
        }
    }

    engine.begin("merge", &stack)?;
    execute_plan(&mut engine, forge.as_ref(), &plan, use_worktree).await
}

fn print_plan(plan: &MergePlan) {
    println!("{} Merge plan ({:?}):", "→".blue(), plan.strategy);
    for step in &plan.steps {
        match step {
            PlanStep::MergePr { branch, number } => {
                println!("  • merge PR #{} ({})", number, branch.green());
            }
            PlanStep::RetargetPr { branch, number, new_base } => {
                println!(
                    "  • retarget PR #{} ({}) onto {}",
                    number,
                    branch.green(),
                    new_base.blue()
                );
            }
            PlanStep::SquashIntoTarget { branches, target, close_prs } => {
                println!(
                    "  • squash {} into {} (closing PRs {})",
                    branches.join(", "),
                    target.green(),
                    close_prs
                        .iter()
                        .map(|n| format!("#{}", n))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            PlanStep::RestackUpstack { branches } => {
                println!("  • restack upstack: {}", branches.join(", "));
            }
        }
    }
}

async fn execute_plan(
    engine: &mut Engine,
    forge: &dyn Forge,
    plan: &MergePlan,
    use_worktree: bool,
) -> Result<()> {
    let mut merged_branches: Vec<String> = Vec::new();

    for step in &plan.steps {
        match step {
            PlanStep::MergePr { branch, number } => {
                print!("{} Merging PR #{} ({})... ", "→".blue(), number, branch.green());
                forge.merge_pr(*number, MergeMethod::Squash).await?;
                println!("{}", "✓".green());
                merged_branches.push(branch.clone());
            }
            PlanStep::RetargetPr { number, new_base, .. } => {
                forge.update_pr_base(*number, new_base).await?;
            }
            PlanStep::SquashIntoTarget { branches, target, close_prs } => {
                squash_stack_into_target(engine, branches, target)?;
                engine.gateway.push_branch(DEFAULT_REMOTE, target, true)?;
                forge
                    .update_pr_base(
                        pr_number_of(engine, target)?,
                        engine.graph.trunk(),
                    )
                    .await?;
                for number in close_prs {
                    forge.close_pr(*number).await?;
                }
                merged_branches.extend(branches.iter().filter(|b| b != &target).cloned());
            }
            PlanStep::RestackUpstack { .. } => {
                // Handled after the forge steps so local cleanup happens once.
            }
        }
    }

    // Local cleanup: refresh trunk, drop merged branches, restack survivors.
    if engine.gateway.has_remote(DEFAULT_REMOTE) {
        engine.gateway.fetch(DEFAULT_REMOTE)?;
        fast_forward_trunk(engine)?;
    }

    let trunk = engine.graph.trunk().to_string();
    for branch in &merged_branches {
        if engine.gateway.current_branch()?.as_deref() == Some(branch.as_str()) {
            engine.gateway.checkout(&trunk)?;
        }
        for child in engine.graph.children(branch).to_vec() {
            engine.graph.set_parent(&child, &trunk)?;
        }
        engine.graph.remove(branch);
        if engine.gateway.branch_exists(branch)? {
            engine.gateway.delete_branch(branch)?;
        }
        println!("{} Cleaned up merged branch {}", "✓".green(), branch);
    }
    engine.commit()?;

    if !plan.upstack_branches.is_empty() {
        let branches = engine.graph.topological_order(&plan.upstack_branches);
        if use_worktree {
            restack_in_worktree(engine, &branches)?;
        } else {
            restack::execute(
                engine,
                branches,
                OperationKind::Merge,
                serde_json::Value::Null,
            )?;
        }
    }

    println!();
    println!("{} Merge complete!", "✓".green().bold());
    Ok(())
}

fn pr_number_of(engine: &Engine, branch: &str) -> Result<u64> {
    engine
        .graph
        .metadata(branch)
        .and_then(|m| m.pr.as_ref())
        .map(|pr| pr.number)
        .ok_or_else(|| Error::Forge(format!("no PR recorded for '{}'", branch)))
}

/// Rewrite the topmost branch so it carries the whole stack's tree as one
/// lineage ending at its tip; intermediate branches stay local-only.
fn squash_stack_into_target(engine: &mut Engine, branches: &[String], target: &str) -> Result<()> {
    // The target already contains every lower branch's commits, so
    // squashing is a metadata-level retarget.
    let trunk = engine.graph.trunk().to_string();
    engine.graph.set_parent(target, &trunk)?;
    let trunk_tip = engine.gateway.branch_sha(&trunk)?;
    engine.graph.set_base_sha(target, trunk_tip.to_string());
    for branch in branches {
        if branch != target {
            println!("  {} folded {} into {}", "✓".green(), branch, target.green());
        }
    }
    Ok(())
}

/// Fast-forward local trunk to its remote counterpart if it is strictly
/// behind.
fn fast_forward_trunk(engine: &Engine) -> Result<()> {
    let trunk = engine.graph.trunk();
    let remote_ref = format!("refs/remotes/{}/{}", DEFAULT_REMOTE, trunk);
    let Some(remote_tip) = engine.gateway.find_reference(&remote_ref)? else {
        return Ok(());
    };
    let local_tip = engine.gateway.branch_sha(trunk)?;
    if engine.gateway.is_ancestor(&local_tip, &remote_tip)? && local_tip != remote_tip {
        if engine.gateway.current_branch()?.as_deref() == Some(trunk) {
            engine.gateway.run_git_ok(&["merge", "--ff-only", remote_ref.as_str()])?;
        } else {
            engine.gateway.reset_branch(trunk, &remote_tip)?;
        }
        println!(
            "{} Fast-forwarded {} to {}",
            "✓".green(),
            trunk.green(),
            remote_tip.short()
        );
    }
    Ok(())
}

/// Restack upstack branches while leaving the user's checkout untouched, by
/// working through a temporary linked worktree.
fn restack_in_worktree(engine: &mut Engine, branches: &[String]) -> Result<()> {
    let current = engine.gateway.current_branch()?;
    if let Some(current) = &current {
        if branches.contains(current) {
            return Err(Error::Other(anyhow::anyhow!(
                "--worktree cannot restack the checked-out branch '{}'; check out another branch first",
                current
            )));
        }
    }

    let wt_path = engine
        .gateway
        .git_dir()
        .join(format!(".stackit_worktree-{}", std::process::id()));
    let trunk = engine.graph.trunk().to_string();
    let handle = engine.gateway.create_worktree(&wt_path, &trunk)?;

    let result = (|| -> Result<()> {
        let wt_gateway = crate::git_gateway::GitGateway::from_path(&handle.path)?;
        for branch in branches {
            let Some(parent) = engine.graph.parent(branch).map(|s| s.to_string()) else {
                continue;
            };
            let parent_tip = wt_gateway.branch_sha(&parent)?;
            if !restack::needs_restack(engine, branch)? {
                continue;
            }
            let upstream = engine
                .graph
                .metadata(branch)
                .and_then(|m| m.base_sha.as_deref())
                .map(crate::git_gateway::Oid::parse)
                .transpose()?
                .unwrap_or(wt_gateway.merge_base(&parent_tip, &wt_gateway.branch_sha(branch)?)?);
            let outcome = wt_gateway.rebase_onto(&parent_tip, &upstream, branch)?;
            if outcome.has_conflicts() {
                wt_gateway.rebase_abort()?;
                return Err(Error::Other(anyhow::anyhow!(
                    "'{}' conflicts when restacked onto '{}'; run 'stackit restack' in the main worktree",
                    branch,
                    parent
                )));
            }
            engine.graph.set_base_sha(branch, parent_tip.to_string());
        }
        engine.commit()
    })();

    let _ = engine.gateway.remove_worktree(&handle);
    result
}
