use colored::Colorize;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::graph::ScopeSpec;
use crate::state::OperationKind;

/// Collapse all commits of the current branch into one, then restack its
/// descendants.
pub fn run(message: Option<String>) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;
    let branch = engine.require_current_stack_branch()?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
    let parent_tip = engine.gateway.branch_sha(&parent)?;
    let tip = engine.gateway.branch_sha(&branch)?;
    let base = engine.gateway.merge_base(&parent_tip, &tip)?;

    let commits = engine.gateway.commits_between(&base, &tip)?;
    if commits.len() <= 1 {
        println!("{} {} already has a single commit", "ℹ".blue(), branch);
        return Ok(());
    }

    engine.begin("squash", &[branch.clone()])?;

    let message = match message {
        Some(m) => m,
        None => engine.gateway.commit_subject(&commits[0])?,
    };

    let squashed = engine.gateway.squash_commits(&tip, &base, &message)?;
    engine.gateway.reset_branch(&branch, &squashed)?;
    engine.gateway.reset_hard_head()?;

    println!(
        "{} Squashed {} commits on {} into {}",
        "✓".green().bold(),
        commits.len(),
        branch.green(),
        squashed.short().yellow()
    );

    // Descendants now hang off rewritten history.
    let mut children = engine.graph.relative_stack(&branch, ScopeSpec::UPSTACK)?;
    children.retain(|b| b != &branch);
    restack::execute(
        &mut engine,
        children,
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}
