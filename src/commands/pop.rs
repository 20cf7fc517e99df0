use colored::Colorize;

use crate::engine::Engine;
use crate::errors::{Error, Result};

/// Delete the current branch but keep its changes staged on the parent.
pub fn run() -> Result<()> {
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
    let patch = engine.gateway.diff_between(&base, &tip)?;

    engine.begin("pop", &[branch.clone()])?;

    engine.gateway.checkout(&parent)?;
    if !patch.trim().is_empty() {
        engine.gateway.apply_patch_to_index(&patch)?;
    }

    for child in engine.graph.children(&branch).to_vec() {
        engine.graph.set_parent(&child, &parent)?;
    }
    engine.graph.remove(&branch);
    engine.gateway.delete_branch(&branch)?;
    engine.commit()?;

    println!(
        "{} Popped {}; its changes are staged on {}",
        "✓".green().bold(),
        branch,
        parent.blue()
    );
    Ok(())
}
