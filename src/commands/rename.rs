use colored::Colorize;

use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::naming::sanitize_branch_name;

/// Rename the current branch, fixing up children's parent pointers.
pub fn run(name: String, force: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    let branch = engine.require_current_stack_branch()?;

    let new_name = sanitize_branch_name(&name);
    if new_name.is_empty() {
        return Err(Error::Other(anyhow::anyhow!(
            "'{}' is not a usable branch name",
            name
        )));
    }
    if engine.gateway.branch_exists(&new_name)? {
        return Err(Error::BranchAlreadyExists(new_name));
    }

    let has_pr = engine
        .graph
        .metadata(&branch)
        .and_then(|m| m.pr.as_ref())
        .is_some();
    if has_pr && !force {
        return Err(Error::Other(anyhow::anyhow!(
            "'{}' has an open PR; renaming would orphan it. Use --force to rename anyway.",
            branch
        )));
    }

    engine.begin("rename", &[branch.clone(), new_name.clone()])?;

    engine.gateway.rename_branch(&branch, &new_name)?;

    let meta = engine
        .graph
        .metadata(&branch)
        .cloned()
        .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
    engine.graph.insert(&new_name, meta)?;
    for child in engine.graph.children(&branch).to_vec() {
        engine.graph.set_parent(&child, &new_name)?;
    }
    engine.graph.remove(&branch);
    engine.commit()?;

    println!(
        "{} Renamed {} to {}",
        "✓".green().bold(),
        branch,
        new_name.green()
    );
    Ok(())
}
