use colored::Colorize;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::state::OperationKind;

/// Delete a branch. Children are reparented to the deleted branch's parent
/// and restacked. Unmerged branches require `--force`.
pub fn run(name: Option<String>, force: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;

    let branch = match name {
        Some(n) => n,
        None => engine.gateway.require_current_branch()?,
    };
    if engine.graph.is_trunk(&branch) {
        return Err(Error::OnTrunk(branch));
    }
    if !engine.gateway.branch_exists(&branch)? {
        return Err(Error::RefNotFound(branch));
    }

    let trunk = engine.graph.trunk_of(&branch).unwrap_or_else(|_| engine.graph.trunk().to_string());
    let tip = engine.gateway.branch_sha(&branch)?;
    let trunk_tip = engine.gateway.branch_sha(&trunk)?;
    let merged = engine.gateway.is_ancestor(&tip, &trunk_tip)?;
    if !merged && !force {
        return Err(Error::Other(anyhow::anyhow!(
            "'{}' is not merged into '{}'. Use --force to delete anyway.",
            branch,
            trunk
        )));
    }

    engine.begin("delete", &[branch.clone()])?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .unwrap_or_else(|| trunk.clone());

    // Step off the branch before deleting it.
    if engine.gateway.current_branch()?.as_deref() == Some(branch.as_str()) {
        engine.gateway.checkout(&parent)?;
    }

    let children = engine.graph.children(&branch).to_vec();
    for child in &children {
        engine.graph.set_parent(child, &parent)?;
    }
    engine.graph.remove(&branch);
    engine.gateway.delete_branch(&branch)?;
    engine.commit()?;

    println!("{} Deleted {}", "✓".green().bold(), branch);

    if children.is_empty() {
        return Ok(());
    }
    let mut to_restack = Vec::new();
    for child in &children {
        to_restack.extend(engine.graph.relative_stack(child, crate::graph::ScopeSpec::UPSTACK)?);
    }
    let to_restack = engine.graph.topological_order(&to_restack);
    restack::execute(
        &mut engine,
        to_restack,
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}
