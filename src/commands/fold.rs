use colored::Colorize;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::state::OperationKind;

/// Fold the current branch's commits into its parent, deleting the branch.
/// Children (the parent's new grandchildren) are restacked onto the combined
/// tip. With `--keep`, the combined branch keeps the current branch's name.
pub fn run(keep: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;
    let branch = engine.require_current_stack_branch()?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
    if engine.graph.is_trunk(&parent) {
        return Err(Error::OnTrunk(parent));
    }

    // The branch must sit on its parent's tip so the fold is a pure
    // fast-forward of the parent.
    if restack::needs_restack(&engine, &branch)? {
        return Err(Error::Other(anyhow::anyhow!(
            "'{}' is not restacked on '{}'; run 'stackit restack --only' first",
            branch,
            parent
        )));
    }

    engine.begin("fold", &[branch.clone()])?;

    let tip = engine.gateway.branch_sha(&branch)?;
    let survivor = if keep { branch.clone() } else { parent.clone() };

    if keep {
        // The current branch absorbs the parent: it inherits the parent's
        // parent and the parent's other children.
        let grandparent = engine
            .graph
            .parent(&parent)
            .map(|s| s.to_string())
            .unwrap_or_else(|| engine.graph.trunk().to_string());
        let parent_base = engine.graph.metadata(&parent).and_then(|m| m.base_sha.clone());

        for sibling in engine.graph.children(&parent).to_vec() {
            if sibling != branch {
                engine.graph.set_parent(&sibling, &branch)?;
            }
        }
        engine.graph.set_parent(&branch, &grandparent)?;
        if let Some(base) = parent_base {
            engine.graph.set_base_sha(&branch, base);
        }
        engine.graph.remove(&parent);
        engine.gateway.delete_branch(&parent)?;
    } else {
        engine.gateway.checkout(&parent)?;
        engine.gateway.reset_branch(&parent, &tip)?;
        engine.gateway.reset_hard_head()?;

        for child in engine.graph.children(&branch).to_vec() {
            engine.graph.set_parent(&child, &parent)?;
            // The children already sit on the folded tip; their base is it.
            engine.graph.set_base_sha(&child, tip.to_string());
        }
        engine.graph.remove(&branch);
        engine.gateway.delete_branch(&branch)?;
    }
    engine.commit()?;

    println!(
        "{} Folded {} into {}",
        "✓".green().bold(),
        branch.green(),
        survivor.blue()
    );

    // Restack the survivor's subtree so every grandchild lands on the
    // combined tip.
    let descendants = engine.graph.descendants(&survivor);
    restack::execute(
        &mut engine,
        descendants,
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}
