use colored::Colorize;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::forge::{detect_forge, prs_for_branches, DEFAULT_REMOTE};
use crate::metadata::PrState;
use crate::state::OperationKind;

/// Fetch trunk(s), prune branches merged on the forge, and optionally
/// restack every stack onto the refreshed trunk.
pub async fn run(all: bool, force: bool, do_restack: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;

    engine.begin("sync", &[])?;

    // Fetch and fast-forward trunks. Trunks without a remote are synced
    // against their local tip with a notice.
    let trunks: Vec<String> = if all {
        engine.config.trunks.clone()
    } else {
        vec![engine.config.trunk.clone()]
    };
    let has_remote = engine.gateway.has_remote(DEFAULT_REMOTE);
    if has_remote {
        println!("{} Fetching {}...", "→".blue(), DEFAULT_REMOTE);
        engine.gateway.fetch(DEFAULT_REMOTE)?;
    }
    for trunk in &trunks {
        if !has_remote {
            println!(
                "{} No '{}' remote; syncing {} against its local tip",
                "ℹ".blue(),
                DEFAULT_REMOTE,
                trunk
            );
            continue;
        }
        fast_forward(&engine, trunk, force)?;
    }

    // Prune branches whose PR merged (or whose tip is in trunk).
    let tracked = engine.graph.tracked_branches();
    let merged = find_merged_branches(&engine, &tracked).await?;
    let trunk = engine.graph.trunk().to_string();
    for branch in &merged {
        if engine.gateway.current_branch()?.as_deref() == Some(branch.as_str()) {
            engine.gateway.checkout(&trunk)?;
        }
        let parent = engine
            .graph
            .parent(branch)
            .map(|s| s.to_string())
            .unwrap_or_else(|| trunk.clone());
        for child in engine.graph.children(branch).to_vec() {
            engine.graph.set_parent(&child, &parent)?;
        }
        engine.graph.remove(branch);
        engine.gateway.delete_branch(branch)?;
        println!("{} Deleted merged branch {}", "✓".green(), branch);
    }

    // Reparent survivors whose parents vanished or merged.
    engine.reconcile()?;
    engine.commit()?;

    if !do_restack {
        println!("{} Sync complete (run with --restack to realign stacks)", "✓".green().bold());
        return Ok(());
    }

    let mut branches = engine.graph.tracked_branches();
    branches = engine.graph.topological_order(&branches);
    restack::execute(
        &mut engine,
        branches,
        OperationKind::Sync,
        serde_json::Value::Null,
    )
}

fn fast_forward(engine: &Engine, trunk: &str, force: bool) -> Result<()> {
    let remote_ref = format!("refs/remotes/{}/{}", DEFAULT_REMOTE, trunk);
    let Some(remote_tip) = engine.gateway.find_reference(&remote_ref)? else {
        println!("{} '{}' has no remote counterpart", "ℹ".blue(), trunk);
        return Ok(());
    };
    let local_tip = engine.gateway.branch_sha(trunk)?;
    if local_tip == remote_tip {
        return Ok(());
    }
    if !engine.gateway.is_ancestor(&local_tip, &remote_tip)? {
        if !force {
            return Err(Error::Other(anyhow::anyhow!(
                "local '{}' has diverged from {}/{}; use --force to keep local commits",
                trunk,
                DEFAULT_REMOTE,
                trunk
            )));
        }
        println!(
            "{} '{}' diverged from its remote; keeping local tip (--force)",
            "!".yellow(),
            trunk
        );
        return Ok(());
    }
    if engine.gateway.current_branch()?.as_deref() == Some(trunk) {
        engine
            .gateway
            .run_git_ok(&["merge", "--ff-only", remote_ref.as_str()])?;
    } else {
        engine.gateway.reset_branch(trunk, &remote_tip)?;
    }
    println!(
        "{} Fast-forwarded {} to {}",
        "✓".green(),
        trunk.green(),
        remote_tip.short()
    );
    Ok(())
}

/// Branches considered merged: PR state says merged, or the branch tip is an
/// ancestor of its trunk's tip.
async fn find_merged_branches(engine: &Engine, tracked: &[String]) -> Result<Vec<String>> {
    let mut merged = Vec::new();

    // Forge check first when available; local ancestry otherwise.
    let forge_states = if engine.config.is_forge_enabled {
        match detect_forge(&engine.gateway, &engine.config) {
            Ok(forge) => Some(prs_for_branches(forge.as_ref(), tracked).await),
            Err(_) => None,
        }
    } else {
        None
    };

    for branch in tracked {
        let trunk = engine.graph.trunk_of(branch)?;
        let tip = engine.gateway.branch_sha(branch)?;
        let trunk_tip = engine.gateway.branch_sha(&trunk)?;

        let pr_merged = forge_states
            .as_ref()
            .and_then(|m| m.get(branch).cloned().flatten())
            .map(|pr| pr.state == PrState::Merged)
            .unwrap_or(false);
        if pr_merged || engine.gateway.is_ancestor(&tip, &trunk_tip)? {
            merged.push(branch.clone());
        }
    }
    Ok(merged)
}
