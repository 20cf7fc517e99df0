use colored::Colorize;
use dialoguer::Confirm;

use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::snapshot;
use crate::state::ContinuationState;

/// Restore the repository to a snapshot taken before a mutating command.
pub fn run(snapshot_id: Option<u64>, yes: bool, force: bool, list: bool) -> Result<()> {
    let engine = Engine::open()?;

    if list {
        let snapshots = engine.snapshots().list()?;
        if snapshots.is_empty() {
            println!("{} No snapshots available", "ℹ".blue());
            return Ok(());
        }
        println!("Available snapshots (newest first):");
        for s in snapshots {
            println!(
                "  {:03}  {}  {} {}",
                s.id,
                s.timestamp.format("%Y-%m-%d %H:%M:%S"),
                s.command,
                s.command_args.join(" ")
            );
        }
        return Ok(());
    }

    if ContinuationState::exists(engine.gateway.git_dir()) {
        return Err(Error::RebaseInProgress {
            kind: "rebase".to_string(),
        });
    }

    let snapshot = match snapshot_id {
        Some(id) => engine.snapshots().load(id)?,
        None => engine
            .snapshots()
            .latest()?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("no snapshot to undo to")))?,
    };

    println!(
        "{} Restoring snapshot {:03} (before '{} {}')",
        "→".blue(),
        snapshot.id,
        snapshot.command,
        snapshot.command_args.join(" ")
    );
    for (branch, state) in &snapshot.branches {
        println!("  • {} -> {}", branch, &state.sha[..7]);
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Restore this snapshot?")
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

    snapshot::restore(&engine.gateway, &snapshot, force)?;
    engine.snapshots().discard(snapshot.id)?;

    println!(
        "{} Restored to the state before '{}'",
        "✓".green().bold(),
        snapshot.command
    );
    Ok(())
}
