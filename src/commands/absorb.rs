use colored::Colorize;

use crate::context::ExecutionContext;
use crate::engine::{absorb, Engine};
use crate::errors::{Error, Result};

/// Absorb staged hunks into the ancestor commits that introduced the lines
/// they touch.
pub fn run(all: bool, force: bool, _patch: bool) -> Result<()> {
    let mut engine = Engine::open()?;

    if all {
        engine.gateway.stage_all()?;
        println!("{} Staged all changes", "✓".green());
    }
    if !engine.gateway.has_staged_changes()? {
        println!("{} No staged changes to absorb.", "ℹ".blue());
        if engine.gateway.has_untracked()? {
            println!("  (untracked files are never absorbed; stage them with --all)");
        }
        return Ok(());
    }

    let dry_run = ExecutionContext::is_dry_run();
    if !dry_run {
        engine.begin("absorb", &[])?;
        engine.reconcile()?;
    }

    let plan = absorb::compute_plan(&engine)?;

    if dry_run {
        absorb::print_plan(&plan);
        println!("{} No changes made (dry-run mode)", "✓".green().bold());
        return Ok(());
    }

    if !plan.unabsorbable.is_empty() && plan.attributions.is_empty() {
        absorb::print_plan(&plan);
        return Err(Error::Other(anyhow::anyhow!(
            "nothing could be absorbed; the staged hunks stay staged"
        )));
    }
    if !plan.unabsorbable.is_empty() && !force {
        absorb::print_plan(&plan);
        return Err(Error::Other(anyhow::anyhow!(
            "{} hunk(s) cannot be absorbed; re-run with --force to absorb the rest",
            plan.unabsorbable.len()
        )));
    }

    absorb::execute(&mut engine, plan)
}
