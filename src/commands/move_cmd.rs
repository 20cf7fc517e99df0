use colored::Colorize;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::graph::ScopeSpec;
use crate::state::OperationKind;

/// Move a branch (and its subtree) onto a new parent.
pub fn run(onto: Option<String>, source: Option<String>) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;

    let source = match source {
        Some(s) => s,
        None => engine.gateway.require_current_branch()?,
    };
    if engine.graph.is_trunk(&source) {
        return Err(Error::OnTrunk(source));
    }
    engine.require_tracked(&source)?;

    let onto = match onto {
        Some(o) => o,
        None => engine.graph.trunk().to_string(),
    };
    if !engine.graph.is_tracked(&onto) {
        return Err(Error::BranchNotTracked(onto));
    }
    if onto == source {
        return Err(Error::CycleDetected(vec![source, onto]));
    }

    let old_parent = engine.graph.parent(&source).map(|s| s.to_string());
    if old_parent.as_deref() == Some(onto.as_str()) {
        println!("{} {} is already on {}", "ℹ".blue(), source, onto);
        return Ok(());
    }

    engine.begin("move", &[source.clone(), onto.clone()])?;

    // Validates acyclicity before anything moves.
    engine.graph.set_parent(&source, &onto)?;
    engine.commit()?;

    println!(
        "{} Moving {} onto {}",
        "→".blue(),
        source.green(),
        onto.blue()
    );

    let branches = engine.graph.relative_stack(&source, ScopeSpec::UPSTACK)?;
    restack::execute(
        &mut engine,
        branches,
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}
