use serde_json::json;

use crate::engine::Engine;
use crate::errors::Result;
use crate::state::ContinuationState;

/// Dump the engine's view of the repository as JSON, for bug reports.
pub fn run() -> Result<()> {
    let engine = Engine::open()?;

    let mut branches = serde_json::Map::new();
    for branch in engine.graph.tracked_branches() {
        if let Some(meta) = engine.graph.metadata(&branch) {
            branches.insert(branch.clone(), serde_json::to_value(meta)?);
        }
    }

    let continuation = ContinuationState::load(engine.gateway.git_dir())?
        .map(serde_json::to_value)
        .transpose()?;

    let dump = json!({
        "config": serde_json::to_value(&engine.config)?,
        "current_branch": engine.gateway.current_branch()?,
        "rebase_in_progress": engine.gateway.rebase_in_progress()?,
        "branches": branches,
        "continuation": continuation,
        "snapshots": engine.snapshots().ids()?,
    });
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
