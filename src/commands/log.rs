use colored::Colorize;

use crate::engine::restack::needs_restack;
use crate::engine::Engine;
use crate::errors::Result;

/// Marker for the checked-out branch.
const MARKER_CURRENT: &str = "◉";
/// Marker for other branches.
const MARKER_OTHER: &str = "◯";

/// Visualize the stack forest, trunk at the bottom.
pub fn run() -> Result<()> {
    let engine = Engine::open()?;
    let current = engine.gateway.current_branch()?.unwrap_or_default();

    let mut rows: Vec<String> = Vec::new();
    for trunk in engine.graph.trunks().to_vec() {
        render(&engine, &trunk, 0, &current, &mut rows)?;
    }
    // Stack order: children above their parents.
    for row in rows.iter().rev() {
        println!("{}", row);
    }
    Ok(())
}

fn render(
    engine: &Engine,
    branch: &str,
    depth: usize,
    current: &str,
    rows: &mut Vec<String>,
) -> Result<()> {
    let marker = if branch == current {
        MARKER_CURRENT.green().bold().to_string()
    } else {
        MARKER_OTHER.to_string()
    };

    let mut annotations = Vec::new();
    if engine.graph.is_trunk(branch) {
        annotations.push("trunk".blue().to_string());
    } else if needs_restack(engine, branch).unwrap_or(false) {
        // A missing parent renders as plain; doctor reports the real issue.
        annotations.push("needs restack".yellow().to_string());
    }
    if let Some(pr) = engine.graph.metadata(branch).and_then(|m| m.pr.as_ref()) {
        annotations.push(format!("#{}", pr.number).cyan().to_string());
    }

    let indent = "│ ".repeat(depth);
    let name = if branch == current {
        branch.green().bold().to_string()
    } else {
        branch.to_string()
    };
    let suffix = if annotations.is_empty() {
        String::new()
    } else {
        format!("  ({})", annotations.join(", "))
    };
    rows.push(format!("{}{} {}{}", indent, marker, name, suffix));

    for child in engine.graph.children(branch).to_vec() {
        render(engine, &child, depth + 1, current, rows)?;
    }
    Ok(())
}
