use std::fs;

use colored::Colorize;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::state::OperationKind;

/// Reorder the linear stack below the current branch.
///
/// The new order comes from a file (one branch per line, trunk-side first) or
/// from `$EDITOR`. `--preview` prints the current order and exits.
pub fn run(file: Option<String>, preview: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;
    let current = engine.require_current_stack_branch()?;

    // The chain trunk-side first, ending at the current branch.
    let mut chain = engine.graph.ancestors(&current)?;
    chain.reverse();
    chain.push(current.clone());

    if chain.len() < 2 {
        println!("{} Nothing to reorder (single-branch stack)", "ℹ".blue());
        return Ok(());
    }
    let top = chain[chain.len() - 1].clone();
    for branch in &chain {
        if branch == &top {
            continue;
        }
        let children = engine.graph.children(branch);
        if children.len() > 1 || children.iter().any(|c| !chain.contains(c)) {
            return Err(Error::Other(anyhow::anyhow!(
                "cannot reorder: '{}' has children outside this linear stack",
                branch
            )));
        }
    }

    if preview {
        println!("Current order (trunk-side first):");
        for branch in &chain {
            println!("  {}", branch);
        }
        return Ok(());
    }

    let new_order = match file {
        Some(path) => parse_order(&fs::read_to_string(&path)?)?,
        None => edit_order(&engine, &chain)?,
    };
    validate_order(&chain, &new_order)?;

    if new_order == chain {
        println!("{} Order unchanged", "ℹ".blue());
        return Ok(());
    }

    engine.begin("reorder", &new_order)?;

    // Rewrite parent pointers along the new chain, then restack it.
    let trunk = engine
        .graph
        .parent(&chain[0])
        .map(|s| s.to_string())
        .unwrap_or_else(|| engine.graph.trunk().to_string());
    let mut parent = trunk;
    for branch in &new_order {
        engine.graph.set_parent(branch, &parent)?;
        parent = branch.clone();
    }
    engine.commit()?;

    // Descendants of the old top ride along with the rewritten history.
    let mut to_restack = new_order;
    for descendant in engine.graph.descendants(&top) {
        if !to_restack.contains(&descendant) {
            to_restack.push(descendant);
        }
    }

    println!("{} Reordering stack...", "→".blue());
    restack::execute(
        &mut engine,
        to_restack,
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}

fn parse_order(content: &str) -> Result<Vec<String>> {
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect())
}

fn edit_order(engine: &Engine, chain: &[String]) -> Result<Vec<String>> {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let path = engine.gateway.git_dir().join(".stackit_reorder");
    let mut content = String::from("# Reorder branches (trunk-side first). Lines starting with # are ignored.\n");
    for branch in chain {
        content.push_str(branch);
        content.push('\n');
    }
    fs::write(&path, content)?;

    let status = std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .map_err(|e| Error::Other(anyhow::anyhow!("failed to launch editor '{}': {}", editor, e)))?;
    if !status.success() {
        let _ = fs::remove_file(&path);
        return Err(Error::Other(anyhow::anyhow!("editor exited with an error")));
    }
    let content = fs::read_to_string(&path)?;
    let _ = fs::remove_file(&path);
    parse_order(&content)
}

fn validate_order(chain: &[String], new_order: &[String]) -> Result<()> {
    let mut sorted_old: Vec<&String> = chain.iter().collect();
    let mut sorted_new: Vec<&String> = new_order.iter().collect();
    sorted_old.sort();
    sorted_new.sort();
    if sorted_old != sorted_new {
        return Err(Error::Other(anyhow::anyhow!(
            "the new order must contain exactly the branches: {}",
            chain.join(", ")
        )));
    }
    Ok(())
}
