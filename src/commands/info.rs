use colored::Colorize;

use crate::engine::restack::needs_restack;
use crate::engine::Engine;
use crate::errors::{Error, Result};

/// Show details of a branch.
pub fn run(branch: Option<String>) -> Result<()> {
    let engine = Engine::open()?;
    let branch = match branch {
        Some(b) => b,
        None => engine.gateway.require_current_branch()?,
    };
    if !engine.gateway.branch_exists(&branch)? {
        return Err(Error::RefNotFound(branch));
    }

    let tip = engine.gateway.branch_sha(&branch)?;
    println!("{} {}", branch.green().bold(), tip.short().dimmed());
    println!("  subject: {}", engine.gateway.commit_subject(&tip)?);

    if engine.graph.is_trunk(&branch) {
        println!("  role: {}", "trunk".blue());
    } else if let Some(meta) = engine.graph.metadata(&branch) {
        println!(
            "  parent: {}",
            meta.parent.as_deref().unwrap_or("(none)").blue()
        );
        match &meta.base_sha {
            Some(base) => println!("  base:   {}", &base[..7]),
            None => println!("  base:   (not recorded)"),
        }
        if needs_restack(&engine, &branch)? {
            println!("  status: {}", "needs restack".yellow());
        } else {
            println!("  status: {}", "in sync with parent".green());
        }
        if let Some(scope) = engine.graph.effective_scope(&branch)? {
            println!("  scope:  {}", scope);
        }
        match &meta.pr {
            Some(pr) => println!(
                "  pr:     #{} ({:?}, checks {:?}) {}",
                pr.number, pr.state, pr.checks, pr.url
            ),
            None => println!("  pr:     (none)"),
        }
    } else {
        println!("  role: {}", "untracked".yellow());
    }

    let children = engine.graph.children(&branch);
    if !children.is_empty() {
        println!("  children: {}", children.join(", "));
    }
    Ok(())
}

/// Print the parent of the current branch.
pub fn run_parent() -> Result<()> {
    let engine = Engine::open()?;
    let current = engine.gateway.require_current_branch()?;
    match engine.graph.parent(&current) {
        Some(parent) => println!("{}", parent),
        None if engine.graph.is_trunk(&current) => {
            println!("{} {} is a trunk", "ℹ".blue(), current)
        }
        None => return Err(Error::BranchNotTracked(current)),
    }
    Ok(())
}

/// Print the children of the current branch.
pub fn run_children() -> Result<()> {
    let engine = Engine::open()?;
    let current = engine.gateway.require_current_branch()?;
    let children = engine.graph.children(&current);
    if children.is_empty() {
        println!("{} {} has no children", "ℹ".blue(), current);
    } else {
        for child in children {
            println!("{}", child);
        }
    }
    Ok(())
}

/// Show or change the trunk branch.
pub fn run_trunk(set: Option<String>) -> Result<()> {
    let mut engine = Engine::open()?;
    match set {
        Some(trunk) => {
            if !engine.gateway.branch_exists(&trunk)? {
                return Err(Error::RefNotFound(trunk));
            }
            engine.config.set("trunk", &trunk)?;
            engine.config.save(engine.gateway.git_dir())?;
            println!("{} Trunk set to {}", "✓".green().bold(), trunk.green());
        }
        None => {
            println!("{}", engine.config.trunk);
        }
    }
    Ok(())
}
