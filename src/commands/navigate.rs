use colored::Colorize;

use crate::engine::Engine;
use crate::errors::{Error, Result};

/// `checkout <name>`: switch to a branch by name.
pub fn run_checkout(name: String) -> Result<()> {
    let engine = Engine::open()?;
    engine.gateway.checkout(&name)?;
    println!("{} Switched to {}", "✓".green(), name.green());
    Ok(())
}

/// `up [steps]`: move toward descendants. With several children the
/// alphabetically first is taken; ambiguity is reported.
pub fn run_up(steps: usize) -> Result<()> {
    let engine = Engine::open()?;
    let mut current = engine.gateway.require_current_branch()?;

    for _ in 0..steps.max(1) {
        let children = engine.graph.children(&current);
        match children.len() {
            0 => {
                println!("{} {} has no children", "ℹ".blue(), current);
                break;
            }
            1 => current = children[0].clone(),
            _ => {
                println!(
                    "{} {} has multiple children: {}",
                    "ℹ".blue(),
                    current,
                    children.join(", ")
                );
                current = children[0].clone();
            }
        }
    }

    engine.gateway.checkout(&current)?;
    println!("{} Switched to {}", "✓".green(), current.green());
    Ok(())
}

/// `down [steps]`: move toward trunk.
pub fn run_down(steps: usize) -> Result<()> {
    let engine = Engine::open()?;
    let mut current = engine.gateway.require_current_branch()?;

    for _ in 0..steps.max(1) {
        match engine.graph.parent(&current) {
            Some(parent) => current = parent.to_string(),
            None => {
                if engine.graph.is_trunk(&current) {
                    break;
                }
                return Err(Error::BranchNotTracked(current));
            }
        }
    }

    engine.gateway.checkout(&current)?;
    println!("{} Switched to {}", "✓".green(), current.green());
    Ok(())
}

/// `top`: the tip of the current stack (follows first children).
pub fn run_top() -> Result<()> {
    let engine = Engine::open()?;
    let mut current = engine.gateway.require_current_branch()?;
    while let Some(child) = engine.graph.children(&current).first() {
        current = child.clone();
    }
    engine.gateway.checkout(&current)?;
    println!("{} Switched to {}", "✓".green(), current.green());
    Ok(())
}

/// `bottom`: the first branch above trunk in the current stack.
pub fn run_bottom() -> Result<()> {
    let engine = Engine::open()?;
    let current = engine.gateway.require_current_branch()?;
    if engine.graph.is_trunk(&current) {
        return Err(Error::OnTrunk(current));
    }
    let ancestors = engine.graph.ancestors(&current)?;
    let bottom = ancestors.last().cloned().unwrap_or(current);
    engine.gateway.checkout(&bottom)?;
    println!("{} Switched to {}", "✓".green(), bottom.green());
    Ok(())
}

/// `trunk`: jump to the stack's trunk.
pub fn run_trunk_checkout() -> Result<()> {
    let engine = Engine::open()?;
    let current = engine.gateway.require_current_branch()?;
    let trunk = engine.graph.trunk_of(&current)?;
    engine.gateway.checkout(&trunk)?;
    println!("{} Switched to {}", "✓".green(), trunk.green());
    Ok(())
}
