use colored::Colorize;

use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::metadata::BranchMetadata;
use crate::naming::{generate_branch_name, NameParts};

/// Create a new stacked branch on top of the current branch.
///
/// With `-m`, staged changes are committed to the new branch and the name may
/// be generated from the message via the configured pattern.
pub fn run(
    name: Option<String>,
    message: Option<String>,
    all: bool,
    update: bool,
    scope: Option<String>,
) -> Result<()> {
    let mut engine = Engine::open()?;
    let current = engine.gateway.require_current_branch()?;

    if !engine.graph.is_tracked(&current) {
        return Err(Error::BranchNotTracked(current));
    }

    let name = match (&name, &message) {
        (Some(n), _) => n.clone(),
        (None, Some(m)) => {
            let username = engine
                .gateway
                .config_value("user.name")
                .unwrap_or_default();
            let parts = NameParts {
                username: Some(&username),
                date: None,
                message: m,
                scope: scope.as_deref(),
            };
            generate_branch_name(&engine.config.branch_name_pattern, &parts)?
        }
        (None, None) => {
            return Err(Error::Other(anyhow::anyhow!(
                "provide a branch name or a commit message (-m) to generate one"
            )))
        }
    };

    if engine.gateway.branch_exists(&name)? {
        return Err(Error::BranchAlreadyExists(name));
    }

    engine.begin("create", &[name.clone()])?;

    if all {
        engine.gateway.stage_all()?;
    } else if update {
        engine.gateway.stage_updates()?;
    }

    engine.gateway.create_branch(&name, "HEAD")?;
    engine.gateway.checkout(&name)?;

    if let Some(message) = &message {
        if engine.gateway.has_staged_changes()? {
            engine.gateway.create_commit(message)?;
        } else {
            println!("{} Nothing staged; created an empty branch", "ℹ".blue());
        }
    }

    let mut meta = BranchMetadata::with_parent(&current);
    meta.base_sha = Some(engine.gateway.branch_sha(&current)?.to_string());
    meta.scope = scope;
    engine.graph.insert(&name, meta)?;
    engine.commit()?;

    println!(
        "{} Created {} on top of {}",
        "✓".green().bold(),
        name.green(),
        current.blue()
    );
    Ok(())
}
