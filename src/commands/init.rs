use colored::Colorize;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::git_gateway::GitGateway;
use crate::metadata::MetadataStore;

/// Initialize stackit in the current repository.
pub fn run(trunk: Option<String>, reset: bool) -> Result<()> {
    let gateway = GitGateway::discover()?;

    if Config::exists(gateway.git_dir()) && !reset {
        let config = Config::load(gateway.git_dir())?;
        println!(
            "{} Already initialized (trunk: {}). Use --reset to start over.",
            "ℹ".blue(),
            config.trunk.green()
        );
        return Ok(());
    }

    let branches = gateway.list_branches()?;
    if branches.is_empty() {
        return Err(Error::NoBranches);
    }

    let trunk = match trunk {
        Some(t) => {
            if !gateway.branch_exists(&t)? {
                return Err(Error::RefNotFound(t));
            }
            t
        }
        None => detect_trunk(&gateway, &branches)?,
    };

    if reset {
        let store = MetadataStore::new(&gateway);
        for branch in store.tracked_branches()? {
            store.delete(&branch)?;
        }
        println!("{} Cleared existing branch metadata", "✓".green());
    }

    Config::new(trunk.clone()).save(gateway.git_dir())?;
    println!("{} Initialized stackit with trunk {}", "✓".green().bold(), trunk.green());
    println!("  Track existing branches with 'stackit track <branch>'");
    Ok(())
}

fn detect_trunk(gateway: &GitGateway, branches: &[String]) -> Result<String> {
    for candidate in ["main", "master", "trunk", "develop"] {
        if branches.iter().any(|b| b == candidate) {
            return Ok(candidate.to_string());
        }
    }
    // Fall back to the current branch.
    gateway.require_current_branch()
}
