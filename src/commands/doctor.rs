use colored::Colorize;

use crate::engine::Engine;
use crate::errors::Result;
use crate::metadata::MetadataStore;

/// A problem `doctor` found, with what `--fix` would do about it.
#[derive(Debug)]
enum Issue {
    TrunkMissing(String),
    CorruptMetadata(String),
    TrackedBranchMissing(String),
    OrphanedParent { branch: String, parent: String },
    Cycle(Vec<String>),
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::TrunkMissing(t) => write!(f, "trunk '{}' does not exist in git", t),
            Issue::CorruptMetadata(b) => write!(f, "metadata for '{}' is corrupted", b),
            Issue::TrackedBranchMissing(b) => {
                write!(f, "'{}' is tracked but does not exist in git", b)
            }
            Issue::OrphanedParent { branch, parent } => {
                write!(f, "'{}' references untracked parent '{}'", branch, parent)
            }
            Issue::Cycle(branches) => {
                write!(f, "circular parent chain: {}", branches.join(" -> "))
            }
        }
    }
}

/// Diagnose (and with `--fix`, repair) stack metadata.
pub fn run(fix: bool) -> Result<()> {
    let gateway = crate::git_gateway::GitGateway::discover()?;
    let store = MetadataStore::new(&gateway);
    let config = crate::config::Config::load(gateway.git_dir())?;

    let mut issues = Vec::new();

    for trunk in &config.trunks {
        if !gateway.branch_exists(trunk)? {
            issues.push(Issue::TrunkMissing(trunk.clone()));
        }
    }

    // Raw scan: read each record individually so one corrupt blob doesn't
    // hide the rest.
    let tracked = store.tracked_branches()?;
    let mut readable = Vec::new();
    for branch in &tracked {
        match store.read(branch) {
            Ok(Some(meta)) => readable.push((branch.clone(), meta)),
            Ok(None) => {}
            Err(_) => issues.push(Issue::CorruptMetadata(branch.clone())),
        }
    }

    for (branch, meta) in &readable {
        if !gateway.branch_exists(branch)? {
            issues.push(Issue::TrackedBranchMissing(branch.clone()));
            continue;
        }
        if let Some(parent) = &meta.parent {
            let parent_tracked = config.trunks.contains(parent)
                || readable.iter().any(|(b, _)| b == parent);
            if !parent_tracked || !gateway.branch_exists(parent)? {
                issues.push(Issue::OrphanedParent {
                    branch: branch.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    // Cycle scan over the readable records.
    for (branch, _) in &readable {
        let mut seen = vec![branch.clone()];
        let mut current = branch.clone();
        loop {
            let Some(parent) = readable
                .iter()
                .find(|(b, _)| b == &current)
                .and_then(|(_, m)| m.parent.clone())
            else {
                break;
            };
            if config.trunks.contains(&parent) {
                break;
            }
            if seen.contains(&parent) {
                if seen[0] == parent {
                    // Report each cycle once, from its smallest member.
                    let mut cycle = seen.clone();
                    cycle.push(parent.clone());
                    if seen.iter().min() == Some(&seen[0]) {
                        issues.push(Issue::Cycle(cycle));
                    }
                }
                break;
            }
            seen.push(parent.clone());
            current = parent;
        }
    }

    if issues.is_empty() {
        println!("{} No problems found", "✓".green().bold());
        return Ok(());
    }

    println!("{} Found {} issue(s):", "!".yellow().bold(), issues.len());
    for issue in &issues {
        println!("  • {}", issue);
    }

    if !fix {
        println!();
        println!("Run 'stackit doctor --fix' to repair.");
        return Ok(());
    }

    println!();
    let trunk = config.trunk.clone();
    for issue in &issues {
        match issue {
            Issue::TrunkMissing(t) => {
                println!(
                    "{} Cannot fix missing trunk '{}'; set another with 'stackit trunk --set'",
                    "!".yellow(),
                    t
                );
            }
            Issue::CorruptMetadata(branch) | Issue::TrackedBranchMissing(branch) => {
                store.delete(branch)?;
                println!("{} Removed metadata for '{}'", "✓".green(), branch);
            }
            Issue::OrphanedParent { branch, .. } => {
                if let Ok(Some(mut meta)) = store.read(branch) {
                    meta.parent = Some(trunk.clone());
                    meta.base_sha = None;
                    store.write(branch, &meta)?;
                    println!("{} Reparented '{}' onto '{}'", "✓".green(), branch, trunk);
                }
            }
            Issue::Cycle(branches) => {
                // Break the cycle at its first member.
                if let Some(first) = branches.first() {
                    if let Ok(Some(mut meta)) = store.read(first) {
                        meta.parent = Some(trunk.clone());
                        meta.base_sha = None;
                        store.write(first, &meta)?;
                        println!(
                            "{} Broke cycle by reparenting '{}' onto '{}'",
                            "✓".green(),
                            first,
                            trunk
                        );
                    }
                }
            }
        }
    }

    // Engine reopening revalidates what remains.
    let _ = Engine::open()?;
    println!("{} Repair complete", "✓".green().bold());
    Ok(())
}
