use colored::Colorize;
use dialoguer::MultiSelect;

use crate::engine::{restack, Engine};
use crate::errors::{Error, Result};
use crate::git_gateway::diff::parse_patch;
use crate::metadata::BranchMetadata;
use crate::naming::sanitize_branch_name;
use crate::state::OperationKind;

/// Split the current branch into multiple stacked branches.
pub fn run(by_commit: bool, by_file: Option<Vec<String>>, by_hunk: bool) -> Result<()> {
    if by_commit {
        run_by_commit()
    } else if let Some(patterns) = by_file {
        run_by_file(patterns)
    } else if by_hunk {
        run_by_hunk()
    } else {
        Err(Error::Other(anyhow::anyhow!(
            "choose a split mode: --by-commit, --by-file <patterns> or --by-hunk"
        )))
    }
}

/// Each commit of the branch becomes its own branch, chained in order; the
/// original branch keeps the topmost commit.
fn run_by_commit() -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;
    let branch = engine.require_current_stack_branch()?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
    let parent_tip = engine.gateway.branch_sha(&parent)?;
    let tip = engine.gateway.branch_sha(&branch)?;
    let base = engine.gateway.merge_base(&parent_tip, &tip)?;
    let commits = engine.gateway.commits_between(&base, &tip)?;

    if commits.len() < 2 {
        println!("{} {} has a single commit; nothing to split", "ℹ".blue(), branch);
        return Ok(());
    }

    engine.begin("split", &[branch.clone()])?;

    let mut chain_parent = parent.clone();
    let mut chain_parent_tip = base.clone();
    // All but the last commit become new branches.
    for commit in &commits[..commits.len() - 1] {
        let subject = engine.gateway.commit_subject(commit)?;
        let name = unique_branch_name(&engine, &sanitize_branch_name(&subject))?;
        engine.gateway.create_branch(&name, commit.as_str())?;

        let mut meta = BranchMetadata::with_parent(&chain_parent);
        meta.base_sha = Some(chain_parent_tip.to_string());
        engine.graph.insert(&name, meta)?;

        println!("  {} {} @ {}", "✓".green(), name.green(), commit.short());
        chain_parent = name;
        chain_parent_tip = commit.clone();
    }

    // The original branch keeps the tip and is reparented to the last split.
    engine.graph.set_parent(&branch, &chain_parent)?;
    engine.graph.set_base_sha(&branch, chain_parent_tip.to_string());
    engine.commit()?;

    println!(
        "{} Split {} into {} branches",
        "✓".green().bold(),
        branch.green(),
        commits.len()
    );
    Ok(())
}

fn unique_branch_name(engine: &Engine, base: &str) -> Result<String> {
    let base = if base.is_empty() { "split" } else { base };
    if !engine.gateway.branch_exists(base)? {
        return Ok(base.to_string());
    }
    for i in 2..100 {
        let candidate = format!("{}-{}", base, i);
        if !engine.gateway.branch_exists(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(Error::Other(anyhow::anyhow!(
        "could not find a free name for '{}'",
        base
    )))
}

/// Extract files matching the patterns into a new branch between the parent
/// and the current branch.
fn run_by_file(patterns: Vec<String>) -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;
    let branch = engine.require_current_stack_branch()?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
    let parent_tip = engine.gateway.branch_sha(&parent)?;
    let tip = engine.gateway.branch_sha(&branch)?;
    let base = engine.gateway.merge_base(&parent_tip, &tip)?;

    let full = engine.gateway.diff_between(&base, &tip)?;
    let files = parse_patch(&full);
    let (matched, rest): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|f| patterns.iter().any(|p| glob_match(p, &f.path)));

    if matched.is_empty() {
        return Err(Error::Other(anyhow::anyhow!(
            "no changed files match {}",
            patterns.join(", ")
        )));
    }
    if rest.is_empty() {
        println!(
            "{} All changed files match; nothing would remain on {}",
            "ℹ".blue(),
            branch
        );
        return Ok(());
    }

    engine.begin("split", &[branch.clone()])?;

    let name = unique_branch_name(&engine, &format!("{}-split", branch))?;
    let extracted: String = matched
        .iter()
        .map(|f| {
            let hunks: Vec<_> = f.hunks.iter().collect();
            f.patch_for_hunks(&hunks)
        })
        .collect();

    // Build the extracted commit directly on the old base.
    let base_tree = engine.gateway.commit_metadata(&base)?.tree;
    let new_tree = engine.gateway.apply_patch_to_tree(&base_tree, &extracted)?;
    let mut new_meta = engine.gateway.commit_metadata(&tip)?;
    new_meta.message = format!("Extract {} from {}", patterns.join(" "), branch);
    let amended = engine.gateway.commit_tree_as(&new_tree, Some(&base), &new_meta)?;

    engine.gateway.create_branch(&name, amended.as_str())?;
    let mut meta = BranchMetadata::with_parent(&parent);
    meta.base_sha = Some(base.to_string());
    engine.graph.insert(&name, meta)?;
    engine.graph.set_parent(&branch, &name)?;
    engine.commit()?;

    println!(
        "{} Extracted {} file(s) into {} below {}",
        "✓".green().bold(),
        matched.len(),
        name.green(),
        branch.green()
    );

    // Replay the branch on top of the extracted commit.
    restack::execute(
        &mut engine,
        vec![branch],
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}

/// Interactively select hunks for extraction into a new parent branch.
fn run_by_hunk() -> Result<()> {
    let mut engine = Engine::open()?;
    engine.gateway.require_clean_worktree()?;
    let branch = engine.require_current_stack_branch()?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .ok_or_else(|| Error::BranchNotTracked(branch.clone()))?;
    let parent_tip = engine.gateway.branch_sha(&parent)?;
    let tip = engine.gateway.branch_sha(&branch)?;
    let base = engine.gateway.merge_base(&parent_tip, &tip)?;

    let full = engine.gateway.diff_between(&base, &tip)?;
    let files = parse_patch(&full);

    let mut items = Vec::new();
    let mut hunk_patches = Vec::new();
    for file in &files {
        for hunk in &file.hunks {
            items.push(format!("{} {}", file.path, hunk.header));
            hunk_patches.push(file.patch_for_hunks(&[hunk]));
        }
    }
    if items.is_empty() {
        println!("{} No hunks to split", "ℹ".blue());
        return Ok(());
    }

    let selected = MultiSelect::new()
        .with_prompt("Select hunks to extract into a new branch below this one")
        .items(&items)
        .interact()
        .map_err(|e| Error::Other(anyhow::anyhow!("selection cancelled: {}", e)))?;
    if selected.is_empty() || selected.len() == items.len() {
        println!("{} Nothing to split", "ℹ".blue());
        return Ok(());
    }

    engine.begin("split", &[branch.clone()])?;

    let extracted: String = selected.iter().map(|&i| hunk_patches[i].as_str()).collect();
    let name = unique_branch_name(&engine, &format!("{}-split", branch))?;

    let base_tree = engine.gateway.commit_metadata(&base)?.tree;
    let new_tree = engine.gateway.apply_patch_to_tree(&base_tree, &extracted)?;
    let mut new_meta = engine.gateway.commit_metadata(&tip)?;
    new_meta.message = format!("Extract hunks from {}", branch);
    let amended = engine.gateway.commit_tree_as(&new_tree, Some(&base), &new_meta)?;

    engine.gateway.create_branch(&name, amended.as_str())?;
    let mut meta = BranchMetadata::with_parent(&parent);
    meta.base_sha = Some(base.to_string());
    engine.graph.insert(&name, meta)?;
    engine.graph.set_parent(&branch, &name)?;
    engine.commit()?;

    println!(
        "{} Extracted {} hunk(s) into {}",
        "✓".green().bold(),
        selected.len(),
        name.green()
    );

    restack::execute(
        &mut engine,
        vec![branch],
        OperationKind::Restack,
        serde_json::Value::Null,
    )
}

/// Minimal glob: `*` matches any run of characters, everything else literal.
fn glob_match(pattern: &str, path: &str) -> bool {
    fn matches(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], s) || (!s.is_empty() && matches(p, &s[1..]))
            }
            (Some(pc), Some(sc)) if pc == sc => matches(&p[1..], &s[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), path.as_bytes())
}
