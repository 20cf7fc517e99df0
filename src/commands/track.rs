use colored::Colorize;

use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::metadata::BranchMetadata;

/// Start tracking a branch. The parent defaults to trunk; `--force` re-infers
/// the parent from git history, repairing corrupted or missing metadata.
pub fn run_track(branch: Option<String>, parent: Option<String>, force: bool) -> Result<()> {
    let mut engine = Engine::open()?;
    let branch = match branch {
        Some(b) => b,
        None => engine.gateway.require_current_branch()?,
    };
    if !engine.gateway.branch_exists(&branch)? {
        return Err(Error::RefNotFound(branch));
    }
    if engine.graph.is_trunk(&branch) {
        return Err(Error::OnTrunk(branch));
    }
    if engine.graph.is_tracked(&branch) && !force {
        println!("{} '{}' is already tracked", "ℹ".blue(), branch);
        return Ok(());
    }

    engine.begin("track", &[branch.clone()])?;

    let parent = match parent {
        Some(p) => {
            if !engine.graph.is_tracked(&p) {
                return Err(Error::BranchNotTracked(p));
            }
            p
        }
        None if force => infer_parent(&engine, &branch)?,
        None => engine.graph.trunk().to_string(),
    };

    let mut meta = BranchMetadata::with_parent(&parent);
    let parent_tip = engine.gateway.branch_sha(&parent)?;
    let tip = engine.gateway.branch_sha(&branch)?;
    meta.base_sha = Some(
        engine
            .gateway
            .merge_base(&parent_tip, &tip)?
            .to_string(),
    );
    engine.graph.insert(&branch, meta)?;
    engine.commit()?;

    println!(
        "{} Tracking {} with parent {}",
        "✓".green().bold(),
        branch.green(),
        parent.blue()
    );
    Ok(())
}

/// Walk history to find the tracked branch (or trunk) whose tip is the
/// nearest ancestor of `branch`.
fn infer_parent(engine: &Engine, branch: &str) -> Result<String> {
    let tip = engine.gateway.branch_sha(branch)?;
    let mut best: Option<(String, usize)> = None;

    let mut candidates = engine.graph.tracked_branches();
    candidates.extend(engine.graph.trunks().iter().cloned());

    for candidate in candidates {
        if candidate == branch || !engine.gateway.branch_exists(&candidate)? {
            continue;
        }
        let candidate_tip = engine.gateway.branch_sha(&candidate)?;
        if !engine.gateway.is_ancestor(&candidate_tip, &tip)? {
            continue;
        }
        // Nearest ancestor = fewest commits between its tip and ours.
        let distance = engine
            .gateway
            .commits_between(&candidate_tip, &tip)?
            .len();
        if best.as_ref().map(|(_, d)| distance < *d).unwrap_or(true) {
            best = Some((candidate, distance));
        }
    }

    Ok(best
        .map(|(b, _)| b)
        .unwrap_or_else(|| engine.graph.trunk().to_string()))
}

/// Stop tracking a branch. The branch itself is left alone; children are
/// reparented to its parent.
pub fn run_untrack(branch: Option<String>) -> Result<()> {
    let mut engine = Engine::open()?;
    let branch = match branch {
        Some(b) => b,
        None => engine.gateway.require_current_branch()?,
    };
    if engine.graph.is_trunk(&branch) {
        return Err(Error::OnTrunk(branch));
    }
    if !engine.graph.is_tracked(&branch) {
        return Err(Error::BranchNotTracked(branch));
    }

    engine.begin("untrack", &[branch.clone()])?;

    let parent = engine
        .graph
        .parent(&branch)
        .map(|s| s.to_string())
        .unwrap_or_else(|| engine.graph.trunk().to_string());
    for child in engine.graph.children(&branch).to_vec() {
        engine.graph.set_parent(&child, &parent)?;
    }
    engine.graph.remove(&branch);
    engine.commit()?;

    println!("{} Untracked {}", "✓".green().bold(), branch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::git_gateway::GitGateway;
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, git2::Repository) {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();
        (dir, repo)
    }

    #[test]
    fn test_track_defaults_to_trunk_parent() {
        let (dir, _repo) = setup();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::discover().unwrap();
        gateway.create_branch("feature", "HEAD").unwrap();

        run_track(Some("feature".to_string()), None, false).unwrap();

        let engine = Engine::open().unwrap();
        assert_eq!(engine.graph.parent("feature"), Some("main"));
        assert!(engine.graph.metadata("feature").unwrap().base_sha.is_some());
    }

    #[test]
    fn test_track_force_infers_nearest_parent() {
        let (dir, repo) = setup();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::discover().unwrap();

        gateway.create_branch("a", "HEAD").unwrap();
        gateway.checkout("a").unwrap();
        commit_file(&repo, "a.txt", "a\n", "a work").unwrap();
        run_track(Some("a".to_string()), None, false).unwrap();

        // b sits on top of a's tip; inference should pick a, not trunk.
        gateway.create_branch("b", "HEAD").unwrap();
        gateway.checkout("b").unwrap();
        commit_file(&repo, "b.txt", "b\n", "b work").unwrap();
        run_track(Some("b".to_string()), None, true).unwrap();

        let engine = Engine::open().unwrap();
        assert_eq!(engine.graph.parent("b"), Some("a"));
    }

    #[test]
    fn test_untrack_reparents_children() {
        let (dir, _repo) = setup();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::discover().unwrap();
        gateway.create_branch("a", "HEAD").unwrap();
        gateway.create_branch("b", "HEAD").unwrap();
        run_track(Some("a".to_string()), None, false).unwrap();
        run_track(Some("b".to_string()), Some("a".to_string()), false).unwrap();

        run_untrack(Some("a".to_string())).unwrap();

        let engine = Engine::open().unwrap();
        assert!(!engine.graph.is_tracked("a"));
        assert_eq!(engine.graph.parent("b"), Some("main"));
    }

    #[test]
    fn test_track_trunk_rejected() {
        let (dir, _repo) = setup();
        let _ctx = TestRepoContext::new(dir.path());
        assert!(matches!(
            run_track(Some("main".to_string()), None, false),
            Err(Error::OnTrunk(_))
        ));
    }
}
