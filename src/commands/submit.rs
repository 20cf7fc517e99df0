use colored::Colorize;

use crate::context::ExecutionContext;
use crate::engine::Engine;
use crate::errors::Result;
use crate::forge::{detect_forge, PrOptions, DEFAULT_REMOTE};
use crate::graph::ScopeSpec;
use crate::metadata::PrState;

/// Push branches and create or update their PRs, bottom-up.
pub async fn run(stack: bool, draft: bool, force: bool, branch: Option<String>) -> Result<()> {
    let mut engine = Engine::open()?;

    let target = match branch {
        Some(b) => {
            engine.require_tracked(&b)?;
            b
        }
        None => engine.require_current_stack_branch()?,
    };

    let scope = if stack { ScopeSpec::FULL } else { ScopeSpec::ONLY };
    let branches = engine.graph.relative_stack(&target, scope)?;
    let branches = engine.graph.topological_order(&branches);
    if branches.is_empty() {
        println!("{} Nothing to submit", "ℹ".blue());
        return Ok(());
    }

    if ExecutionContext::is_dry_run() {
        println!(
            "{} Dry run - would submit {} branch(es):",
            "[preview]".yellow().bold(),
            branches.len()
        );
        for b in &branches {
            let base = engine.graph.parent(b).unwrap_or("(trunk)");
            println!("  • push {} and open PR against {}", b.green(), base.blue());
        }
        return Ok(());
    }

    let forge = detect_forge(&engine.gateway, &engine.config)?;
    engine.begin("submit", &branches)?;

    for branch in &branches {
        let base = engine
            .graph
            .parent(branch)
            .map(|s| s.to_string())
            .unwrap_or_else(|| engine.graph.trunk().to_string());
        let tip = engine.gateway.branch_sha(branch)?;

        print!("{} Pushing {}... ", "→".blue(), branch.green());
        engine.gateway.push_branch(DEFAULT_REMOTE, branch, force)?;
        println!("{}", "✓".green());

        let existing = forge.pr_for_branch(branch).await?;
        let mut record = match existing {
            Some(pr) if pr.state == PrState::Open => {
                // Keep the PR base aligned with the stack parent.
                forge.update_pr_base(pr.number, &base).await?;
                println!(
                    "  {} Updated PR #{} (base {})",
                    "✓".green(),
                    pr.number,
                    base.blue()
                );
                pr
            }
            _ => {
                let title = engine
                    .gateway
                    .commit_subject(&tip)
                    .unwrap_or_else(|_| branch.clone());
                let body = if engine.config.submit_footer {
                    stack_footer(&engine, branch)?
                } else {
                    String::new()
                };
                let pr = forge
                    .create_pr(
                        branch,
                        &base,
                        &PrOptions {
                            draft,
                            title,
                            body,
                        },
                    )
                    .await?;
                println!("  {} Created PR #{} {}", "✓".green(), pr.number, pr.url);
                pr
            }
        };
        record.last_pushed_sha = Some(tip.to_string());
        engine.graph.set_pr(branch, Some(record));
    }

    engine.commit()?;
    println!();
    println!("{} Submit complete!", "✓".green().bold());
    Ok(())
}

/// A plain-text footer showing the stack a PR belongs to.
fn stack_footer(engine: &Engine, branch: &str) -> Result<String> {
    let mut chain = engine.graph.ancestors(branch)?;
    chain.reverse();
    chain.push(branch.to_string());
    chain.extend(engine.graph.descendants(branch));

    let mut out = String::from("---\nStack:\n");
    for b in chain.iter().rev() {
        if b == branch {
            out.push_str(&format!("- **{}** (this PR)\n", b));
        } else {
            out.push_str(&format!("- {}\n", b));
        }
    }
    out.push_str(&format!("- {}\n", engine.graph.trunk()));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::git_gateway::GitGateway;
    use crate::metadata::{BranchMetadata, MetadataStore};
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    #[test]
    fn test_stack_footer_lists_whole_stack() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();
        gateway.create_branch("a", "HEAD").unwrap();
        gateway.create_branch("b", "HEAD").unwrap();
        let store = MetadataStore::new(&gateway);
        store.write("a", &BranchMetadata::with_parent("main")).unwrap();
        store.write("b", &BranchMetadata::with_parent("a")).unwrap();

        let _ctx = TestRepoContext::new(dir.path());
        let engine = Engine::open().unwrap();
        let footer = stack_footer(&engine, "a").unwrap();
        assert!(footer.contains("**a** (this PR)"));
        assert!(footer.contains("- b"));
        assert!(footer.contains("- main"));
    }

    #[tokio::test]
    async fn test_submit_without_remote_fails_as_forge_error() {
        let dir = tempdir().unwrap();
        let _repo = init_test_repo(dir.path()).unwrap();
        let gateway = GitGateway::from_path(dir.path()).unwrap();
        Config::new("main".to_string())
            .save(gateway.git_dir())
            .unwrap();
        gateway.create_branch("a", "HEAD").unwrap();
        MetadataStore::new(&gateway)
            .write("a", &BranchMetadata::with_parent("main"))
            .unwrap();
        gateway.checkout("a").unwrap();

        let _ctx = TestRepoContext::new(dir.path());
        let result = run(false, false, false, None).await;
        assert!(matches!(result, Err(crate::errors::Error::Forge(_))));
    }
}
