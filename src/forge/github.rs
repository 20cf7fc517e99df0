//! GitHub forge implementation wrapping the `gh` CLI.
//!
//! `gh` owns authentication and the HTTPS transport; this module shells out
//! and parses its JSON output. Rate-limited calls are retried with
//! exponential backoff.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::errors::{Error, Result};
use crate::metadata::{ChecksStatus, PrRecord, PrState};

use super::{Forge, MergeMethod, PrOptions};

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const RATE_LIMIT_BASE_DELAY_SECS: u64 = 5;

pub struct GitHubForge;

impl GitHubForge {
    pub fn new() -> Self {
        Self
    }

    async fn run_gh(&self, args: &[&str]) -> Result<std::process::Output> {
        let mut retries = 0;
        loop {
            let output = Command::new("gh")
                .args(args)
                .output()
                .await
                .map_err(|e| {
                    Error::Forge(format!(
                        "failed to run 'gh {}': {} (is the gh CLI installed?)",
                        args.join(" "),
                        e
                    ))
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_rate_limited(&stderr) && retries < MAX_RATE_LIMIT_RETRIES {
                    retries += 1;
                    let delay = RATE_LIMIT_BASE_DELAY_SECS * (1 << retries);
                    eprintln!(
                        "GitHub API rate limited. Retrying in {}s ({}/{})",
                        delay, retries, MAX_RATE_LIMIT_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    continue;
                }
            }
            return Ok(output);
        }
    }

    async fn run_gh_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run_gh(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Forge(format!(
                "gh {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn is_rate_limited(stderr: &str) -> bool {
    let s = stderr.to_lowercase();
    s.contains("rate limit") || s.contains("api rate limit exceeded") || s.contains("http 429")
}

/// Shape of `gh pr view --json ...` output.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPrView {
    number: u64,
    url: String,
    state: String,
    is_draft: bool,
    head_ref_oid: Option<String>,
    #[serde(default)]
    status_check_rollup: Vec<GhCheck>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCheck {
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn parse_state(s: &str) -> PrState {
    match s.to_ascii_uppercase().as_str() {
        "MERGED" => PrState::Merged,
        "CLOSED" => PrState::Closed,
        _ => PrState::Open,
    }
}

fn rollup_checks(checks: &[GhCheck]) -> ChecksStatus {
    if checks.is_empty() {
        return ChecksStatus::None;
    }
    let mut pending = false;
    for check in checks {
        match check.conclusion.as_deref() {
            Some("FAILURE") | Some("TIMED_OUT") | Some("CANCELLED") | Some("failure")
            | Some("timed_out") | Some("cancelled") => return ChecksStatus::Failure,
            Some(_) => {}
            None => {
                if check.status.is_some() {
                    pending = true;
                }
            }
        }
    }
    if pending {
        ChecksStatus::Pending
    } else {
        ChecksStatus::Success
    }
}

impl From<GhPrView> for PrRecord {
    fn from(view: GhPrView) -> Self {
        PrRecord {
            number: view.number,
            url: view.url,
            state: parse_state(&view.state),
            is_draft: view.is_draft,
            checks: rollup_checks(&view.status_check_rollup),
            last_pushed_sha: view.head_ref_oid,
        }
    }
}

#[async_trait]
impl Forge for GitHubForge {
    async fn pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>> {
        let output = self
            .run_gh(&[
                "pr",
                "view",
                branch,
                "--json",
                "number,url,state,isDraft,headRefOid,statusCheckRollup",
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no pull requests found") || stderr.contains("Could not resolve") {
                return Ok(None);
            }
            return Err(Error::Forge(format!(
                "gh pr view {} failed: {}",
                branch,
                stderr.trim()
            )));
        }
        let view: GhPrView = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Forge(format!("unexpected gh pr view output: {}", e)))?;
        Ok(Some(view.into()))
    }

    async fn create_pr(&self, branch: &str, base: &str, options: &PrOptions) -> Result<PrRecord> {
        let mut args = vec![
            "pr",
            "create",
            "--head",
            branch,
            "--base",
            base,
            "--title",
            options.title.as_str(),
            "--body",
            options.body.as_str(),
        ];
        if options.draft {
            args.push("--draft");
        }
        self.run_gh_ok(&args).await?;
        self.pr_for_branch(branch)
            .await?
            .ok_or_else(|| Error::Forge(format!("PR for '{}' vanished after creation", branch)))
    }

    async fn update_pr_base(&self, number: u64, new_base: &str) -> Result<()> {
        let number = number.to_string();
        self.run_gh_ok(&["pr", "edit", number.as_str(), "--base", new_base])
            .await?;
        Ok(())
    }

    async fn update_pr_body(&self, number: u64, body: &str) -> Result<()> {
        let number = number.to_string();
        self.run_gh_ok(&["pr", "edit", number.as_str(), "--body", body])
            .await?;
        Ok(())
    }

    async fn mark_ready(&self, number: u64) -> Result<()> {
        let number = number.to_string();
        self.run_gh_ok(&["pr", "ready", number.as_str()]).await?;
        Ok(())
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()> {
        let number = number.to_string();
        let method_flag = format!("--{}", method.as_str());
        self.run_gh_ok(&["pr", "merge", number.as_str(), method_flag.as_str()])
            .await?;
        Ok(())
    }

    async fn close_pr(&self, number: u64) -> Result<()> {
        let number = number.to_string();
        self.run_gh_ok(&["pr", "close", number.as_str()]).await?;
        Ok(())
    }
}
