//! The merge planner.
//!
//! Computes a validated, ordered plan for landing a stack against the forge.
//! Planning is pure: PR lookups happen before, execution happens after, both
//! in the command layer. Two strategies:
//!
//! - **bottom-up**: merge each PR lowest-first, retargeting dependents after
//!   every merge, then restack whatever is left onto trunk;
//! - **top-down**: squash the whole stack into the topmost PR, close the
//!   intermediate PRs, merge once, restack the upstack onto trunk.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::metadata::{ChecksStatus, PrRecord, PrState};

/// How the stack lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    BottomUp,
    TopDown,
}

impl std::str::FromStr for MergeStrategy {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bottom-up" => Ok(Self::BottomUp),
            "top-down" | "squash" => Ok(Self::TopDown),
            _ => Err(crate::errors::Error::Other(anyhow::anyhow!(
                "unknown merge strategy '{}' (expected bottom-up or top-down)",
                s
            ))),
        }
    }
}

/// One step of a merge plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    MergePr { branch: String, number: u64 },
    RetargetPr { branch: String, number: u64, new_base: String },
    SquashIntoTarget { branches: Vec<String>, target: String, close_prs: Vec<u64> },
    RestackUpstack { branches: Vec<String> },
}

/// A validated, ordered merge plan.
#[derive(Debug, Clone, Serialize)]
pub struct MergePlan {
    pub strategy: MergeStrategy,
    pub steps: Vec<PlanStep>,
    /// Branches left unmerged, to be restacked onto trunk at the end.
    pub upstack_branches: Vec<String>,
}

/// Outcome of plan validation.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
}

impl Validation {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Per-branch input to planning: the local tip plus whatever the forge knows.
#[derive(Debug, Clone)]
pub struct BranchStatus {
    pub local_tip: String,
    pub pr: Option<PrRecord>,
}

/// Readiness of one branch to merge.
#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    Ready,
    /// Already merged on the forge; nothing to do.
    Skip,
    Blocked,
}

fn classify(
    branch: &str,
    status: &BranchStatus,
    force: bool,
    validation: &mut Validation,
) -> Readiness {
    let Some(pr) = &status.pr else {
        if force {
            validation
                .warnings
                .push(format!("'{}' has no PR; --force merges it anyway", branch));
            return Readiness::Ready;
        }
        validation
            .errors
            .push(format!("'{}' has no PR (submit it first)", branch));
        return Readiness::Blocked;
    };

    match pr.state {
        PrState::Merged => {
            validation
                .infos
                .push(format!("'{}' (#{}) already merged; skipping", branch, pr.number));
            return Readiness::Skip;
        }
        PrState::Closed => {
            validation.errors.push(format!(
                "'{}' (#{}) is closed; reopen or untrack it",
                branch, pr.number
            ));
            return Readiness::Blocked;
        }
        PrState::Open => {}
    }

    let mut blocked = false;
    if pr.is_draft {
        if force {
            validation
                .warnings
                .push(format!("'{}' (#{}) is a draft", branch, pr.number));
        } else {
            validation
                .errors
                .push(format!("'{}' (#{}) is a draft", branch, pr.number));
            blocked = true;
        }
    }

    match pr.checks {
        ChecksStatus::Success | ChecksStatus::None => {}
        ChecksStatus::Pending => {
            validation
                .warnings
                .push(format!("'{}' (#{}) has checks still running", branch, pr.number));
        }
        ChecksStatus::Failure => {
            validation
                .warnings
                .push(format!("'{}' (#{}) has failing checks", branch, pr.number));
        }
    }

    match &pr.last_pushed_sha {
        Some(pushed) if pushed == &status.local_tip => {}
        Some(_) => {
            if force {
                validation.warnings.push(format!(
                    "'{}' has local commits that were never pushed",
                    branch
                ));
            } else {
                validation.errors.push(format!(
                    "'{}' has local commits that were never pushed (submit first)",
                    branch
                ));
                blocked = true;
            }
        }
        None => {
            validation
                .warnings
                .push(format!("'{}' has no recorded pushed tip", branch));
        }
    }

    if blocked {
        Readiness::Blocked
    } else {
        Readiness::Ready
    }
}

/// Compute a merge plan for `stack` (bottom-up order, trunk excluded) given
/// the per-branch statuses. `upstack` lists tracked branches above the stack
/// that will need restacking onto trunk afterwards.
pub fn compute_plan(
    trunk: &str,
    stack: &[String],
    upstack: &[String],
    statuses: &BTreeMap<String, BranchStatus>,
    strategy: MergeStrategy,
    force: bool,
) -> (MergePlan, Validation) {
    let mut validation = Validation::default();
    let mut steps = Vec::new();

    if stack.is_empty() {
        validation.errors.push("nothing to merge".to_string());
        return (
            MergePlan {
                strategy,
                steps,
                upstack_branches: upstack.to_vec(),
            },
            validation,
        );
    }

    let mut mergeable: Vec<(&String, &PrRecord)> = Vec::new();
    let mut blocked_below = false;
    for branch in stack {
        let Some(status) = statuses.get(branch) else {
            validation
                .errors
                .push(format!("no status available for '{}'", branch));
            blocked_below = true;
            continue;
        };
        match classify(branch, status, force, &mut validation) {
            Readiness::Ready => {
                if blocked_below {
                    // A stack merges bottom-up; a hole in the middle blocks
                    // everything above it.
                    validation.errors.push(format!(
                        "'{}' is ready but a branch below it is not",
                        branch
                    ));
                } else if let Some(pr) = &status.pr {
                    mergeable.push((branch, pr));
                } else {
                    // --force with no PR: cannot merge through the forge.
                    validation.errors.push(format!(
                        "'{}' cannot be merged without a PR",
                        branch
                    ));
                    blocked_below = true;
                }
            }
            Readiness::Skip => {}
            Readiness::Blocked => blocked_below = true,
        }
    }

    match strategy {
        MergeStrategy::BottomUp => {
            for (i, (branch, pr)) in mergeable.iter().enumerate() {
                steps.push(PlanStep::MergePr {
                    branch: (*branch).clone(),
                    number: pr.number,
                });
                // After this PR lands, the next one's base moves to trunk.
                if let Some((next_branch, next_pr)) = mergeable.get(i + 1) {
                    steps.push(PlanStep::RetargetPr {
                        branch: (*next_branch).clone(),
                        number: next_pr.number,
                        new_base: trunk.to_string(),
                    });
                }
            }
        }
        MergeStrategy::TopDown => {
            if let Some((target_branch, target_pr)) = mergeable.last() {
                let branches: Vec<String> =
                    mergeable.iter().map(|(b, _)| (*b).clone()).collect();
                let close_prs: Vec<u64> = mergeable
                    .iter()
                    .take(mergeable.len() - 1)
                    .map(|(_, pr)| pr.number)
                    .collect();
                if branches.len() > 1 {
                    steps.push(PlanStep::SquashIntoTarget {
                        branches,
                        target: (*target_branch).clone(),
                        close_prs,
                    });
                }
                steps.push(PlanStep::MergePr {
                    branch: (*target_branch).clone(),
                    number: target_pr.number,
                });
            }
        }
    }

    if !upstack.is_empty() {
        steps.push(PlanStep::RestackUpstack {
            branches: upstack.to_vec(),
        });
    }

    (
        MergePlan {
            strategy,
            steps,
            upstack_branches: upstack.to_vec(),
        },
        validation,
    )
}
