//! Scripted in-memory forge for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{Error, Result};
use crate::metadata::{PrRecord, PrState};

use super::{Forge, MergeMethod, PrOptions};

#[derive(Default)]
pub struct MockForge {
    prs: Mutex<HashMap<String, PrRecord>>,
    next_number: Mutex<u64>,
    /// Recorded calls, for assertions: (operation, argument).
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockForge {
    pub fn new() -> Self {
        Self {
            next_number: Mutex::new(1),
            ..Default::default()
        }
    }

    pub fn add_pr(&self, branch: &str, pr: PrRecord) {
        self.prs.lock().unwrap().insert(branch.to_string(), pr);
    }

    fn record(&self, op: &str, arg: String) {
        self.calls.lock().unwrap().push((op.to_string(), arg));
    }

    fn with_pr_number<F>(&self, number: u64, f: F) -> Result<()>
    where
        F: FnOnce(&mut PrRecord),
    {
        let mut prs = self.prs.lock().unwrap();
        for pr in prs.values_mut() {
            if pr.number == number {
                f(pr);
                return Ok(());
            }
        }
        Err(Error::Forge(format!("no PR #{}", number)))
    }
}

#[async_trait]
impl Forge for MockForge {
    async fn pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>> {
        self.record("pr_for_branch", branch.to_string());
        Ok(self.prs.lock().unwrap().get(branch).cloned())
    }

    async fn create_pr(&self, branch: &str, base: &str, options: &PrOptions) -> Result<PrRecord> {
        self.record("create_pr", format!("{} -> {}", branch, base));
        let mut next = self.next_number.lock().unwrap();
        let number = *next;
        *next += 1;
        let pr = PrRecord {
            number,
            url: format!("https://mock.forge/pull/{}", number),
            state: PrState::Open,
            is_draft: options.draft,
            checks: crate::metadata::ChecksStatus::None,
            last_pushed_sha: None,
        };
        self.prs
            .lock()
            .unwrap()
            .insert(branch.to_string(), pr.clone());
        Ok(pr)
    }

    async fn update_pr_base(&self, number: u64, new_base: &str) -> Result<()> {
        self.record("update_pr_base", format!("#{} -> {}", number, new_base));
        self.with_pr_number(number, |_| {})
    }

    async fn update_pr_body(&self, number: u64, _body: &str) -> Result<()> {
        self.record("update_pr_body", format!("#{}", number));
        self.with_pr_number(number, |_| {})
    }

    async fn mark_ready(&self, number: u64) -> Result<()> {
        self.record("mark_ready", format!("#{}", number));
        self.with_pr_number(number, |pr| pr.is_draft = false)
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()> {
        self.record("merge_pr", format!("#{} ({})", number, method.as_str()));
        self.with_pr_number(number, |pr| pr.state = PrState::Merged)
    }

    async fn close_pr(&self, number: u64) -> Result<()> {
        self.record("close_pr", format!("#{}", number));
        self.with_pr_number(number, |pr| pr.state = PrState::Closed)
    }
}
