//! In-memory fakes for `ForgeGateway`, used by unit tests throughout the
//! crate. Mirrors the teacher's `TaskRunner`/`MockTaskRunner` split: the
//! trait is the seam, the fake is the test double.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{ErrorKind, ForgeError};
use crate::gateway::{ForgeGateway, Issue, RateLimitStatus};

#[derive(Default)]
struct State {
    labels: HashMap<u64, Vec<String>>,
    issues: Vec<Issue>,
    mutation_count: u32,
    fail_remove_not_found: HashSet<(u64, String)>,
    fail_add: HashSet<(u64, String)>,
    rate_limit: RateLimitStatus,
    comments: Vec<(u64, String)>,
}

/// A fake `ForgeGateway` backed by an in-memory label map. Cheap to clone
/// (shares the same inner state) so tests can hand one handle to the
/// component under test and keep another to assert on.
#[derive(Clone)]
pub struct FakeGateway {
    state: Arc<Mutex<State>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn set_labels(&self, issue: u64, labels: Vec<String>) {
        self.state.lock().unwrap().labels.insert(issue, labels);
    }

    pub fn labels(&self, issue: u64) -> Vec<String> {
        self.state.lock().unwrap().labels.get(&issue).cloned().unwrap_or_default()
    }

    pub fn mutation_count(&self) -> u32 {
        self.state.lock().unwrap().mutation_count
    }

    pub fn fail_next_remove_label_with_not_found(&self, issue: u64, label: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_remove_not_found
            .insert((issue, label.to_string()));
    }

    pub fn fail_next_add_label(&self, issue: u64, label: &str) {
        self.state.lock().unwrap().fail_add.insert((issue, label.to_string()));
    }

    pub fn set_rate_limit(&self, status: RateLimitStatus) {
        self.state.lock().unwrap().rate_limit = status;
    }

    pub fn comments(&self, issue: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .comments
            .iter()
            .filter(|(n, _)| *n == issue)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn seed_issues(&self, issues: Vec<Issue>) {
        self.state.lock().unwrap().issues = issues;
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ForgeGateway for FakeGateway {
    async fn list_issues_by_labels(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
        labels: &[&str],
    ) -> Result<Vec<Issue>, ForgeError> {
        let state = self.state.lock().unwrap();
        let mut seen = std::collections::BTreeMap::new();
        for issue in &state.issues {
            if labels.iter().any(|l| issue.labels.iter().any(|il| il == l)) {
                seen.entry(issue.number).or_insert_with(|| issue.clone());
            }
        }
        Ok(seen.into_values().collect())
    }

    async fn list_all_open_issues(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
    ) -> Result<Vec<Issue>, ForgeError> {
        Ok(self.state.lock().unwrap().issues.clone())
    }

    async fn get_issue_labels(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
        number: u64,
    ) -> Result<Vec<String>, ForgeError> {
        Ok(self.labels(number))
    }

    async fn add_label(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ForgeError> {
        let mut state = self.state.lock().unwrap();
        state.mutation_count += 1;
        if state.fail_add.remove(&(number, label.to_string())) {
            return Err(ForgeError::new(ErrorKind::Unknown, "simulated add_label failure"));
        }
        let entry = state.labels.entry(number).or_default();
        if !entry.iter().any(|l| l == label) {
            entry.push(label.to_string());
        }
        Ok(())
    }

    async fn remove_label(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ForgeError> {
        let mut state = self.state.lock().unwrap();
        state.mutation_count += 1;
        if state.fail_remove_not_found.remove(&(number, label.to_string())) {
            return Err(ForgeError::new(ErrorKind::NotFound, "does not have the label"));
        }
        if let Some(entry) = state.labels.get_mut(&number) {
            entry.retain(|l| l != label);
        }
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        if body.is_empty() {
            return Err(ForgeError::new(ErrorKind::Unknown, "comment body must be non-empty"));
        }
        self.state.lock().unwrap().comments.push((number, body.to_string()));
        Ok(())
    }

    async fn ensure_labels(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
    ) -> Result<(), ForgeError> {
        Ok(())
    }

    async fn get_rate_limit(&self, _ctx: &CancellationToken) -> Result<RateLimitStatus, ForgeError> {
        Ok(self.state.lock().unwrap().rate_limit)
    }

    async fn get_pull_request_for_issue(
        &self,
        _ctx: &CancellationToken,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> Result<Option<u64>, ForgeError> {
        Ok(None)
    }

    async fn preflight(&self, _ctx: &CancellationToken) -> Result<(), ForgeError> {
        Ok(())
    }
}
