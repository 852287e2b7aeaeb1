//! Forge Command Gateway: a typed, testable surface over the forge CLI.
//!
//! `ForgeGateway` is the trait every other component depends on.
//! `GhGateway` shells out to `gh`; `#[cfg(test)]` fakes (see `crate::testutil`)
//! substitute it for unit tests.

mod classify;
mod gh;

pub use classify::classify_error;
pub use gh::GhGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ForgeError;

/// An open issue as surfaced by `list_issues_by_labels`/`list_all_open_issues`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub body: String,
    pub url: Option<String>,
}

/// One bucket of `gh api rate_limit`'s `resources.*`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub limit: u64,
    pub remaining: u64,
    pub reset_epoch_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitStatus {
    pub core: RateLimitBucket,
    pub search: RateLimitBucket,
    pub graphql: RateLimitBucket,
}

impl RateLimitBucket {
    /// Fraction of the bucket remaining, in `[0.0, 1.0]`. Zero-limit buckets
    /// report `1.0` (nothing to warn about).
    pub fn remaining_fraction(&self) -> f64 {
        if self.limit == 0 {
            1.0
        } else {
            self.remaining as f64 / self.limit as f64
        }
    }
}

/// A required label's desired appearance, used by `ensure_labels`.
#[derive(Debug, Clone)]
pub struct LabelSpec {
    pub name: &'static str,
    pub color: &'static str,
    pub description: &'static str,
}

pub const REQUIRED_LABELS: &[LabelSpec] = &[
    LabelSpec { name: "needs-plan", color: "fbca04", description: "Ready for planning" },
    LabelSpec { name: "ready", color: "0e8a16", description: "Plan approved, ready to implement" },
    LabelSpec { name: "review-requested", color: "1d76db", description: "Implementation ready for review" },
    LabelSpec { name: "planning", color: "fef2c0", description: "Planning in progress" },
    LabelSpec { name: "implementing", color: "c2e0c6", description: "Implementation in progress" },
    LabelSpec { name: "reviewing", color: "bfd4f2", description: "Review in progress" },
];

#[async_trait]
pub trait ForgeGateway: Send + Sync {
    async fn list_issues_by_labels(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        labels: &[&str],
    ) -> Result<Vec<Issue>, ForgeError>;

    async fn list_all_open_issues(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<Issue>, ForgeError>;

    async fn get_issue_labels(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>, ForgeError>;

    async fn add_label(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ForgeError>;

    async fn remove_label(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ForgeError>;

    async fn create_issue_comment(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ForgeError>;

    async fn ensure_labels(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<(), ForgeError>;

    async fn get_rate_limit(&self, ctx: &CancellationToken) -> Result<RateLimitStatus, ForgeError>;

    async fn get_pull_request_for_issue(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<u64>, ForgeError>;

    async fn preflight(&self, ctx: &CancellationToken) -> Result<(), ForgeError>;
}
