//! Label State Machine (§4.3): enumerates labels, enforces
//! trigger→in-progress transitions, and tolerates races across concurrent
//! orchestrator instances since the forge's label set has no transactions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::errors::{ErrorKind, ForgeError};
use crate::gateway::ForgeGateway;
use crate::phase::Phase;
use crate::retry::{retry, select_strategy, RetryStrategy};

/// The result of a successful transition (§3 `TransitionInfo`).
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionInfo {
    pub from: &'static str,
    pub to: &'static str,
}

/// Scan order for trigger labels (§4.3 step 3).
const TRIGGER_SCAN_ORDER: [Phase; 3] = [Phase::Plan, Phase::Implement, Phase::Review];

pub struct LabelStateMachine {
    gateway: Arc<dyn ForgeGateway>,
}

impl LabelStateMachine {
    pub fn new(gateway: Arc<dyn ForgeGateway>) -> Self {
        Self { gateway }
    }

    /// `transition(owner, repo, issue_number) -> (moved, info)` per §4.3.
    ///
    /// The first attempt runs unguarded so its error's `kind` can select the
    /// retry strategy (§4.3: "run under `retry` with the strategy selected
    /// from the first error encountered"); if that attempt succeeds or is
    /// non-retryable, no further calls are made.
    #[instrument(skip(self, ctx), fields(issue = issue_number))]
    pub async fn transition(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> Result<(bool, Option<TransitionInfo>), ForgeError> {
        let first = self_transition_once(&self.gateway, ctx, owner, repo, issue_number).await;
        let first_err = match first {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };

        let Some(strategy) = select_strategy(first_err.kind) else {
            return Err(first_err);
        };

        let gateway = self.gateway.clone();
        let owner = owner.to_string();
        let repo = repo.to_string();
        retry(ctx, strategy, move || {
            let gateway = gateway.clone();
            let owner = owner.clone();
            let repo = repo.clone();
            async move { self_transition_once(&gateway, ctx, &owner, &repo, issue_number).await }
        })
        .await
    }

    /// `ensureLabelsExist` (§4.3): runs under the Default strategy.
    #[instrument(skip(self, ctx))]
    pub async fn ensure_labels_exist(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<(), ForgeError> {
        let gateway = self.gateway.clone();
        let owner = owner.to_string();
        let repo = repo.to_string();
        retry(ctx, RetryStrategy::DEFAULT, move || {
            let gateway = gateway.clone();
            let owner = owner.clone();
            let repo = repo.clone();
            async move { gateway.ensure_labels(ctx, &owner, &repo).await }
        })
        .await
    }
}

async fn self_transition_once(
    gateway: &Arc<dyn ForgeGateway>,
    ctx: &CancellationToken,
    owner: &str,
    repo: &str,
    issue_number: u64,
) -> Result<(bool, Option<TransitionInfo>), ForgeError> {
    let labels = gateway.get_issue_labels(ctx, owner, repo, issue_number).await?;

    // Step 2: already in progress -> idempotent skip (P3).
    if Phase::ALL
        .into_iter()
        .any(|p| labels.iter().any(|l| l == p.in_progress_label()))
    {
        return Ok((false, None));
    }

    // Step 3: scan in the fixed deterministic order.
    for phase in TRIGGER_SCAN_ORDER {
        let trigger = phase.trigger_label();
        if !labels.iter().any(|l| l == trigger) {
            continue;
        }

        let target = phase.in_progress_label();

        match gateway.remove_label(ctx, owner, repo, issue_number, trigger).await {
            Ok(()) => {}
            Err(err) if err.kind == ErrorKind::NotFound => {
                // Another instance won the race on the removal; proceed as if
                // we'd removed it ourselves.
                warn!(issue = issue_number, trigger, "trigger label already removed by a concurrent instance");
            }
            Err(err) => return Err(err),
        }

        if let Err(add_err) = gateway.add_label(ctx, owner, repo, issue_number, target).await {
            // Best-effort rollback, not retried.
            if let Err(rollback_err) = gateway.add_label(ctx, owner, repo, issue_number, trigger).await {
                warn!(issue = issue_number, trigger, error = %rollback_err, "rollback add_label failed");
            }
            return Err(add_err);
        }

        info!(issue = issue_number, from = trigger, to = target, "transitioned issue");
        return Ok((
            true,
            Some(TransitionInfo { from: trigger, to: target }),
        ));
    }

    // Step 4: no trigger found.
    Ok((false, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeGateway;

    #[tokio::test]
    async fn single_trigger_transitions_to_planning() {
        let fake = FakeGateway::new();
        fake.set_labels(42, vec!["needs-plan".into(), "bug".into()]);
        let sm = LabelStateMachine::new(Arc::new(fake.clone()));
        let ctx = CancellationToken::new();
        let (moved, info) = sm.transition(&ctx, "o", "r", 42).await.unwrap();
        assert!(moved);
        assert_eq!(
            info,
            Some(TransitionInfo { from: "needs-plan", to: "planning" })
        );
        let labels = fake.labels(42);
        assert!(labels.contains(&"planning".to_string()));
        assert!(labels.contains(&"bug".to_string()));
        assert!(!labels.contains(&"needs-plan".to_string()));
    }

    #[tokio::test]
    async fn already_in_progress_is_idempotent_skip_p3() {
        let fake = FakeGateway::new();
        fake.set_labels(43, vec!["planning".into()]);
        let sm = LabelStateMachine::new(Arc::new(fake.clone()));
        let ctx = CancellationToken::new();
        let (moved, info) = sm.transition(&ctx, "o", "r", 43).await.unwrap();
        assert!(!moved);
        assert_eq!(info, None);
        assert_eq!(fake.mutation_count(), 0);
    }

    #[tokio::test]
    async fn lost_race_on_removal_still_succeeds() {
        let fake = FakeGateway::new();
        fake.set_labels(44, vec!["ready".into()]);
        fake.fail_next_remove_label_with_not_found(44, "ready");
        let sm = LabelStateMachine::new(Arc::new(fake.clone()));
        let ctx = CancellationToken::new();
        let (moved, info) = sm.transition(&ctx, "o", "r", 44).await.unwrap();
        assert!(moved);
        assert_eq!(
            info,
            Some(TransitionInfo { from: "ready", to: "implementing" })
        );
    }

    #[tokio::test]
    async fn no_trigger_present_returns_false_none() {
        let fake = FakeGateway::new();
        fake.set_labels(50, vec!["bug".into(), "documentation".into()]);
        let sm = LabelStateMachine::new(Arc::new(fake.clone()));
        let ctx = CancellationToken::new();
        let (moved, info) = sm.transition(&ctx, "o", "r", 50).await.unwrap();
        assert!(!moved);
        assert_eq!(info, None);
    }

    #[tokio::test]
    async fn scan_order_prefers_needs_plan_over_ready() {
        let fake = FakeGateway::new();
        fake.set_labels(51, vec!["ready".into(), "needs-plan".into()]);
        let sm = LabelStateMachine::new(Arc::new(fake.clone()));
        let ctx = CancellationToken::new();
        let (_, info) = sm.transition(&ctx, "o", "r", 51).await.unwrap();
        assert_eq!(info.unwrap().from, "needs-plan");
    }

    #[tokio::test]
    async fn add_label_failure_rolls_back_trigger() {
        let fake = FakeGateway::new();
        fake.set_labels(60, vec!["needs-plan".into()]);
        fake.fail_next_add_label(60, "planning");
        let sm = LabelStateMachine::new(Arc::new(fake.clone()));
        let ctx = CancellationToken::new();
        let result = sm.transition(&ctx, "o", "r", 60).await;
        assert!(result.is_err());
        assert!(fake.labels(60).contains(&"needs-plan".to_string()));
    }
}
