//! Issue Scheduler (§4.6): polls on a fixed cadence, deduplicates in-flight
//! issues, and dispatches Phase Executors to a bounded worker pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::executor::PhaseExecutor;
use crate::gateway::ForgeGateway;
use crate::phase::Phase;

pub struct SchedulerConfig {
    pub owner: String,
    pub repo: String,
    pub poll_interval: Duration,
    pub worker_count: usize,
    pub rate_limit_check_every: u32,
}

impl SchedulerConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            poll_interval: Duration::from_secs(5).max(Duration::from_secs(1)),
            worker_count: Self::default_worker_count(),
            rate_limit_check_every: 12,
        }
    }

    fn default_worker_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .clamp(2, 16)
    }
}

/// In-memory dedup registry (mutex-guarded set), keyed by issue number.
#[derive(Default)]
struct InFlightRegistry {
    inner: Mutex<HashSet<u64>>,
}

impl InFlightRegistry {
    /// Attempt to register `issue` as in-flight. Returns `true` if this
    /// call won the registration (the caller should submit an Executor);
    /// `false` means it was already registered.
    async fn try_register(&self, issue: u64) -> bool {
        self.inner.lock().await.insert(issue)
    }

    async fn release(&self, issue: u64) {
        self.inner.lock().await.remove(&issue);
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    gateway: Arc<dyn ForgeGateway>,
    executor: Arc<PhaseExecutor>,
    in_flight: Arc<InFlightRegistry>,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, gateway: Arc<dyn ForgeGateway>, executor: Arc<PhaseExecutor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_count));
        Self {
            config,
            gateway,
            executor,
            in_flight: Arc::new(InFlightRegistry::default()),
            semaphore,
        }
    }

    /// Run the polling loop until `ctx` is cancelled.
    #[instrument(skip(self, ctx))]
    pub async fn run(&self, ctx: &CancellationToken) {
        let mut tick: u64 = 0;
        loop {
            if ctx.is_cancelled() {
                break;
            }

            self.tick(ctx).await;

            tick += 1;
            if tick % self.config.rate_limit_check_every as u64 == 0 {
                self.check_rate_limit(ctx).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = ctx.cancelled() => break,
            }
        }
        info!("scheduler cancelled, draining in-flight workers");
    }

    /// A single poll tick: discover trigger-labeled issues and dispatch
    /// Executors for any not already in flight. Exposed for `--once` / tests.
    pub async fn tick(&self, ctx: &CancellationToken) {
        let trigger_labels: Vec<&str> = Phase::ALL.iter().map(|p| p.trigger_label()).collect();
        let issues = match self
            .gateway
            .list_issues_by_labels(ctx, &self.config.owner, &self.config.repo, &trigger_labels)
            .await
        {
            Ok(issues) => issues,
            Err(err) => {
                warn!(error = %err, "failed to list issues this tick");
                return;
            }
        };

        for issue in issues {
            self.dispatch(ctx, issue.number).await;
        }
    }

    async fn dispatch(&self, ctx: &CancellationToken, issue_number: u64) {
        if !self.in_flight.try_register(issue_number).await {
            return;
        }

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.in_flight.release(issue_number).await;
                return;
            }
        };

        let executor = self.executor.clone();
        let owner = self.config.owner.clone();
        let repo = self.config.repo.clone();
        let in_flight = self.in_flight.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match executor.run(&ctx, &owner, &repo, issue_number).await {
                Ok(outcome) => {
                    info!(issue = issue_number, outcome = %outcome_debug(&outcome), "phase executor finished")
                }
                Err(err) => warn!(issue = issue_number, error = %err, "phase executor failed"),
            }
            in_flight.release(issue_number).await;
        });
    }

    async fn check_rate_limit(&self, ctx: &CancellationToken) {
        match self.gateway.get_rate_limit(ctx).await {
            Ok(status) => {
                if status.core.remaining_fraction() < 0.10 {
                    warn!(
                        remaining = status.core.remaining,
                        limit = status.core.limit,
                        "core rate limit below 10%"
                    );
                }
            }
            Err(err) => warn!(error = %err, "failed to fetch rate limit"),
        }
    }
}

fn outcome_debug(outcome: &crate::executor::ExecutorOutcome) -> String {
    format!("{outcome:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PhaseExecutor;
    use crate::gateway::Issue;
    use crate::labels::LabelStateMachine;
    use crate::phase::PhaseCommand;
    use crate::resources::{WindowManager, WorkspaceManager};
    use crate::testutil::FakeGateway;

    fn make_scheduler(fake: FakeGateway, tmp: &std::path::Path) -> Scheduler {
        let gateway: Arc<dyn ForgeGateway> = Arc::new(fake);
        let executor = Arc::new(PhaseExecutor {
            state_machine: Arc::new(LabelStateMachine::new(gateway.clone())),
            workspaces: Arc::new(WorkspaceManager::new("git", tmp.to_path_buf(), tmp.join("worktrees"))),
            windows: Arc::new(WindowManager::new("__nonexistent_tmux_binary_for_tests__", "osoba-test")),
            command: PhaseCommand::new("echo {issue}"),
            base_branch: "main".to_string(),
        });
        let mut config = SchedulerConfig::new("o", "r");
        config.worker_count = 4;
        Scheduler::new(config, gateway, executor)
    }

    #[tokio::test]
    async fn dedup_registers_issue_only_once_p4_analog() {
        let fake = FakeGateway::new();
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = make_scheduler(fake, tmp.path());
        let ctx = CancellationToken::new();

        let first = scheduler.in_flight.try_register(7).await;
        let second = scheduler.in_flight.try_register(7).await;
        assert!(first);
        assert!(!second);
        scheduler.in_flight.release(7).await;
        let _ = ctx;
    }

    #[tokio::test]
    async fn tick_skips_issues_already_in_flight() {
        let fake = FakeGateway::new();
        fake.seed_issues(vec![Issue {
            number: 7,
            title: "x".into(),
            labels: vec!["needs-plan".into()],
            state: "OPEN".into(),
            body: String::new(),
            url: None,
        }]);
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = make_scheduler(fake, tmp.path());
        let ctx = CancellationToken::new();

        scheduler.in_flight.try_register(7).await;
        scheduler.tick(&ctx).await;
        // issue 7 was already in flight, so no new task should have run to
        // completion and released it; the registry still holds it.
        assert!(!scheduler.in_flight.try_register(7).await);
        scheduler.in_flight.release(7).await;
    }
}
