//! Phase Executor (§4.5): for a single `(issue, phase)`, transitions the
//! issue, reserves a workspace and a window, and launches the assistant
//! detached inside that window.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::errors::ExecutorError;
use crate::labels::LabelStateMachine;
use crate::phase::{Phase, PhaseCommand};
use crate::resources::{WindowManager, WorkspaceManager};

pub struct PhaseExecutor {
    pub state_machine: Arc<LabelStateMachine>,
    pub workspaces: Arc<WorkspaceManager>,
    pub windows: Arc<WindowManager>,
    pub command: PhaseCommand,
    pub base_branch: String,
}

/// What the Executor actually did, for the Scheduler's logging/metrics.
#[derive(Debug, PartialEq)]
pub enum ExecutorOutcome {
    /// No trigger label, or already in progress (§4.5 step 1 outcome "skip").
    Skipped,
    /// A window already existed for this `(issue, phase)`; aborted without
    /// rolling back the label transition (§4.5 step 3).
    AlreadyRunning { phase: Phase },
    /// The assistant was launched in a freshly reserved window.
    Launched { phase: Phase, window: String },
}

impl PhaseExecutor {
    #[instrument(skip(self, ctx), fields(issue))]
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        issue: u64,
    ) -> Result<ExecutorOutcome, ExecutorError> {
        // Step 1: transition.
        let (moved, info) = self
            .state_machine
            .transition(ctx, owner, repo, issue)
            .await
            .map_err(ExecutorError::from)?;

        let Some(info) = info.filter(|_| moved) else {
            info!(issue, "no trigger label or already in progress, skipping");
            return Ok(ExecutorOutcome::Skipped);
        };

        let phase = Phase::from_in_progress_label(info.to).ok_or_else(|| {
            ExecutorError::LaunchFailed {
                issue,
                phase: info.to.to_string(),
                source: anyhow::anyhow!("unrecognized in-progress label {}", info.to),
            }
        })?;

        // Step 2: reserve workspace (idempotent).
        let workspace = self
            .workspaces
            .reserve(issue, &self.base_branch)
            .await?;

        // Step 3: reserve window; abort without rollback if already taken.
        let window = match self.windows.reserve(issue, phase, &workspace).await {
            Ok(window) => window,
            Err(crate::errors::ResourceError::WindowAlreadyExists { .. }) => {
                warn!(issue, %phase, "window already exists, aborting without rollback");
                return Ok(ExecutorOutcome::AlreadyRunning { phase });
            }
            Err(err) => return Err(err.into()),
        };

        // Step 4: launch the assistant detached; we do not wait for it.
        let command_line = self.command.render(&workspace, issue, phase);
        self.windows
            .send_keys(&window, &command_line)
            .await
            .map_err(|e| ExecutorError::LaunchFailed {
                issue,
                phase: phase.slug().to_string(),
                source: e.into(),
            })?;

        // Step 5: record the launch.
        info!(issue, from = info.from, to = info.to, window, "launched assistant");

        Ok(ExecutorOutcome::Launched { phase, window })
    }
}
