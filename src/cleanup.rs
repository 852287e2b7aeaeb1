//! Cleanup Manager (§4.7): on completion or abandonment of an issue,
//! reclaims all resources bound to that issue.

use std::sync::Arc;

use tracing::instrument;

use crate::resources::{parse_window_name, WindowManager, WorkspaceManager};

pub struct CleanupManager {
    pub windows: Arc<WindowManager>,
    pub workspaces: Arc<WorkspaceManager>,
}

impl CleanupManager {
    pub fn new(windows: Arc<WindowManager>, workspaces: Arc<WorkspaceManager>) -> Self {
        Self { windows, workspaces }
    }

    /// `cleanupIssueResources(issue_number)` (§4.7): close all matching
    /// windows as a batch, then remove the workspace checkout. Both steps
    /// tolerate missing resources as success.
    #[instrument(skip(self), fields(issue = issue_number))]
    pub async fn cleanup_issue_resources(&self, issue_number: u64) -> Result<(), anyhow::Error> {
        let all_windows = self.windows.list_windows().await?;
        let matching: Vec<String> = all_windows
            .into_iter()
            .filter(|w| matches!(parse_window_name(&w.name), Some((n, _)) if n == issue_number))
            .map(|w| w.name)
            .collect();

        self.windows.kill_windows(&matching).await;
        self.workspaces.remove(issue_number).await?;
        Ok(())
    }
}
