//! Workspace reservation: a version-control checkout rooted at a
//! deterministic path derived from the issue number, grounded on this
//! crate's git-worktree CLI invocation idiom (`git worktree add`/`remove
//! --force`, shelled via `tokio::process::Command`).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::ResourceError;

pub struct WorkspaceManager {
    pub git_bin: String,
    pub repo_root: PathBuf,
    pub workspace_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(git_bin: impl Into<String>, repo_root: PathBuf, workspace_root: PathBuf) -> Self {
        Self {
            git_bin: git_bin.into(),
            repo_root,
            workspace_root,
        }
    }

    /// The canonical, deterministic path for issue `N`'s workspace
    /// (`worktrees/issue-<N>`, §3 and the §9 Open Question resolution).
    pub fn canonical_path(&self, issue: u64) -> PathBuf {
        self.workspace_root.join(format!("issue-{issue}"))
    }

    /// The legacy bare-number layout, recognized on discovery but never
    /// created (§9).
    pub fn legacy_path(&self, issue: u64) -> PathBuf {
        self.workspace_root
            .parent()
            .unwrap_or(&self.workspace_root)
            .join(issue.to_string())
    }

    /// Ensure a checkout exists for the issue's branch, reusing an existing
    /// healthy one. Idempotent.
    pub async fn reserve(&self, issue: u64, base_branch: &str) -> Result<PathBuf, ResourceError> {
        let path = self.canonical_path(issue);
        if path.exists() {
            info!(issue, path = %path.display(), "reusing existing workspace");
            return Ok(path);
        }
        if let Some(legacy) = Some(self.legacy_path(issue)).filter(|p| p.exists()) {
            info!(issue, path = %legacy.display(), "reusing legacy workspace");
            return Ok(legacy);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ResourceError::WorkspaceCreateFailed {
                    path: path.clone(),
                    source: e.into(),
                })?;
        }

        let branch_name = format!("issue-{issue}");
        let output = Command::new(&self.git_bin)
            .args(["worktree", "add", "-b", &branch_name])
            .arg(&path)
            .arg(base_branch)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ResourceError::WorkspaceCreateFailed {
                path: path.clone(),
                source: e.into(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ResourceError::WorkspaceCreateFailed {
                path,
                source: anyhow::anyhow!(stderr),
            });
        }

        info!(issue, path = %path.display(), "created workspace");
        Ok(path)
    }

    /// Remove the workspace at its deterministic path with `--force`;
    /// "not a worktree" and missing paths are tolerated (§4.7, §7).
    pub async fn remove(&self, issue: u64) -> Result<(), ResourceError> {
        self.remove_path(&self.canonical_path(issue)).await
    }

    async fn remove_path(&self, path: &Path) -> Result<(), ResourceError> {
        if !path.exists() {
            warn!(path = %path.display(), "workspace already absent, nothing to remove");
            return Ok(());
        }

        let output = Command::new(&self.git_bin)
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ResourceError::Multiplexer(e.into()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.to_lowercase().contains("not a worktree") {
                warn!(path = %path.display(), "path is not a worktree, treating removal as success");
                return Ok(());
            }
            warn!(path = %path.display(), error = %stderr.trim(), "workspace removal failed, continuing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn canonical_path_uses_issue_worktrees_layout() {
        let mgr = WorkspaceManager::new("git", PathBuf::from("/repo"), PathBuf::from("/repo/worktrees"));
        assert_eq!(mgr.canonical_path(42), PathBuf::from("/repo/worktrees/issue-42"));
    }

    #[test]
    fn legacy_path_is_bare_number_one_level_up() {
        let mgr = WorkspaceManager::new("git", PathBuf::from("/repo"), PathBuf::from("/repo/worktrees"));
        assert_eq!(mgr.legacy_path(42), PathBuf::from("/repo/42"));
    }

    #[tokio::test]
    async fn remove_on_missing_path_succeeds() {
        let dir = tempdir().unwrap();
        let mgr = WorkspaceManager::new("git", dir.path().to_path_buf(), dir.path().join("worktrees"));
        let result = mgr.remove(999).await;
        assert!(result.is_ok());
    }
}
