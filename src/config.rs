//! Configuration Loader (§4.10): resolves the orchestrator's runtime
//! configuration from CLI flags, environment variables, and an optional
//! `osoba.toml`, in that order of precedence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct Config {
    pub owner: String,
    pub repo: String,
    pub poll_interval: Duration,
    pub worker_count: usize,
    pub rate_limit_check_every: u32,
    pub session_name: String,
    pub workspace_root: PathBuf,
    pub base_branch: String,
    pub gh_bin: String,
    pub git_bin: String,
    pub tmux_bin: String,
    pub claude_bin: String,
    pub purge_stale_on_shutdown: bool,
}

/// The on-disk `osoba.toml` layer; every field optional since CLI/env may
/// supply it instead.
#[derive(Debug, Default, Deserialize)]
struct TomlLayer {
    owner: Option<String>,
    repo: Option<String>,
    poll_interval_secs: Option<u64>,
    worker_count: Option<usize>,
    rate_limit_check_every: Option<u32>,
    session_name: Option<String>,
    workspace_root: Option<PathBuf>,
    base_branch: Option<String>,
    gh_bin: Option<String>,
    git_bin: Option<String>,
    tmux_bin: Option<String>,
    claude_bin: Option<String>,
    purge_stale_on_shutdown: Option<bool>,
}

/// CLI-supplied overrides; `None` means "not specified on the command line".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub worker_count: Option<usize>,
    pub workspace_root: Option<PathBuf>,
    pub base_branch: Option<String>,
}

impl Config {
    /// Load configuration with precedence CLI > env > `osoba.toml` >
    /// built-in defaults (§4.10).
    pub fn load(project_dir: &std::path::Path, cli: CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("failed to resolve project directory")?;
        let toml_layer = Self::read_toml_layer(&project_dir)?;

        let owner = cli
            .owner
            .or_else(|| std::env::var("OSOBA_FORGE_OWNER").ok())
            .or(toml_layer.owner)
            .context("owner not specified via --owner, OSOBA_FORGE_OWNER, or osoba.toml")?;

        let repo = cli
            .repo
            .or_else(|| std::env::var("OSOBA_FORGE_REPO").ok())
            .or(toml_layer.repo)
            .context("repo not specified via --repo, OSOBA_FORGE_REPO, or osoba.toml")?;

        let poll_interval_secs = cli
            .poll_interval_secs
            .or_else(|| std::env::var("OSOBA_FORGE_POLL_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()))
            .or(toml_layer.poll_interval_secs)
            .unwrap_or(5)
            .max(1);

        let worker_count = cli
            .worker_count
            .or_else(|| std::env::var("OSOBA_FORGE_WORKERS").ok().and_then(|v| v.parse().ok()))
            .or(toml_layer.worker_count)
            .unwrap_or_else(Self::default_worker_count)
            .clamp(2, 16);

        let workspace_root = cli
            .workspace_root
            .or(toml_layer.workspace_root)
            .unwrap_or_else(|| project_dir.join(".vcs/osoba/worktrees"));

        let base_branch = cli
            .base_branch
            .or_else(|| std::env::var("OSOBA_FORGE_BASE_BRANCH").ok())
            .or(toml_layer.base_branch)
            .unwrap_or_else(|| "main".to_string());

        Ok(Self {
            owner,
            repo,
            poll_interval: Duration::from_secs(poll_interval_secs),
            worker_count,
            rate_limit_check_every: toml_layer.rate_limit_check_every.unwrap_or(12),
            session_name: toml_layer.session_name.unwrap_or_else(|| "osoba".to_string()),
            workspace_root,
            base_branch,
            gh_bin: toml_layer.gh_bin.unwrap_or_else(|| "gh".to_string()),
            git_bin: toml_layer.git_bin.unwrap_or_else(|| "git".to_string()),
            tmux_bin: toml_layer.tmux_bin.unwrap_or_else(|| "tmux".to_string()),
            claude_bin: toml_layer.claude_bin.unwrap_or_else(|| "claude".to_string()),
            purge_stale_on_shutdown: toml_layer.purge_stale_on_shutdown.unwrap_or(false),
        })
    }

    fn read_toml_layer(project_dir: &std::path::Path) -> Result<TomlLayer> {
        let path = project_dir.join("osoba.toml");
        if !path.exists() {
            return Ok(TomlLayer::default());
        }
        let contents = std::fs::read_to_string(&path).context("failed to read osoba.toml")?;
        toml::from_str(&contents).context("failed to parse osoba.toml")
    }

    fn default_worker_count() -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
    }

    pub fn phase_command_template(&self) -> String {
        format!(
            "{} --cwd {{workspace}} --issue {{issue}} --phase {{phase}}",
            self.claude_bin
        )
    }
}
