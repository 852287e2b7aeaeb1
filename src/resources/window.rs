//! Window reservation: per-(issue, phase) terminal-multiplexer windows,
//! grounded on the tmux subprocess-invocation idiom (`Command::new("tmux")`,
//! one argument per `.arg()`, status/output inspected per call) adapted to
//! this crate's async `tokio::process::Command` convention.

use std::process::Stdio;

use regex::Regex;
use tokio::process::Command;
use tracing::warn;

use crate::errors::ResourceError;
use crate::phase::Phase;

/// A parsed `list-windows -F '#{window_index}:#{window_name}:#{window_active}:#{window_panes}'` record.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRecord {
    pub index: u32,
    pub name: String,
    pub active: bool,
    pub panes: u32,
}

/// `parseWindowName` (§4.4): matches `<digits>-<phase>` (canonical) or
/// `issue-<digits>` (legacy, phase unknown). `None` means `ok=false`.
pub fn parse_window_name(name: &str) -> Option<(u64, Option<Phase>)> {
    static CANONICAL: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    static LEGACY: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let canonical = CANONICAL.get_or_init(|| Regex::new(r"^(\d+)-(plan|implement|review)$").unwrap());
    let legacy = LEGACY.get_or_init(|| Regex::new(r"^issue-(\d+)$").unwrap());

    if let Some(caps) = canonical.captures(name) {
        let number: u64 = caps[1].parse().ok()?;
        let phase = Phase::from_slug(&caps[2])?;
        return Some((number, Some(phase)));
    }
    if let Some(caps) = legacy.captures(name) {
        let number: u64 = caps[1].parse().ok()?;
        return Some((number, None));
    }
    None
}

/// `format(N, phase)` — the canonical window name a reservation creates.
pub fn format_window_name(issue: u64, phase: Phase) -> String {
    format!("{issue}-{}", phase.slug())
}

pub struct WindowManager {
    pub tmux_bin: String,
    pub session: String,
}

impl WindowManager {
    pub fn new(tmux_bin: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            session: session.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ResourceError> {
        Command::new(&self.tmux_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ResourceError::Multiplexer(e.into()))
    }

    /// List windows in the configured session, parsed into `WindowRecord`s.
    /// A missing session is reported as an empty list, not an error.
    pub async fn list_windows(&self) -> Result<Vec<WindowRecord>, ResourceError> {
        self.list_windows_in(&self.session).await
    }

    /// List windows in an arbitrary session (diagnostics over a session
    /// other than the one this manager launches into). A missing session
    /// is reported as an empty list, not an error.
    pub async fn list_windows_in(&self, session: &str) -> Result<Vec<WindowRecord>, ResourceError> {
        let output = match self
            .run(&[
                "list-windows",
                "-t",
                session,
                "-F",
                "#{window_index}:#{window_name}:#{window_active}:#{window_panes}",
            ])
            .await
        {
            Ok(output) => output,
            // A missing session (or, in tests, no multiplexer binary at all)
            // is data, not failure, for list operations.
            Err(_) => return Ok(Vec::new()),
        };

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(4, ':');
                let index: u32 = parts.next()?.parse().ok()?;
                let name = parts.next()?.to_string();
                let active = parts.next()? == "1";
                let panes: u32 = parts.next()?.parse().ok()?;
                Some(WindowRecord { index, name, active, panes })
            })
            .collect())
    }

    /// List session names on the multiplexer server. No server running (or,
    /// in tests, no multiplexer binary at all) is an empty list, not an error.
    pub async fn list_sessions(&self) -> Result<Vec<String>, ResourceError> {
        let output = match self.run(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(output) => output,
            Err(_) => return Ok(Vec::new()),
        };

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(|line| line.to_string()).collect())
    }

    /// Reserve a window for `(issue, phase)`. Returns `WindowAlreadyExists`
    /// if one is already open — the distributed lockout against a
    /// concurrent Executor for the same phase (§4.4).
    pub async fn reserve(&self, issue: u64, phase: Phase, cwd: &std::path::Path) -> Result<String, ResourceError> {
        let windows = self.list_windows().await?;
        let target_name = format_window_name(issue, phase);
        if windows.iter().any(|w| match parse_window_name(&w.name) {
            Some((n, Some(p))) => n == issue && p == phase,
            _ => false,
        }) {
            return Err(ResourceError::WindowAlreadyExists {
                issue,
                phase: phase.slug().to_string(),
            });
        }

        let target = format!("{}:", self.session);
        let output = self
            .run(&[
                "new-window",
                "-t",
                &target,
                "-n",
                &target_name,
                "-c",
                &cwd.display().to_string(),
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ResourceError::WindowCreateFailed {
                issue,
                phase: phase.slug().to_string(),
                source: anyhow::anyhow!(stderr),
            });
        }

        Ok(target_name)
    }

    /// Send a command line into the named window, as a detached launch
    /// (§9 "Detached child processes" — the orchestrator does not hold a
    /// child handle; the window itself is the only handle).
    pub async fn send_keys(&self, window_name: &str, command_line: &str) -> Result<(), ResourceError> {
        let target = format!("{}:{}", self.session, window_name);
        let output = self.run(&["send-keys", "-t", &target, command_line, "C-m"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ResourceError::Multiplexer(anyhow::anyhow!(stderr)));
        }
        Ok(())
    }

    /// Close each named window, logging per-window failures without
    /// failing the batch (§4.4 Release, §4.7 step 1).
    pub async fn kill_windows(&self, names: &[String]) {
        for name in names {
            let target = format!("{}:{}", self.session, name);
            match self.run(&["kill-window", "-t", &target]).await {
                Ok(output) if !output.status.success() => {
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    warn!(window = %name, error = %stderr.trim(), "kill-window failed, continuing");
                }
                Err(err) => warn!(window = %name, error = %err, "kill-window failed, continuing"),
                Ok(_) => {}
            }
        }
    }
}
