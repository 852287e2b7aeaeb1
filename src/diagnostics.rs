//! Observability Surface (§4.8): read-only diagnostics over multiplexer
//! state. Session-not-found is data, not failure.

use std::sync::Arc;

use crate::phase::Phase;
use crate::resources::{parse_window_name, WindowManager};

#[derive(Debug, Clone, PartialEq)]
pub struct WindowDiagnostic {
    pub name: String,
    pub exists: bool,
    pub issue: Option<u64>,
    pub phase: Option<Phase>,
    pub panes: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDiagnostic {
    pub name: String,
    pub exists: bool,
    pub window_count: usize,
    pub errors: Vec<String>,
}

pub struct Diagnostics {
    windows: Arc<WindowManager>,
}

impl Diagnostics {
    pub fn new(windows: Arc<WindowManager>) -> Self {
        Self { windows }
    }

    pub async fn diagnose_session(&self, name: &str) -> SessionDiagnostic {
        let mut errors = Vec::new();
        let sessions = self.windows.list_sessions().await.unwrap_or_else(|e| {
            errors.push(e.to_string());
            Vec::new()
        });
        let exists = sessions.iter().any(|s| s == name);
        let window_count = if exists {
            self.windows
                .list_windows_in(name)
                .await
                .unwrap_or_else(|e| {
                    errors.push(e.to_string());
                    Vec::new()
                })
                .len()
        } else {
            0
        };
        SessionDiagnostic { name: name.to_string(), exists, window_count, errors }
    }

    pub async fn diagnose_window(&self, session: &str, name: &str) -> WindowDiagnostic {
        let mut errors = Vec::new();
        let windows = self.windows.list_windows_in(session).await.unwrap_or_else(|e| {
            errors.push(e.to_string());
            Vec::new()
        });
        let found = windows.iter().find(|w| w.name == name);
        let (issue, phase) = match found.and_then(|w| parse_window_name(&w.name)) {
            Some((n, p)) => (Some(n), p),
            None => (None, None),
        };
        WindowDiagnostic {
            name: name.to_string(),
            exists: found.is_some(),
            issue,
            phase,
            panes: found.map(|w| w.panes).unwrap_or(0),
            errors,
        }
    }

    /// Diagnose every session whose name starts with `prefix` (§4.8).
    pub async fn list_session_diagnostics(&self, prefix: &str) -> Vec<SessionDiagnostic> {
        let mut errors = Vec::new();
        let sessions = self.windows.list_sessions().await.unwrap_or_else(|e| {
            errors.push(e.to_string());
            Vec::new()
        });
        let matching: Vec<&String> = sessions.iter().filter(|s| s.starts_with(prefix)).collect();
        if matching.is_empty() && !errors.is_empty() {
            return vec![SessionDiagnostic { name: prefix.to_string(), exists: false, window_count: 0, errors }];
        }

        let mut out = Vec::with_capacity(matching.len());
        for session in matching {
            out.push(self.diagnose_session(session).await);
        }
        out
    }

    pub async fn list_window_diagnostics(&self, session: &str) -> Vec<WindowDiagnostic> {
        let mut errors = Vec::new();
        let windows = self.windows.list_windows_in(session).await.unwrap_or_else(|e| {
            errors.push(e.to_string());
            Vec::new()
        });
        windows
            .into_iter()
            .map(|w| {
                let (issue, phase) = match parse_window_name(&w.name) {
                    Some((n, p)) => (Some(n), p),
                    None => (None, None),
                };
                WindowDiagnostic {
                    name: w.name,
                    exists: true,
                    issue,
                    phase,
                    panes: w.panes,
                    errors: errors.clone(),
                }
            })
            .collect()
    }
}
