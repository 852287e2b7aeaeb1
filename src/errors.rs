//! Typed error hierarchy for the issue-driven orchestrator.
//!
//! Two top-level enums cover the two axes of failure:
//! - `ForgeError` — classified failures surfaced by the Gateway, carrying an
//!   `ErrorKind` that the retry policy and the label state machine key off of.
//! - `ResourceError` — workspace/window reservation and reclamation failures.

use std::time::Duration;
use thiserror::Error;

/// The classification a Gateway failure is mapped to (§4.1 error table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimit,
    NetworkTimeout,
    Auth,
    NotFound,
    ServerError,
    Unknown,
    Cancelled,
}

/// A classified failure from invoking the forge CLI.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ForgeError {
    pub kind: ErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
    #[source]
    pub original: Option<anyhow::Error>,
}

impl ForgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retry_after: None,
            original: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Whether this kind is retried by `retry()` without the caller opting in
    /// again (§7 propagation policy): RateLimit, NetworkTimeout, ServerError,
    /// and Unknown are retried; Auth/NotFound/Cancelled are not.
    pub fn is_retryable_kind(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimit | ErrorKind::NetworkTimeout | ErrorKind::ServerError | ErrorKind::Unknown
        )
    }
}

/// Errors from reserving or reclaiming per-issue resources (workspace, window).
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to create workspace at {path}: {source}")]
    WorkspaceCreateFailed {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("window already exists for issue {issue} phase {phase}")]
    WindowAlreadyExists { issue: u64, phase: String },

    #[error("failed to open window for issue {issue} phase {phase}: {source}")]
    WindowCreateFailed {
        issue: u64,
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("multiplexer command failed: {0}")]
    Multiplexer(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by the Phase Executor after the retry policy has given up.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("label transition failed: {0}")]
    Transition(#[source] ForgeError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("failed to launch assistant for issue {issue} phase {phase}: {source}")]
    LaunchFailed {
        issue: u64,
        phase: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<ForgeError> for ExecutorError {
    fn from(err: ForgeError) -> Self {
        ExecutorError::Transition(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forge_error_default_not_retryable_kinds() {
        let auth = ForgeError::new(ErrorKind::Auth, "bad credentials");
        assert!(!auth.is_retryable_kind());
        let not_found = ForgeError::new(ErrorKind::NotFound, "no such label");
        assert!(!not_found.is_retryable_kind());
    }

    #[test]
    fn forge_error_retryable_kinds() {
        for kind in [
            ErrorKind::RateLimit,
            ErrorKind::NetworkTimeout,
            ErrorKind::ServerError,
            ErrorKind::Unknown,
        ] {
            let err = ForgeError::new(kind, "x");
            assert!(err.is_retryable_kind(), "{kind:?} should be retryable");
        }
    }

    #[test]
    fn forge_error_carries_retry_after() {
        let err = ForgeError::new(ErrorKind::RateLimit, "rate limited")
            .with_status(429)
            .with_retry_after(Duration::from_secs(2));
        assert_eq!(err.status_code, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn cancelled_constructor_sets_kind() {
        let err = ForgeError::cancelled();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(!err.is_retryable_kind());
    }

    #[test]
    fn resource_error_window_already_exists_carries_fields() {
        let err = ResourceError::WindowAlreadyExists {
            issue: 42,
            phase: "planning".to_string(),
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("planning"));
    }

    #[test]
    fn executor_error_converts_from_forge_error() {
        let forge_err = ForgeError::new(ErrorKind::Auth, "bad credentials");
        let exec_err: ExecutorError = forge_err.into();
        assert!(matches!(exec_err, ExecutorError::Transition(_)));
    }

    #[test]
    fn executor_error_converts_from_resource_error() {
        let res_err = ResourceError::WindowAlreadyExists {
            issue: 1,
            phase: "implementing".to_string(),
        };
        let exec_err: ExecutorError = res_err.into();
        assert!(matches!(exec_err, ExecutorError::Resource(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let forge_err = ForgeError::new(ErrorKind::Unknown, "x");
        assert_std_error(&forge_err);
        let res_err = ResourceError::Multiplexer(anyhow::anyhow!("tmux missing"));
        assert_std_error(&res_err);
    }
}
