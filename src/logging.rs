//! Logging bootstrap (§4.11, §9 "Global logger handle"). `tracing`'s global
//! subscriber is the one legitimate process-wide slot; it is set exactly
//! once here, only from `main`. Every other module emits `tracing` events
//! and never touches the subscriber.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Resolve the effective level: `LOG_LEVEL` wins, falling back to a `DEBUG`
/// boolean-ish env var, falling back to `info` (§6 "LOG_LEVEL beats DEBUG").
fn resolve_level() -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level;
    }
    let debug = std::env::var("DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false);
    if debug { "debug".to_string() } else { "info".to_string() }
}

/// Initialize the global `tracing` subscriber. Must be called exactly once,
/// at process bootstrap.
pub fn init() {
    let filter = EnvFilter::try_new(resolve_level()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match LogFormat::from_env() {
        LogFormat::Json => {
            let _ = subscriber.json().try_init();
        }
        LogFormat::Text => {
            let _ = subscriber.try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_text() {
        // SAFETY: test-only, single-threaded env mutation.
        unsafe {
            std::env::remove_var("LOG_FORMAT");
        }
        assert_eq!(LogFormat::from_env(), LogFormat::Text);
    }

    #[test]
    fn resolve_level_prefers_log_level_over_debug() {
        // SAFETY: test-only, single-threaded env mutation guarded by the
        // absence of parallel tests touching these two vars.
        unsafe {
            std::env::set_var("LOG_LEVEL", "warn");
            std::env::set_var("DEBUG", "true");
        }
        assert_eq!(resolve_level(), "warn");
        unsafe {
            std::env::remove_var("LOG_LEVEL");
            std::env::remove_var("DEBUG");
        }
    }
}
