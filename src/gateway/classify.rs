//! Error classification table (§4.1, §9 "String-matching error
//! classification"). This table IS the contract: new phrasings are added
//! here, not via if-cascades scattered through the Gateway.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::errors::{ErrorKind, ForgeError};

struct ClassificationRule {
    pattern: Regex,
    kind: ErrorKind,
    default_status: Option<u16>,
}

fn rules() -> &'static Vec<ClassificationRule> {
    static RULES: OnceLock<Vec<ClassificationRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            rule("(?i)secondary rate limit|rate limit", ErrorKind::RateLimit, Some(429)),
            rule(
                "(?i)authentication|unauthorized|bad credentials",
                ErrorKind::Auth,
                Some(401),
            ),
            rule(
                "(?i)not found|could not resolve to|does not have the label",
                ErrorKind::NotFound,
                Some(404),
            ),
            rule(
                "(?i)timeout|connection refused|dial tcp",
                ErrorKind::NetworkTimeout,
                None,
            ),
            rule(
                "(?i)internal server error|5\\d\\d",
                ErrorKind::ServerError,
                Some(500),
            ),
        ]
    })
}

fn rule(pattern: &str, kind: ErrorKind, default_status: Option<u16>) -> ClassificationRule {
    ClassificationRule {
        pattern: Regex::new(pattern).expect("classification regex is valid"),
        kind,
        default_status,
    }
}

/// Classify the combined stdout/stderr of a failed CLI invocation (§4.1).
/// A `Retry-After: N` line, if present, is extracted verbatim into
/// `retry_after`.
pub fn classify_error(combined_output: &str) -> ForgeError {
    let retry_after = extract_retry_after(combined_output);

    for r in rules() {
        if r.pattern.is_match(combined_output) {
            let mut err = ForgeError::new(r.kind, combined_output.trim().to_string());
            if let Some(status) = r.default_status {
                err = err.with_status(status);
            }
            if let Some(retry_after) = retry_after {
                err = err.with_retry_after(retry_after);
            }
            return err;
        }
    }

    let mut err = ForgeError::new(ErrorKind::Unknown, combined_output.trim().to_string());
    if let Some(retry_after) = retry_after {
        err = err.with_retry_after(retry_after);
    }
    err
}

fn extract_retry_after(text: &str) -> Option<Duration> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new("(?i)retry-after:\\s*(\\d+)").unwrap());
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        let err = classify_error("API rate limit exceeded for installation");
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.status_code, Some(429));
    }

    #[test]
    fn classifies_secondary_rate_limit() {
        let err = classify_error("You have exceeded a secondary rate limit");
        assert_eq!(err.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn classifies_auth_failure() {
        let err = classify_error("HTTP 401: Bad credentials");
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[test]
    fn classifies_not_found() {
        let err = classify_error("GraphQL: Could not resolve to an Issue with the number of 9999.");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn classifies_label_not_found() {
        let err = classify_error("label 'ready' does not have the label");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn classifies_network_timeout() {
        let err = classify_error("dial tcp 140.82.112.6:443: i/o timeout");
        assert_eq!(err.kind, ErrorKind::NetworkTimeout);
    }

    #[test]
    fn classifies_server_error() {
        let err = classify_error("HTTP 503: Internal Server Error");
        assert_eq!(err.kind, ErrorKind::ServerError);
    }

    #[test]
    fn classifies_unknown_otherwise() {
        let err = classify_error("something unrelated went wrong");
        assert_eq!(err.kind, ErrorKind::Unknown);
    }

    #[test]
    fn extracts_retry_after_hint() {
        let err = classify_error("secondary rate limit hit\nRetry-After: 30");
        assert_eq!(err.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn no_retry_after_hint_leaves_it_none() {
        let err = classify_error("HTTP 401: Bad credentials");
        assert_eq!(err.retry_after, None);
    }
}
