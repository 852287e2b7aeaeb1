//! Classified-retry policy: maps an `ErrorKind` to a backoff strategy and
//! drives a retried operation under a cancellation context.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::errors::{ErrorKind, ForgeError};

/// A named backoff schedule (§4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl RetryStrategy {
    pub const DEFAULT: RetryStrategy = RetryStrategy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
        jitter_fraction: 0.25,
    };

    pub const RATE_LIMIT: RetryStrategy = RetryStrategy {
        max_attempts: 5,
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(300),
        multiplier: 2.0,
        jitter_fraction: 0.0,
    };

    pub const NETWORK: RetryStrategy = RetryStrategy {
        max_attempts: 4,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(10),
        multiplier: 1.5,
        jitter_fraction: 0.25,
    };

    pub const SERVER_ERROR: RetryStrategy = RetryStrategy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(20),
        multiplier: 2.0,
        jitter_fraction: 0.25,
    };

    /// Non-classified errors get at most one retry: the first occurrence is
    /// retried once, a repeat is surfaced (§4.2, §7).
    pub const UNCLASSIFIED: RetryStrategy = RetryStrategy {
        max_attempts: 2,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        multiplier: 2.0,
        jitter_fraction: 0.25,
    };

    /// The jitter-free delay before attempt `attempt` (0-indexed retry count),
    /// capped at `max_delay`. P5: with `jitter_fraction == 0.0` this is the
    /// exact sequence the caller observes.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// The delay actually slept before attempt `attempt`, with jitter applied
    /// as an additive `[0, jitter_fraction]` fraction of the base delay.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_fraction <= 0.0 {
            return base;
        }
        let jitter: f64 = rand::rng().random_range(0.0..=self.jitter_fraction);
        Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
    }
}

/// Select the strategy for an error's kind (§4.2). Auth/NotFound/Cancelled
/// are not retried; callers should check `ForgeError::is_retryable_kind`
/// before calling `retry`.
pub fn select_strategy(kind: ErrorKind) -> Option<RetryStrategy> {
    match kind {
        ErrorKind::RateLimit => Some(RetryStrategy::RATE_LIMIT),
        ErrorKind::NetworkTimeout => Some(RetryStrategy::NETWORK),
        ErrorKind::ServerError => Some(RetryStrategy::SERVER_ERROR),
        ErrorKind::Unknown => Some(RetryStrategy::UNCLASSIFIED),
        ErrorKind::Auth | ErrorKind::NotFound | ErrorKind::Cancelled => None,
    }
}

/// Run `op` under the given strategy, retrying on retryable `ForgeError`s.
/// Honours a server-supplied `retry_after` verbatim (bounded by
/// `strategy.max_delay`) in place of the computed backoff. Short-circuits
/// the moment `ctx` is cancelled, returning `ForgeError::cancelled()`.
pub async fn retry<F, Fut, T>(
    ctx: &CancellationToken,
    strategy: RetryStrategy,
    mut op: F,
) -> Result<T, ForgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ForgeError>>,
{
    let mut attempt = 0u32;
    loop {
        if ctx.is_cancelled() {
            return Err(ForgeError::cancelled());
        }

        let result = op().await;
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.is_retryable_kind();
                attempt += 1;
                if !retryable || attempt >= strategy.max_attempts {
                    return Err(err);
                }

                let delay = err
                    .retry_after
                    .map(|hint| hint.min(strategy.max_delay))
                    .unwrap_or_else(|| strategy.jittered_delay(attempt - 1));

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancelled() => return Err(ForgeError::cancelled()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn jitter_free(mut s: RetryStrategy) -> RetryStrategy {
        s.jitter_fraction = 0.0;
        s
    }

    #[test]
    fn backoff_shape_matches_p5() {
        let strategy = jitter_free(RetryStrategy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        });
        let expected = [1.0, 2.0, 4.0, 8.0, 16.0, 30.0, 30.0];
        for (attempt, exp) in expected.iter().enumerate() {
            let got = strategy.base_delay(attempt as u32).as_secs_f64();
            assert!((got - exp).abs() < 1e-9, "attempt {attempt}: {got} != {exp}");
        }
    }

    #[test]
    fn jitter_never_exceeds_25_percent() {
        let strategy = RetryStrategy::DEFAULT;
        for attempt in 0..5 {
            let base = strategy.base_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let jittered = strategy.jittered_delay(attempt).as_secs_f64();
                assert!(jittered <= base * 1.25 + 1e-9);
                assert!(jittered >= base);
            }
        }
    }

    #[test]
    fn select_strategy_maps_retryable_kinds() {
        assert_eq!(select_strategy(ErrorKind::RateLimit), Some(RetryStrategy::RATE_LIMIT));
        assert_eq!(select_strategy(ErrorKind::NetworkTimeout), Some(RetryStrategy::NETWORK));
        assert_eq!(select_strategy(ErrorKind::ServerError), Some(RetryStrategy::SERVER_ERROR));
        assert_eq!(select_strategy(ErrorKind::Unknown), Some(RetryStrategy::UNCLASSIFIED));
    }

    #[tokio::test]
    async fn unknown_error_is_retried_at_most_once() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), ForgeError> =
            retry(&ctx, jitter_free(RetryStrategy::UNCLASSIFIED), move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ForgeError::new(ErrorKind::Unknown, "weird output"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn select_strategy_returns_none_for_non_retryable_kinds() {
        assert_eq!(select_strategy(ErrorKind::Auth), None);
        assert_eq!(select_strategy(ErrorKind::NotFound), None);
        assert_eq!(select_strategy(ErrorKind::Cancelled), None);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = retry(&ctx, jitter_free(RetryStrategy::NETWORK), move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ForgeError::new(ErrorKind::NetworkTimeout, "dial tcp: timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_honours_retry_after_hint_p6() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let start = tokio::time::Instant::now();
        let result = retry(&ctx, RetryStrategy::RATE_LIMIT, move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ForgeError::new(ErrorKind::RateLimit, "secondary rate limit")
                        .with_retry_after(Duration::from_millis(50)))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn retry_does_not_retry_non_retryable_kind() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), ForgeError> = retry(&ctx, RetryStrategy::DEFAULT, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ForgeError::new(ErrorKind::Auth, "bad credentials"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_short_circuits_on_cancellation_p9() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result: Result<(), ForgeError> =
            retry(&ctx, RetryStrategy::DEFAULT, || async { Ok(()) }).await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn retry_exhausts_max_attempts() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), ForgeError> =
            retry(&ctx, jitter_free(RetryStrategy::NETWORK), move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ForgeError::new(ErrorKind::NetworkTimeout, "timeout"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), RetryStrategy::NETWORK.max_attempts);
    }
}
