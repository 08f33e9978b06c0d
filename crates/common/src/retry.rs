//! Bounded exponential backoff for transient failures, used by the
//! cluster notification channel for peer delivery.

use crate::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Backoff before retry number `attempt` (1-based): exponential in the
/// base delay, capped at `max_ms`, with up to one second of jitter so
/// peers recovering together do not reconnect in lockstep.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let jitter = rand::thread_rng().gen_range(0..1000);
    Duration::from_millis(exponential.saturating_add(jitter).min(max_ms))
}

/// Run `operation` until it succeeds or `settings.max_attempts` is
/// exhausted, sleeping between attempts. The final error is returned
/// unchanged.
pub async fn retry_async<T, E, F, Fut>(
    op: &str,
    settings: RetrySettings,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if attempt >= max_attempts {
            error!(target: "retry", op, attempts = max_attempts, error = %err, "giving up");
            return Err(err);
        }
        let delay = backoff_delay(attempt, settings.base_delay_ms, settings.max_delay_ms);
        warn!(
            target: "retry",
            op,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_is_capped() {
        let delay = backoff_delay(20, 1000, 5000);
        assert!(delay <= Duration::from_millis(5000));
    }

    #[test]
    fn test_delay_grows_with_attempts() {
        // Jitter is below one second, so with a large base the
        // exponential term dominates.
        let early = backoff_delay(1, 10_000, u64::MAX);
        let late = backoff_delay(3, 10_000, u64::MAX);
        assert!(late > early);
    }

    #[tokio::test]
    async fn test_retry_eventually_succeeds() {
        let attempts = AtomicU32::new(0);
        let settings = RetrySettings {
            max_attempts: 5,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };

        let result: Result<u32, String> = retry_async("flaky", settings, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("not yet".to_string())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let settings = RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };

        let result: Result<(), String> = retry_async("doomed", settings, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope".to_string())
        })
        .await;

        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
