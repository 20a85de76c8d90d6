//! Retry executor
//!
//! Wraps connection-class operations with capped exponential backoff under
//! a hard budget. Only transient failures are retried; anything else
//! surfaces immediately. Retries are invisible to the user unless the
//! final attempt fails.

use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use rand::Rng;
use regex::Regex;

use crate::settings::Settings;

/// Reserve held back from the operation deadline so the final attempt has
/// room to surface its error.
const BUDGET_RESERVE: Duration = Duration::from_secs(5);

/// Per-delay cap before the remaining-budget halving.
const DELAY_CAP: Duration = Duration::from_secs(10);

/// Minimum budget below which no further retries are attempted.
const MIN_RETRY_BUDGET: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub budget: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: settings.retry_delay,
            budget: settings.request_timeout.saturating_sub(BUDGET_RESERVE),
        }
    }

    #[cfg(test)]
    pub fn for_test(max_attempts: u32, base_delay: Duration, budget: Duration) -> Self {
        Self { max_attempts, base_delay, budget }
    }
}

/// Run `operation` under the policy. The closure is invoked once per
/// attempt; delays are strictly sequential between attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                let remaining = policy.budget.saturating_sub(started.elapsed());
                let message = format!("{:#}", error);

                if attempt >= policy.max_attempts
                    || !is_transient(&message)
                    || remaining <= MIN_RETRY_BUDGET
                {
                    return Err(error);
                }

                let delay = backoff_delay(policy.base_delay, attempt - 1, remaining);
                tracing::debug!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    what,
                    attempt,
                    policy.max_attempts,
                    message,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// `min(B·2^k, cap) · (1 ± 0.25·rand)` with `cap = min(10s, remaining/2)`.
fn backoff_delay(base: Duration, k: u32, remaining: Duration) -> Duration {
    let cap = DELAY_CAP.min(remaining / 2);
    let exponential = base
        .checked_mul(1u32.checked_shl(k).unwrap_or(u32::MAX))
        .unwrap_or(DELAY_CAP);
    let capped = exponential.min(cap);
    let jitter: f64 = rand::rng().random_range(0.75..=1.25);
    capped.mul_f64(jitter)
}

/// Transient-failure classification.
///
/// Primary: well-known system codes, matched by their errno token or the
/// OS rendering Rust IO errors carry (`ETIMEDOUT` surfaces as "timed
/// out"). Secondary: retryable HTTP statuses in recognised positions, the
/// literal `timeout` token, and narrow network/connection phrases.
pub fn is_transient(message: &str) -> bool {
    static ERRNO: OnceLock<Regex> = OnceLock::new();
    static STATUS: OnceLock<Regex> = OnceLock::new();
    static PHRASES: OnceLock<Regex> = OnceLock::new();

    let errno = ERRNO.get_or_init(|| {
        Regex::new(
            r"(?i)\b(ECONNREFUSED|ECONNRESET|ETIMEDOUT|ENOTFOUND|EPIPE|ENETUNREACH|EHOSTUNREACH|EAI_AGAIN)\b",
        )
        .expect("static regex")
    });
    if errno.is_match(message) {
        return true;
    }

    let status = STATUS.get_or_init(|| {
        Regex::new(
            r"(?ix)
              ^\s*(502|503|504|429)\b
            | \b(http|status|status\ code)\b[^0-9]{0,4}(502|503|504|429)\b
            | \b502\ bad\ gateway\b
            | \b503\ service\ unavailable\b
            | \b504\ gateway\ timeout\b
            | \b429\ too\ many\ requests\b",
        )
        .expect("static regex")
    });
    if status.is_match(message) {
        return true;
    }

    let phrases = PHRASES.get_or_init(|| {
        Regex::new(
            r"(?ix)
              \btimeout\b
            | \btimed\ out\b
            | \bbroken\ pipe\b
            | \bnetwork\b[\w\ ]{0,30}\b(error|fail|failed|failure|unavailable|timeout)\b
            | \bconnection\b[\w\ ]{0,30}\b(reset|refused|timeout)\b
            | \b(host|network)\ (is\ )?unreachable\b
            | \bfailed\ to\ lookup\ address\b
            | \bdns\ error\b",
        )
        .expect("static regex")
    });
    phrases.is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn errno_tokens_are_transient() {
        for code in [
            "ECONNREFUSED",
            "ECONNRESET",
            "ETIMEDOUT",
            "ENOTFOUND",
            "EPIPE",
            "ENETUNREACH",
            "EHOSTUNREACH",
            "EAI_AGAIN",
        ] {
            assert!(is_transient(&format!("connect failed: {}", code)), "{}", code);
        }
    }

    #[test]
    fn os_renderings_of_the_codes_are_transient() {
        assert!(is_transient("Connection refused (os error 111)"));
        assert!(is_transient("connection reset by peer"));
        assert!(is_transient("operation timed out"));
        assert!(is_transient("broken pipe"));
        assert!(is_transient("network is unreachable"));
        assert!(is_transient("failed to lookup address information"));
    }

    #[test]
    fn retryable_statuses_in_recognised_positions() {
        assert!(is_transient("502"));
        assert!(is_transient("502 something broke"));
        assert!(is_transient("HTTP 502"));
        assert!(is_transient("status code 503"));
        assert!(is_transient("status: 429"));
        assert!(is_transient("upstream said 504 gateway timeout"));
        assert!(is_transient("error: 429 Too Many Requests"));
    }

    #[test]
    fn lookalikes_are_terminal() {
        assert!(!is_transient("520"));
        assert!(!is_transient("error 5021 occurred"));
        assert!(!is_transient("got 404 not found"));
        assert!(!is_transient("invalid params"));
        assert!(!is_transient("permission denied"));
        assert!(!is_transient("tool exploded"));
    }

    #[test]
    fn timeout_token_and_narrow_phrases() {
        assert!(is_transient("request timeout"));
        assert!(is_transient("network error while reading"));
        assert!(is_transient("network temporarily unavailable"));
        assert!(is_transient("connection was refused by the host"));
        assert!(!is_transient("networking code is great"));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::for_test(3, Duration::from_millis(1), Duration::from_secs(5));
        let counter = attempts.clone();
        let result: anyhow::Result<&str> = with_retry(&policy, "test", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("ECONNRESET")
                }
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::for_test(3, Duration::from_millis(1), Duration::from_secs(5));
        let counter = attempts.clone();
        let result: anyhow::Result<()> = with_retry(&policy, "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("invalid params")
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_bounds_attempts_and_latency() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::for_test(3, Duration::from_millis(1), Duration::from_millis(30));
        let counter = attempts.clone();
        let started = Instant::now();
        let result: anyhow::Result<()> = with_retry(&policy, "test", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("ECONNREFUSED")
            }
        })
        .await;
        assert!(result.is_err());
        // Budget is far below the 1s floor, so the first failure is final.
        assert!(attempts.load(Ordering::SeqCst) <= 3);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn delay_respects_caps() {
        for k in 0..8 {
            let d = backoff_delay(Duration::from_secs(1), k, Duration::from_secs(60));
            assert!(d <= Duration::from_secs(10).mul_f64(1.25));
        }
        // Tight remaining budget halves the cap.
        let d = backoff_delay(Duration::from_secs(4), 0, Duration::from_secs(2));
        assert!(d <= Duration::from_secs(1).mul_f64(1.25));
    }
}
