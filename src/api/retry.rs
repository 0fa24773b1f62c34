use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry schedule for startup calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Run `call` until it succeeds or the attempts are exhausted
///
/// Any error is retried. Returns the last error once the policy is spent.
pub async fn retry_fixed<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    "{} failed: {}, retrying in {:?} (attempt {}/{})",
                    what,
                    e,
                    policy.delay,
                    attempt,
                    attempts
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{} failed after {} attempts: {}", what, attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<u32, GatewayError> = retry_fixed(RetryPolicy::default(), "ping", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(GatewayError::RateLimited)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two waits of 2s each
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_policy_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), GatewayError> = retry_fixed(RetryPolicy::default(), "balance", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Auth("bad key".to_string())) }
        })
        .await;

        assert_eq!(result, Err(GatewayError::Auth("bad key".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
