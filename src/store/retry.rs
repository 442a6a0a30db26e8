use std::future::Future;
use std::time::Duration;

/// Retry policy for operations that may fail transiently.
///
/// A pure description of *how* to retry — how many attempts, how the
/// backoff grows — independent of what is being retried. The store uses it
/// for connection-class failures; nothing here knows about databases.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    /// Backoff grows linearly: one base step per failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` under `policy`, retrying failures that `is_transient` accepts.
///
/// `op` receives the 1-based attempt number and must produce a fresh future
/// per call. Non-transient errors propagate immediately; the error from the
/// final attempt propagates once attempts are exhausted.
pub async fn retry_with_policy<T, E, F, Fut, P>(
    policy: RetryPolicy,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation recovered after retries");
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_attempts.max(1) && is_transient(&err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    "transient failure, retrying: {err}"
                );
                tokio::time::sleep(policy.delay_after(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
