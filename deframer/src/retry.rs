use std::future::Future;
use std::time::Duration;

/// How many times to try an operation and how long to wait in between.
/// The wait doubles after every failed attempt (1x, 2x, 4x...).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Duration::from_millis(100),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        // attempt is 1-based; no delay before the first one
        self.backoff * 2u32.saturating_pow(attempt.saturating_sub(2))
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects, or the
/// policy runs out of attempts. The last error is returned in the latter two cases.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, P>(policy: RetryPolicy, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts && is_retryable(&e) => {
                let backoff = policy.delay_before(attempt + 1);
                tracing::debug!(attempt, max = policy.attempts, ?backoff, error = %e, "attempt failed, retrying");
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
