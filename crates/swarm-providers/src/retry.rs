use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Explicit classification of provider-API failures. Only `Transient` and
/// `RateLimited` are retried; `NotFound` maps to "finished and reaped".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    RateLimited,
    NotFound,
    Permanent,
}

impl ErrorClass {
    pub fn retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::RateLimited)
    }
}

pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        404 => ErrorClass::NotFound,
        429 => ErrorClass::RateLimited,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

pub fn classify_reqwest(error: &reqwest::Error) -> ErrorClass {
    if let Some(status) = error.status() {
        return classify_http_status(status.as_u16());
    }
    if error.is_timeout() || error.is_connect() || error.is_request() {
        return ErrorClass::Transient;
    }
    ErrorClass::Permanent
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Backoff for the given zero-based attempt: `base * 2^attempt`, capped,
    /// then scaled by a uniform factor in `1 ± jitter`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        exp.mul_f64(factor.max(0.0))
    }

    /// Runs `op` until it succeeds, the classifier declares the error
    /// non-retryable, or attempts run out.
    pub async fn run<T, F, Fut, C>(&self, classify: C, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        C: Fn(&anyhow::Error) -> ErrorClass,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let class = classify(&error);
                    attempt += 1;
                    if !class.retryable() || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let delay = self.delay(attempt - 1);
                    tracing::debug!(
                        "retrying after {:?} (attempt {attempt}/{}): {error}",
                        delay,
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn status_classification() {
        assert_eq!(classify_http_status(404), ErrorClass::NotFound);
        assert_eq!(classify_http_status(429), ErrorClass::RateLimited);
        assert_eq!(classify_http_status(503), ErrorClass::Transient);
        assert_eq!(classify_http_status(400), ErrorClass::Permanent);
        assert!(!ErrorClass::NotFound.retryable());
        assert!(ErrorClass::RateLimited.retryable());
    }

    #[test]
    fn delay_is_capped_and_jittered() {
        let policy = RetryPolicy::default();
        for attempt in 0..8 {
            let delay = policy.delay(attempt);
            assert!(delay <= policy.cap.mul_f64(1.0 + policy.jitter));
        }
        let first = policy.delay(0);
        assert!(first >= policy.base.mul_f64(1.0 - policy.jitter));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_up_to_the_attempt_budget() {
        let policy = RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = policy
            .run(
                |_| ErrorClass::Transient,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow::anyhow!("connection reset")) }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = policy
            .run(
                |_| ErrorClass::Permanent,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow::anyhow!("bad request")) }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
