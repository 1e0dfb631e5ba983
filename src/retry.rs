use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fixed-count, fixed-delay retry policy for network calls.
///
/// There is no exponential backoff: the delay between attempts is constant and
/// the last error is returned once `attempts` calls have failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no delay.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        E: Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(label, op, |_| true).await
    }

    /// Run `op` until it succeeds, the attempts are used up, or `retryable`
    /// rejects the error. `op` receives the 1-based attempt number.
    pub async fn run_if<T, E, F, Fut, R>(&self, label: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        E: Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(err) if attempt < self.attempts && retryable(&err) => {
                    warn!(?err, label, attempt, max = self.attempts, "attempt failed; retrying");
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let out: Result<u32, &str> = policy
            .run("op", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err("boom")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(out, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bound() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let out: Result<(), String> = policy
            .run("op", |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("fail {}", attempt)) }
            })
            .await;
        assert_eq!(out, Err("fail 2".to_string()));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_early() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let out: Result<(), &str> = policy
            .run_if(
                "op",
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err("unauthorized") }
                },
                |e| *e != "unauthorized",
            )
            .await;
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }
}
