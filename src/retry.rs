use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::Result;

/// Retries transient failures of a single step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

impl RetryPolicy {
    /// One extra attempt, the budget every model call and tool invocation gets.
    pub fn once() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(250),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run `f`, retrying only while the error reports itself as transient.
    pub async fn retry<F, Fut, T>(&self, label: &str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    tracing::warn!(%label, attempt, error = %err, "transient failure, retrying");
                    attempt += 1;
                    sleep(self.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FlowError, InferenceErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::once().with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_transient_failure_once() {
        let calls = AtomicU32::new(0);
        let res = fast()
            .retry("model", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(FlowError::inference(InferenceErrorKind::RateLimited, "429"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_transient_failure() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = fast()
            .retry("model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::inference(InferenceErrorKind::Network, "reset")) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failure() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = fast()
            .retry("model", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::inference(InferenceErrorKind::Auth, "401")) }
            })
            .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
