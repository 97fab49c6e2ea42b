//! Retry policy for provider calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::cancel::CancelSignal;
use crate::config::ApplySettings;
use crate::error::ProviderError;
use crate::provider::ResourceSchema;

/// Exponential backoff bounded by a maximum number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per operation, first call included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy from the document's apply settings.
    #[must_use]
    pub const fn from_settings(settings: &ApplySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    ///
    /// Doubles from the base delay and honors a throttling hint, never
    /// exceeding the maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self.base_delay.saturating_mul(1 << exponent);
        let hinted = error
            .retry_after_secs()
            .map_or(backoff, |secs| backoff.max(Duration::from_secs(secs)));
        hinted.min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails terminally, or the attempts run
    /// out. Returns the final result and the number of attempts made.
    ///
    /// Backoff sleeps end early with `Cancelled` when `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        schema: &ResourceSchema,
        cancel: &CancelSignal,
        mut call: F,
    ) -> (Result<T, ProviderError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            let error = match call(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) => e,
            };

            if error == ProviderError::Cancelled
                || attempt >= self.max_attempts
                || !schema.is_retryable(&error)
            {
                return (Err(error), attempt);
            }

            let delay = self.delay_for(attempt, &error);
            warn!(
                "Attempt {attempt}/{} failed: {error}. Retrying in {}ms",
                self.max_attempts,
                delay.as_millis()
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return (Err(ProviderError::Cancelled), attempt),
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&ApplySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn schema() -> ResourceSchema {
        ResourceSchema::new("queue").retry_on("Busy")
    }

    #[test]
    fn test_delays_double_and_cap() {
        let policy = RetryPolicy::default();
        let err = ProviderError::network("reset");
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3, &err), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(10));
    }

    #[test]
    fn test_throttle_hint_raises_delay_within_cap() {
        let policy = RetryPolicy::default();
        let hint = ProviderError::Throttled { retry_after_secs: 4 };
        assert_eq!(policy.delay_for(1, &hint), Duration::from_secs(4));
        let long = ProviderError::Throttled { retry_after_secs: 60 };
        assert_eq!(policy.delay_for(1, &long), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retryable_errors_exhaust_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (result, attempts) = fast()
            .run(&schema(), &CancelSignal::new(), |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ProviderError::api("Busy", "try later"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let (result, attempts) = fast()
            .run(&schema(), &CancelSignal::new(), |_| async {
                Err::<(), _>(ProviderError::api("Invalid", "bad input"))
            })
            .await;

        assert_eq!(result, Err(ProviderError::api("Invalid", "bad input")));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let (result, attempts) = fast()
            .run(&schema(), &CancelSignal::new(), |attempt| async move {
                if attempt < 2 {
                    Err(ProviderError::network("reset"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };
        let cancel = CancelSignal::new();
        cancel.cancel();

        let (result, attempts) = policy
            .run(&schema(), &cancel, |_| async {
                Err::<(), _>(ProviderError::network("reset"))
            })
            .await;

        assert_eq!(result, Err(ProviderError::Cancelled));
        assert_eq!(attempts, 1);
    }
}
