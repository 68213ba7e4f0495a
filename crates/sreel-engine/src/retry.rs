//! Retry with exponential backoff for flaky external operations.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use sreel_ai::AiError;

use crate::error::EngineError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Apply +-20% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry `attempt` (0-based): `base * 2^attempt`,
    /// capped, with optional jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_delay);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.8..1.2);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Fatal,
}

/// Outcome of a retried operation that never succeeded.
#[derive(Debug)]
pub enum RetryError<E> {
    /// All attempts failed with retryable errors; carries the last one.
    Exhausted(E),
    /// A fatal error short-circuited the loop.
    Fatal(E),
    /// Cancelled between attempts or during a backoff sleep.
    Cancelled,
}

/// Run `op` with bounded retries and exponential backoff.
///
/// `classify` decides whether a failure is worth retrying. The cancel
/// signal is honored before every attempt and during every sleep; a
/// cancel never lets the next attempt start.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &mut watch::Receiver<bool>,
    mut op: F,
    classify: impl Fn(&E) -> RetryClass,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        if *cancel.borrow() {
            return Err(RetryError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if classify(&e) == RetryClass::Fatal {
                    return Err(RetryError::Fatal(e));
                }
                if attempt >= policy.max_retries {
                    return Err(RetryError::Exhausted(e));
                }
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                debug!(
                    "attempt {} failed, retrying in {:?}: {}",
                    attempt, delay, e
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(cancel) => return Err(RetryError::Cancelled),
                }
            }
        }
    }
}

/// Resolve once the cancel signal flips to true.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
    // Sender dropped without cancelling; never resolve.
    std::future::pending().await
}

/// Classifier for adapter errors.
pub fn ai_retry_class(e: &AiError) -> RetryClass {
    if e.is_retryable() {
        RetryClass::Retryable
    } else {
        RetryClass::Fatal
    }
}

impl From<RetryError<AiError>> for EngineError {
    fn from(err: RetryError<AiError>) -> Self {
        match err {
            RetryError::Fatal(e @ AiError::MalformedResponse(_)) => {
                EngineError::ModelOutput(e.to_string())
            }
            RetryError::Fatal(e) => EngineError::ExternalService(e.to_string()),
            RetryError::Exhausted(e) => {
                warn!("retries exhausted: {}", e);
                EngineError::ExternalService(format!("retries exhausted: {}", e))
            }
            RetryError::Cancelled => EngineError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: false,
        }
    }

    fn always_retryable(_: &String) -> RetryClass {
        RetryClass::Retryable
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        };
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(5), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..50 {
            let d = p.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(80) && d <= Duration::from_millis(120));
        }
    }

    #[tokio::test]
    async fn test_success_after_retryable_failures() {
        let (_tx, mut cancel) = watch::channel(false);
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(
            &policy(),
            &mut cancel,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err("transient".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            always_retryable,
        )
        .await;

        // max_retries failures then success on the final attempt.
        assert!(matches!(result, Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_retries_plus_one_failures() {
        let (_tx, mut cancel) = watch::channel(false);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = retry_with_backoff(
            &policy(),
            &mut cancel,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still down".to_string()) }
            },
            always_retryable,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let (_tx, mut cancel) = watch::channel(false);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = retry_with_backoff(
            &policy(),
            &mut cancel,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("bad payload".to_string()) }
            },
            |_| RetryClass::Fatal,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_sleep_skips_next_attempt() {
        let (tx, mut cancel) = watch::channel(false);
        let calls = AtomicU32::new(0);

        let slow_policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };

        let run = retry_with_backoff(
            &slow_policy,
            &mut cancel,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("transient".to_string()) }
            },
            always_retryable,
        );

        let cancel_task = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        };

        let (result, ()) = tokio::join!(run, cancel_task);
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_runs_nothing() {
        let (tx, mut cancel) = watch::channel(false);
        tx.send(true).unwrap();

        let result: Result<u32, _> = retry_with_backoff(
            &policy(),
            &mut cancel,
            || async { Ok(1) },
            always_retryable,
        )
        .await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn test_retry_error_maps_to_engine_kinds() {
        let e: EngineError = RetryError::Fatal(AiError::malformed("no candidates")).into();
        assert!(matches!(e, EngineError::ModelOutput(_)));

        let e: EngineError = RetryError::Exhausted(AiError::Timeout(300)).into();
        assert!(matches!(e, EngineError::ExternalService(_)));

        let e: EngineError = RetryError::<AiError>::Cancelled.into();
        assert!(matches!(e, EngineError::Cancelled));
    }
}
