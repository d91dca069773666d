//! Bounded retry with exponential backoff
//!
//! The loop is an explicit state machine: [`RetryState`] owns the attempt
//! counter and the overall deadline, and decides after each failure whether
//! another attempt fits. Every attempt runs under a timeout, and a
//! [`CancellationToken`] aborts both the in-flight attempt and any pending
//! backoff sleep.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::error::Error;

/// Retry limits for one logical call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Timeout applied to each attempt
    pub attempt_timeout: Duration,
    /// Delay before the first retry, doubled for each further retry
    pub base_backoff: Duration,
    /// Cap on a single backoff delay
    pub max_backoff: Duration,
    /// Wall-clock bound for all attempts and waits together
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            attempt_timeout: config.attempt_timeout(),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Total attempts allowed, first attempt included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Why a retried call gave up
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every allowed attempt failed or the deadline left no room for another
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: Error },

    /// A failure that retrying cannot fix
    #[error("permanent failure on attempt {attempts}: {source}")]
    Permanent { attempts: u32, source: Error },

    /// The caller cancelled the call
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl RetryError {
    /// Attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The underlying engine error
    pub fn into_error(self) -> Error {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent { source, .. } => source,
            RetryError::Cancelled { .. } => Error::Cancelled,
        }
    }
}

/// Attempt counter and deadline for one retried call
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    deadline: Instant,
}

impl<'a> RetryState<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            deadline: Instant::now() + policy.deadline,
        }
    }

    /// Start the next attempt and return its number (1-based)
    fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Timeout for the attempt about to run, clipped to the deadline
    fn attempt_timeout(&self) -> Duration {
        self.policy
            .attempt_timeout
            .min(self.deadline.saturating_duration_since(Instant::now()))
    }

    /// Delay before the next attempt, or `None` when no attempt remains
    fn next_backoff(&self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts() {
            return None;
        }
        let delay = self.policy.backoff(self.attempt);
        if Instant::now() + delay >= self.deadline {
            return None;
        }
        Some(delay)
    }
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires
///
/// `operation` receives the 1-based attempt number.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let mut state = RetryState::new(policy);

    loop {
        let attempt = state.begin_attempt();
        let timeout = state.attempt_timeout();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("{} cancelled during attempt {}", label, attempt);
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            outcome = tokio::time::timeout(timeout, operation(attempt)) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout(timeout.as_millis() as u64),
        };

        if !error.is_transient() {
            tracing::error!("{} failed permanently on attempt {}: {}", label, attempt, error);
            return Err(RetryError::Permanent {
                attempts: attempt,
                source: error,
            });
        }

        let Some(delay) = state.next_backoff() else {
            tracing::warn!("{} exhausted after {} attempt(s): {}", label, attempt, error);
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        };

        tracing::warn!(
            "{} failed (attempt {}/{}): {}; retrying in {:?}",
            label,
            attempt,
            policy.max_attempts(),
            error,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("{} cancelled during backoff", label);
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            attempt_timeout: Duration::from_secs(5),
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            deadline: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.max_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let result = run_with_retry(&policy(), &cancel, "test", move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(Error::llm("503"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_attempts() {
        let cancel = CancellationToken::new();
        let err = run_with_retry(&policy(), &cancel, "test", |_| async {
            std::future::pending::<crate::error::Result<()>>().await
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RetryError::Exhausted { attempts: 3, last: Error::Timeout(5000) }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let err = run_with_retry(&policy(), &cancel, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Internal("HTTP 400".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RetryError::Permanent { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_backoff() {
        let cancel = CancellationToken::new();
        let mut slow = policy();
        slow.base_backoff = Duration::from_secs(30);
        slow.max_backoff = Duration::from_secs(30);

        let trigger = cancel.clone();
        let err = run_with_retry(&slow, &cancel, "test", move |_| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Err::<(), _>(Error::llm("connection reset"))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RetryError::Cancelled { attempts: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let cancel = CancellationToken::new();
        let mut tight = policy();
        tight.deadline = Duration::from_secs(7);
        tight.max_retries = 10;

        let err = run_with_retry(&tight, &cancel, "test", |_| async {
            std::future::pending::<crate::error::Result<()>>().await
        })
        .await
        .unwrap_err();

        // 5s attempt, 100ms wait, 1.9s attempt clipped to the deadline
        assert_eq!(err.attempts(), 2);
    }
}
