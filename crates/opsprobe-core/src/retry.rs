//! Generic retry loop with classified failures.
//!
//! Every retried operation in the harness goes through [`retry`]: a constant
//! backoff, an optional attempt cap, an optional overall timeout and an
//! optional per-attempt timeout, with a classifier deciding which failures
//! deserve another attempt.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::context::CallContext;
use crate::context::DoneReason;
use crate::verified::ErrorClass;

/// How often and for how long to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Constant delay between attempts.
    pub backoff: Duration,
    /// Total attempts including the first; unbounded when `None`.
    pub max_attempts: Option<u32>,
    /// Budget for all attempts and backoffs together.
    pub total_timeout: Option<Duration>,
    /// Budget handed to each attempt through its context.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn constant(backoff: Duration) -> Self {
        Self {
            backoff,
            max_attempts: None,
            total_timeout: None,
            attempt_timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        debug_assert!(max_attempts > 0, "RETRY: max_attempts must be > 0");
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Why [`retry`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The classifier rejected the failure.
    #[error("{error}")]
    Permanent { attempt: u32, error: E },

    /// The attempt cap was reached while failures were still retriable.
    #[error("exhausted retries after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },

    /// The caller's context or the overall timeout ended the loop.
    #[error("{reason} after {attempts} attempts{}", display_last(.last))]
    Interrupted {
        attempts: u32,
        reason: DoneReason,
        last: Option<E>,
    },
}

fn display_last<E: fmt::Display>(last: &Option<E>) -> String {
    match last {
        Some(e) => format!(", last error: {e}"),
        None => String::new(),
    }
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } | RetryError::Interrupted { attempts, .. } => *attempts,
        }
    }

    /// The last failure reported by the operation, if any.
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => Some(error),
            RetryError::Interrupted { last, .. } => last,
        }
    }

    pub fn last(&self) -> Option<&E> {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => Some(error),
            RetryError::Interrupted { last, .. } => last.as_ref(),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// `op` receives a context bounded by the per-attempt timeout and the
/// 1-based attempt number. The context is the only cancellation signal an
/// attempt gets: in-flight attempts are never dropped, so an attempt can
/// always clean up what it created.
pub async fn retry<T, E, Op, Fut, C>(
    ctx: &CallContext,
    policy: &RetryPolicy,
    classify: C,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    Op: FnMut(CallContext, u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClass,
{
    let overall = match policy.total_timeout {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx.child(),
    };

    let mut attempt: u32 = 0;
    let mut last: Option<E> = None;
    loop {
        if let Some(reason) = overall.done_reason() {
            return Err(RetryError::Interrupted {
                attempts: attempt,
                reason,
                last,
            });
        }

        attempt += 1;
        let attempt_ctx = match policy.attempt_timeout {
            Some(timeout) => overall.with_timeout(timeout),
            None => overall.child(),
        };

        let error = match op(attempt_ctx, attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !classify(&error).is_retriable() {
            return Err(RetryError::Permanent { attempt, error });
        }
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                error,
            });
        }

        debug!(attempt, backoff_ms = policy.backoff.as_millis() as u64, error = %error, "retriable failure, backing off");
        if let Err(reason) = overall.sleep(policy.backoff).await {
            return Err(RetryError::Interrupted {
                attempts: attempt,
                reason,
                last: Some(error),
            });
        }
        last = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use tokio::time::Instant;

    use super::*;

    fn retriable_if_flaky(e: &String) -> ErrorClass {
        if e.contains("flaky") { ErrorClass::Retriable } else { ErrorClass::Permanent }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retriable_failures() {
        let policy = RetryPolicy::constant(Duration::from_secs(60)).with_max_attempts(5);
        let started = Instant::now();
        let result = retry(&CallContext::background(), &policy, retriable_if_flaky, |_ctx, attempt| async move {
            if attempt < 3 { Err("flaky".to_string()) } else { Ok(attempt) }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::constant(Duration::from_secs(1));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = retry(&CallContext::background(), &policy, retriable_if_flaky, |_ctx, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("Invalid value for field".to_string())
            }
        })
        .await;
        assert!(matches!(result, Err(RetryError::Permanent { attempt: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempt_cap() {
        let policy = RetryPolicy::constant(Duration::from_secs(10)).with_max_attempts(4);
        let result: Result<(), _> =
            retry(&CallContext::background(), &policy, retriable_if_flaky, |_ctx, _| async { Err("flaky".to_string()) })
                .await;
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
        assert!(err.to_string().contains("exhausted retries after 4 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_timeout_interrupts_backoff() {
        let policy = RetryPolicy::constant(Duration::from_secs(60)).with_total_timeout(Duration::from_secs(150));
        let started = Instant::now();
        let result: Result<(), _> =
            retry(&CallContext::background(), &policy, retriable_if_flaky, |_ctx, _| async { Err("flaky".to_string()) })
                .await;
        match result {
            Err(RetryError::Interrupted {
                attempts,
                reason,
                last: Some(last),
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, DoneReason::DeadlineExceeded);
                assert_eq!(last, "flaky");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_never_starts() {
        let ctx = CallContext::background();
        ctx.cancel();
        let policy = RetryPolicy::constant(Duration::from_secs(1));
        let result: Result<(), RetryError<String>> =
            retry(&ctx, &policy, retriable_if_flaky, |_ctx, _| async { Err("ran".to_string()) }).await;
        assert!(matches!(result, Err(RetryError::Interrupted {
            attempts: 0,
            reason: DoneReason::Cancelled,
            last: None
        })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_context_carries_attempt_timeout() {
        let policy = RetryPolicy::constant(Duration::from_secs(1)).with_attempt_timeout(Duration::from_secs(30));
        let result = retry(&CallContext::background(), &policy, retriable_if_flaky, |ctx, _| async move {
            Ok::<_, String>(ctx.remaining())
        })
        .await;
        assert_eq!(result.unwrap(), Some(Duration::from_secs(30)));
    }
}
