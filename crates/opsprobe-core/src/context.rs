//! Cancellation and deadline propagation for cloud-facing calls.
//!
//! Every operation that talks to the provisioning CLI, a VM or a telemetry
//! backend takes a [`CallContext`]. Derived contexts inherit cancellation from
//! their parent and never extend its deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`CallContext`] stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DoneReason {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus an optional deadline.
#[derive(Debug, Clone)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Root context: never cancelled by anyone else, no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context that expires after `timeout`.
    ///
    /// Used for cleanup work that must outlive a cancelled caller.
    pub fn detached_with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Child context that expires after `timeout` or when `self` is done,
    /// whichever comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Child context that can be cancelled without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Non-blocking check.
    pub fn done_reason(&self) -> Option<DoneReason> {
        if self.token.is_cancelled() {
            return Some(DoneReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DoneReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done_reason().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => DoneReason::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }

    /// Sleep for `duration`, returning early if the context finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DoneReason> {
        if let Some(reason) = self.done_reason() {
            return Err(reason);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            reason = self.done() => Err(reason),
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    ///
    /// `fut` is dropped when the context wins, so it must be safe to abandon.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DoneReason> {
        if let Some(reason) = self.done_reason() {
            return Err(reason);
        }
        tokio::select! {
            out = fut => Ok(out),
            reason = self.done() => Err(reason),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
