//! Cancellation signal threaded through every call.
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tunnel_agent_common::{AgentError, CancelReason};

/// A cancellation token with an optional deadline.
///
/// Timeouts are just signals whose deadline passes; there is no separate
/// timeout mechanism. Cloning shares the same token.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Signal {
    /// A signal that only fires when cancelled
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child signal that also fires after `timeout`.
    ///
    /// Cancelling the child leaves `self` untouched.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the signal has fired, or `None` while it is still live
    pub fn reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            Some(CancelReason::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(CancelReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Fail with a cancellation error if the signal has fired
    pub fn check(&self) -> Result<(), AgentError> {
        match self.reason() {
            Some(reason) => Err(AgentError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolve once the signal fires
    pub async fn fired(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => CancelReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }

    /// Sleep for `period` unless the signal fires first
    pub async fn pause(&self, period: Duration) -> Result<(), AgentError> {
        tokio::select! {
            reason = self.fired() => Err(AgentError::Cancelled(reason)),
            _ = tokio::time::sleep(period) => Ok(()),
        }
    }
}
