//! Cancellation and deadline signal threaded through every blocking store call.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Per-operation context: a cancellation token plus an optional deadline.
///
/// Cloning is cheap and clones share the same token, so cancelling any clone
/// interrupts every operation running under it.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Set a deadline `timeout` from now. An earlier existing deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token,
            deadline: Some(deadline),
        }
    }

    /// A child context: cancelling the parent cancels it, not the reverse.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the operation should stop now.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Ok(())` while the operation may continue.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_done() {
        let ctx = OpContext::background();
        assert!(!ctx.is_done());
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_clones_and_children() {
        let ctx = OpContext::background();
        let clone = ctx.clone();
        let child = ctx.child();
        ctx.cancel();
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
        assert!(matches!(child.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = OpContext::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = OpContext::background().with_timeout(Duration::ZERO);
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = OpContext::background()
            .with_timeout(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(3600));
        assert!(ctx.remaining().unwrap() <= Duration::from_millis(10));
    }
}
