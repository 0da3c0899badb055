use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied deadline and cancellation for one admission
///
/// Cloning shares the cancellation token, so cancelling any clone abandons
/// every wait made with it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Context {
    /// No deadline; only explicit cancellation ends a wait
    pub fn background() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now; a timeout past the clock's range means no deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => Self::background(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline), cancel: CancellationToken::new() }
    }

    /// Tie this context to an existing cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_has_no_deadline() {
        let ctx = Context::with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert!(!ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let ctx = Context::with_timeout(Duration::from_millis(100));
        assert!(!ctx.is_done());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ctx.is_done());
    }

    #[test]
    fn test_cancel_shared_between_clones() {
        let token = CancellationToken::new();
        let ctx = Context::background().with_cancel(token.clone());
        let clone = ctx.clone();
        assert!(ctx.deadline().is_none());

        token.cancel();
        assert!(ctx.is_done());
        assert!(clone.cancel_token().is_cancelled());
    }
}
