//! Cooperative cancellation shared by lock, retry and pipeline loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Why a token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The caller asked for the work to stop.
    Cancelled,
    /// A deadline attached to the work elapsed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "cancelled"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// A cloneable cancellation signal.
///
/// All clones observe the same state. The first reason recorded wins; later
/// calls to [`CancellationToken::cancel_with`] are ignored.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<Option<CancelReason>>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Cancels the token on behalf of the caller.
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Cancelled);
    }

    /// Cancels the token with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Returns the cancellation reason, if cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        *self.state.borrow()
    }

    /// Returns true once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.state.subscribe();
        if let Ok(reason) = rx.wait_for(Option::is_some).await
            && let Some(reason) = *reason
        {
            return reason;
        }
        // The sender lives as long as `self`, so the channel cannot close here.
        std::future::pending().await
    }

    /// Sleeps for `duration` unless the token is cancelled first.
    ///
    /// Returns the reason if the sleep was interrupted.
    pub async fn sleep(&self, duration: Duration) -> Option<CancelReason> {
        tokio::select! {
            reason = self.cancelled() => Some(reason),
            () = tokio::time::sleep(duration) => None,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
    }

    #[test]
    fn first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel_with(CancelReason::DeadlineExceeded);
        token.cancel();
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn clones_observe_cancellation() {
        let token = CancellationToken::new();
        let clone = token.clone();

        let waiter = tokio::spawn(async move { clone.cancelled().await });
        token.cancel();

        assert_eq!(waiter.await.unwrap(), CancelReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_interrupted_by_cancel() {
        let token = CancellationToken::new();
        let clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            clone.cancel();
        });

        let interrupted = token.sleep(Duration::from_secs(60)).await;
        assert_eq!(interrupted, Some(CancelReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancel() {
        let token = CancellationToken::new();
        assert_eq!(token.sleep(Duration::from_millis(5)).await, None);
    }
}
