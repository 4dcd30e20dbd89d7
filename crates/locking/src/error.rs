use std::time::Duration;

use common::{CancelReason, Retryable};
use thiserror::Error;

/// Errors raised while coordinating leases.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lease could not be acquired before the acquire timeout.
    #[error("Timed out acquiring lock {key} after {waited:?}")]
    Timeout { key: String, waited: Duration },

    /// The caller's cancellation token fired while waiting for the lease.
    #[error("Acquiring lock {key} was interrupted: {reason}")]
    Cancelled { key: String, reason: CancelReason },

    /// A bulk lock was requested without any keys.
    #[error("Bulk lock requires at least one key")]
    NoKeys,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LockError {
    /// The lock key this error concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            LockError::Timeout { key, .. } | LockError::Cancelled { key, .. } => Some(key),
            LockError::NoKeys | LockError::Database(_) => None,
        }
    }
}

impl Retryable for LockError {
    fn is_retryable(&self) -> bool {
        match self {
            LockError::Timeout { .. } => true,
            LockError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            LockError::Cancelled { .. } | LockError::NoKeys => false,
        }
    }
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable_cancellation_is_not() {
        let timeout = LockError::Timeout {
            key: "inventory:A".into(),
            waited: Duration::from_millis(10),
        };
        let cancelled = LockError::Cancelled {
            key: "inventory:A".into(),
            reason: CancelReason::DeadlineExceeded,
        };

        assert!(timeout.is_retryable());
        assert!(!cancelled.is_retryable());
        assert_eq!(timeout.key(), Some("inventory:A"));
        assert!(cancelled.to_string().contains("inventory:A"));
    }
}
