//! Shared building blocks for the inventory fulfillment engine.
//!
//! - Identifier and money value types used across crates
//! - Retry/backoff policy for transient failures
//! - Cancellation token observed by lock, retry and pipeline loops

pub mod cancel;
pub mod retry;
pub mod types;

pub use cancel::{CancelReason, CancellationToken};
pub use retry::{RetryError, RetryPolicy, RetryPolicyBuilder, Retryable, retry_with_policy};
pub use types::{AggregateId, Money, ProductId};
