//! Domain error types.

use common::AggregateId;
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during order store operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The order itself rejected the operation.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// No order with this id exists.
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// An order with this id was already stored.
    #[error("Order already exists: {0}")]
    OrderAlreadyExists(AggregateId),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
