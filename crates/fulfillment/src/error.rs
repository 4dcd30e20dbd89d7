//! Fulfillment error types.

use common::{CancelReason, ProductId, RetryError, Retryable};
use domain::{DomainError, OrderError};
use ledger::LedgerError;
use locking::LockError;
use thiserror::Error;

use crate::stage::Stage;

/// Error reported by an external collaborator (catalog, payment, shipping,
/// notification).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The collaborator understood the request and refused it.
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },

    /// The collaborator could not be reached or failed internally.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },
}

/// Errors from the lock + retry + ledger path used to move stock.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// Every retry attempt hit a transient failure.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<InventoryError>,
    },

    /// The caller's token fired between attempts.
    #[error("inventory operation interrupted: {0}")]
    Interrupted(CancelReason),
}

impl InventoryError {
    /// Flattens the outcome of a retry loop.
    pub fn from_retry(err: RetryError<InventoryError>) -> Self {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, last } => InventoryError::Exhausted {
                attempts,
                last: Box::new(last),
            },
            RetryError::Interrupted { reason, .. } => InventoryError::Interrupted(reason),
        }
    }

    /// The innermost error, looking through retry exhaustion.
    pub fn root(&self) -> &InventoryError {
        match self {
            InventoryError::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }

    /// The cancellation reason, if this error is an interruption.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self.root() {
            InventoryError::Interrupted(reason) => Some(*reason),
            InventoryError::Lock(LockError::Cancelled { reason, .. }) => Some(*reason),
            _ => None,
        }
    }
}

impl Retryable for InventoryError {
    fn is_retryable(&self) -> bool {
        match self {
            InventoryError::Ledger(e) => e.is_retryable(),
            InventoryError::Lock(e) => e.is_retryable(),
            InventoryError::Exhausted { .. } | InventoryError::Interrupted(_) => false,
        }
    }
}

/// Stable, business-facing classification of a failed fulfillment.
///
/// Internal conflict and lock errors never reach callers as such; they are
/// folded into one of these categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    InvalidRequest,
    InsufficientStock,
    PaymentDeclined,
    Timeout,
    Cancelled,
    Unavailable,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::InvalidRequest => "invalid_request",
            FailureCategory::InsufficientStock => "insufficient_stock",
            FailureCategory::PaymentDeclined => "payment_declined",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Cancelled => "cancelled",
            FailureCategory::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that end a fulfillment run.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The request failed validation before any side effect.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A requested product is not in the catalog.
    #[error("Unknown product: {0}")]
    UnknownProduct(ProductId),

    /// A requested product exists but is not for sale.
    #[error("Product {0} is not active")]
    InactiveProduct(ProductId),

    /// The catalog lookup itself failed.
    #[error("Catalog lookup for {product_id} failed: {source}")]
    Catalog {
        product_id: ProductId,
        source: ServiceError,
    },

    /// The order aggregate rejected the request.
    #[error("Order rejected: {0}")]
    Order(#[from] OrderError),

    /// The order store failed.
    #[error("Order store error: {0}")]
    OrderStore(#[from] DomainError),

    /// Moving stock for one product failed.
    #[error("Inventory {operation} failed for {product_id}: {source}")]
    Inventory {
        operation: &'static str,
        product_id: ProductId,
        source: InventoryError,
    },

    /// Committing reserved stock for the whole order failed.
    #[error("Committing stock failed: {0}")]
    Commit(InventoryError),

    /// The payment collaborator failed or declined.
    #[error("Payment failed: {0}")]
    Payment(ServiceError),

    /// The shipping collaborator failed.
    #[error("Shipping failed: {0}")]
    Shipping(ServiceError),

    /// The notification collaborator failed.
    #[error("Notification failed: {0}")]
    Notification(ServiceError),

    /// The pipeline deadline elapsed.
    #[error("Pipeline timed out before {stage} completed")]
    Timeout { stage: Stage },

    /// The caller cancelled the run.
    #[error("Pipeline cancelled before {stage} completed")]
    Cancelled { stage: Stage },

    /// The spawned pipeline task panicked or was aborted.
    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),
}

impl FulfillmentError {
    /// Error for a run stopped by its token while in `stage`.
    pub fn interrupted(stage: Stage, reason: CancelReason) -> Self {
        match reason {
            CancelReason::DeadlineExceeded => FulfillmentError::Timeout { stage },
            CancelReason::Cancelled => FulfillmentError::Cancelled { stage },
        }
    }

    /// Translates the error into its business-facing category.
    pub fn category(&self) -> FailureCategory {
        match self {
            FulfillmentError::InvalidRequest(_)
            | FulfillmentError::UnknownProduct(_)
            | FulfillmentError::InactiveProduct(_)
            | FulfillmentError::Order(_) => FailureCategory::InvalidRequest,
            FulfillmentError::Inventory { source, .. } | FulfillmentError::Commit(source) => {
                inventory_category(source)
            }
            FulfillmentError::Payment(ServiceError::Rejected { .. }) => {
                FailureCategory::PaymentDeclined
            }
            FulfillmentError::Timeout { .. } => FailureCategory::Timeout,
            FulfillmentError::Cancelled { .. } => FailureCategory::Cancelled,
            FulfillmentError::Catalog { .. }
            | FulfillmentError::OrderStore(_)
            | FulfillmentError::Payment(ServiceError::Unavailable { .. })
            | FulfillmentError::Shipping(_)
            | FulfillmentError::Notification(_)
            | FulfillmentError::TaskFailed(_) => FailureCategory::Unavailable,
        }
    }

    /// The product the failure concerns, if any.
    pub fn product_id(&self) -> Option<&ProductId> {
        match self {
            FulfillmentError::UnknownProduct(id)
            | FulfillmentError::InactiveProduct(id)
            | FulfillmentError::Catalog { product_id: id, .. }
            | FulfillmentError::Inventory { product_id: id, .. } => Some(id),
            _ => None,
        }
    }

    /// True when the error only reports that the run's token fired.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self.category(),
            FailureCategory::Timeout | FailureCategory::Cancelled
        )
    }
}

fn inventory_category(err: &InventoryError) -> FailureCategory {
    if let Some(reason) = err.cancel_reason() {
        return match reason {
            CancelReason::DeadlineExceeded => FailureCategory::Timeout,
            CancelReason::Cancelled => FailureCategory::Cancelled,
        };
    }
    match err.root() {
        InventoryError::Ledger(LedgerError::InsufficientStock { .. }) => {
            FailureCategory::InsufficientStock
        }
        InventoryError::Ledger(LedgerError::NotFound(_) | LedgerError::InvalidQuantity { .. }) => {
            FailureCategory::InvalidRequest
        }
        _ => FailureCategory::Unavailable,
    }
}

/// Result type for fulfillment operations.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ledger::Version;
    use std::time::Duration;

    fn inventory(source: InventoryError) -> FulfillmentError {
        FulfillmentError::Inventory {
            operation: "reserve",
            product_id: ProductId::new("SKU-1"),
            source,
        }
    }

    #[test]
    fn insufficient_stock_is_surfaced_as_such() {
        let err = inventory(InventoryError::Ledger(LedgerError::InsufficientStock {
            product_id: ProductId::new("SKU-1"),
            requested: 5,
            available: 1,
        }));
        assert_eq!(err.category(), FailureCategory::InsufficientStock);
        assert_eq!(err.product_id(), Some(&ProductId::new("SKU-1")));
    }

    #[test]
    fn raw_conflicts_and_lock_timeouts_are_never_exposed() {
        let conflict = inventory(InventoryError::Exhausted {
            attempts: 5,
            last: Box::new(InventoryError::Ledger(LedgerError::StockConflict {
                product_id: ProductId::new("SKU-1"),
                expected: Version::first(),
            })),
        });
        let lock = inventory(InventoryError::Exhausted {
            attempts: 5,
            last: Box::new(InventoryError::Lock(LockError::Timeout {
                key: "inventory:SKU-1".into(),
                waited: Duration::from_secs(3),
            })),
        });

        assert_eq!(conflict.category(), FailureCategory::Unavailable);
        assert_eq!(lock.category(), FailureCategory::Unavailable);
    }

    #[test]
    fn interruptions_map_to_timeout_or_cancelled() {
        let deadline = inventory(InventoryError::Interrupted(CancelReason::DeadlineExceeded));
        let cancelled = inventory(InventoryError::Lock(LockError::Cancelled {
            key: "inventory:SKU-1".into(),
            reason: CancelReason::Cancelled,
        }));

        assert_eq!(deadline.category(), FailureCategory::Timeout);
        assert_eq!(cancelled.category(), FailureCategory::Cancelled);
        assert!(deadline.is_interruption());
        assert_eq!(
            FulfillmentError::interrupted(Stage::ProcessPayment, CancelReason::DeadlineExceeded)
                .category(),
            FailureCategory::Timeout
        );
    }

    #[test]
    fn payment_decline_versus_outage() {
        let declined = FulfillmentError::Payment(ServiceError::Rejected {
            service: "payment",
            reason: "card declined".into(),
        });
        let outage = FulfillmentError::Payment(ServiceError::Unavailable {
            service: "payment",
            reason: "gateway timeout".into(),
        });
        assert_eq!(declined.category(), FailureCategory::PaymentDeclined);
        assert_eq!(outage.category(), FailureCategory::Unavailable);
    }

    #[test]
    fn retry_outcomes_flatten() {
        let exhausted = InventoryError::from_retry(RetryError::Exhausted {
            attempts: 3,
            last: InventoryError::Interrupted(CancelReason::Cancelled),
        });
        assert!(matches!(
            exhausted,
            InventoryError::Exhausted { attempts: 3, .. }
        ));

        let interrupted = InventoryError::from_retry(RetryError::Interrupted {
            reason: CancelReason::DeadlineExceeded,
            attempts: 1,
            last: None,
        });
        assert_eq!(
            interrupted.cancel_reason(),
            Some(CancelReason::DeadlineExceeded)
        );
    }
}
