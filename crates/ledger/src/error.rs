use common::{ProductId, Retryable};
use thiserror::Error;

use crate::Version;

/// Errors that can occur when reading or mutating the stock ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A quantity argument was rejected before touching the ledger.
    #[error("Invalid quantity {quantity} for product {product_id}: {reason}")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: u32,
        reason: &'static str,
    },

    /// Not enough available stock to satisfy a reservation.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Another writer updated the entry between our read and our write.
    #[error("Stock conflict for product {product_id}: expected version {expected}")]
    StockConflict {
        product_id: ProductId,
        expected: Version,
    },

    /// A release asked for more units than are currently reserved.
    #[error(
        "Invalid release for product {product_id}: requested {requested}, reserved {reserved}"
    )]
    InvalidRelease {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// A fulfill asked for more units than are currently reserved.
    #[error(
        "Invalid fulfill for product {product_id}: requested {requested}, reserved {reserved}"
    )]
    InvalidFulfill {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// No ledger entry exists for the product.
    #[error("No stock ledger entry for product {0}")]
    NotFound(ProductId),

    /// A ledger entry already exists for the product.
    #[error("Stock ledger entry already exists for product {0}")]
    AlreadyExists(ProductId),

    /// A bulk operation was called without any lines.
    #[error("Bulk operation requires at least one line")]
    EmptyBatch,

    /// A stored row does not satisfy the ledger invariants.
    #[error("Corrupt ledger row for product {product_id}: {reason}")]
    CorruptRow {
        product_id: ProductId,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// The product this error concerns, if any.
    pub fn product_id(&self) -> Option<&ProductId> {
        match self {
            LedgerError::InvalidQuantity { product_id, .. }
            | LedgerError::InsufficientStock { product_id, .. }
            | LedgerError::StockConflict { product_id, .. }
            | LedgerError::InvalidRelease { product_id, .. }
            | LedgerError::InvalidFulfill { product_id, .. }
            | LedgerError::CorruptRow { product_id, .. }
            | LedgerError::NotFound(product_id)
            | LedgerError::AlreadyExists(product_id) => Some(product_id),
            LedgerError::EmptyBatch | LedgerError::Database(_) | LedgerError::Migration(_) => None,
        }
    }

    /// Returns true for business-rule rejections that must never be retried.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientStock { .. }
                | LedgerError::InvalidRelease { .. }
                | LedgerError::InvalidFulfill { .. }
                | LedgerError::InvalidQuantity { .. }
        )
    }
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        match self {
            LedgerError::StockConflict { .. } => true,
            LedgerError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_and_transient_io_are_retryable() {
        let conflict = LedgerError::StockConflict {
            product_id: ProductId::new("SKU-1"),
            expected: Version::first(),
        };
        let insufficient = LedgerError::InsufficientStock {
            product_id: ProductId::new("SKU-1"),
            requested: 5,
            available: 1,
        };

        assert!(conflict.is_retryable());
        assert!(!insufficient.is_retryable());
        assert!(LedgerError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!LedgerError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!LedgerError::NotFound(ProductId::new("SKU-1")).is_retryable());
    }

    #[test]
    fn errors_name_the_product() {
        let err = LedgerError::InvalidRelease {
            product_id: ProductId::new("SKU-9"),
            requested: 3,
            reserved: 2,
        };
        assert_eq!(err.product_id(), Some(&ProductId::new("SKU-9")));
        assert!(err.is_business_rule());
        assert!(err.to_string().contains("SKU-9"));
    }
}
