//! Stock ledger entry and the pure mutation rules shared by every store.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Optimistic concurrency token for a ledger entry.
///
/// A freshly stocked entry is at version 1; every successful mutation
/// increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of a newly created entry.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Soft thresholds used for low-stock alerting. Never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockThresholds {
    pub min_stock: u32,
    pub max_stock: Option<u32>,
}

impl StockThresholds {
    pub fn new(min_stock: u32, max_stock: Option<u32>) -> Self {
        Self {
            min_stock,
            max_stock,
        }
    }
}

/// A `(product, quantity)` pair used by bulk operations and order lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// The closed set of changes a ledger entry can undergo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockMutation {
    /// Hold units against an in-flight order.
    Reserve(u32),
    /// Return held units to the available pool.
    Release(u32),
    /// Turn held units into a permanent decrement.
    Fulfill(u32),
    /// Administrative absolute set of the total quantity.
    SetQuantity(u32),
}

impl StockMutation {
    /// Operation name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            StockMutation::Reserve(_) => "reserve",
            StockMutation::Release(_) => "release",
            StockMutation::Fulfill(_) => "fulfill",
            StockMutation::SetQuantity(_) => "update_stock",
        }
    }
}

/// The authoritative stock record for one product.
///
/// Fields are private so an entry can only come into existence through
/// [`StockLedgerEntry::new`], [`StockLedgerEntry::apply`] or the checked
/// [`StockLedgerEntry::from_parts`]; all three guarantee
/// `available == quantity - reserved` and `reserved <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    product_id: ProductId,
    quantity: u32,
    reserved: u32,
    available: u32,
    thresholds: StockThresholds,
    version: Version,
    updated_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    /// Creates the entry for a newly stocked product.
    pub fn new(product_id: ProductId, quantity: u32, thresholds: StockThresholds) -> Self {
        Self {
            product_id,
            quantity,
            reserved: 0,
            available: quantity,
            thresholds,
            version: Version::first(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds an entry from stored columns, rejecting rows that break the
    /// ledger invariants.
    pub fn from_parts(
        product_id: ProductId,
        quantity: i64,
        reserved: i64,
        available: i64,
        thresholds: StockThresholds,
        version: Version,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let corrupt = |reason: String| LedgerError::CorruptRow {
            product_id: product_id.clone(),
            reason,
        };
        let quantity = u32::try_from(quantity)
            .map_err(|_| corrupt(format!("quantity {quantity} out of range")))?;
        let reserved = u32::try_from(reserved)
            .map_err(|_| corrupt(format!("reserved {reserved} out of range")))?;

        if reserved > quantity {
            return Err(corrupt(format!(
                "reserved {reserved} exceeds quantity {quantity}"
            )));
        }
        if available != i64::from(quantity - reserved) {
            return Err(corrupt(format!(
                "available {available} != quantity {quantity} - reserved {reserved}"
            )));
        }

        Ok(Self {
            product_id,
            quantity,
            reserved,
            available: quantity - reserved,
            thresholds,
            version,
            updated_at,
        })
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn thresholds(&self) -> StockThresholds {
        self.thresholds
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True when available stock is at or below the soft minimum.
    pub fn is_below_min_stock(&self) -> bool {
        self.available <= self.thresholds.min_stock
    }

    /// True when total stock exceeds the soft maximum, if one is set.
    pub fn is_above_max_stock(&self) -> bool {
        self.thresholds
            .max_stock
            .is_some_and(|max| self.quantity > max)
    }

    /// Computes the entry that results from `mutation`, one version later.
    ///
    /// Pure: the receiver is left untouched, so a store can validate against
    /// the state it read and then write conditionally on that state's version.
    pub fn apply(&self, mutation: StockMutation) -> Result<StockLedgerEntry> {
        let mut next = self.clone();
        let product_id = || self.product_id.clone();

        match mutation {
            StockMutation::Reserve(qty) => {
                if qty == 0 {
                    return Err(LedgerError::InvalidQuantity {
                        product_id: product_id(),
                        quantity: qty,
                        reason: "reservation quantity must be positive",
                    });
                }
                if self.available < qty {
                    return Err(LedgerError::InsufficientStock {
                        product_id: product_id(),
                        requested: qty,
                        available: self.available,
                    });
                }
                next.reserved += qty;
            }
            StockMutation::Release(qty) => {
                if qty == 0 || qty > self.reserved {
                    return Err(LedgerError::InvalidRelease {
                        product_id: product_id(),
                        requested: qty,
                        reserved: self.reserved,
                    });
                }
                next.reserved -= qty;
            }
            StockMutation::Fulfill(qty) => {
                if qty == 0 {
                    return Err(LedgerError::InvalidQuantity {
                        product_id: product_id(),
                        quantity: qty,
                        reason: "fulfill quantity must be positive",
                    });
                }
                if qty > self.reserved {
                    return Err(LedgerError::InvalidFulfill {
                        product_id: product_id(),
                        requested: qty,
                        reserved: self.reserved,
                    });
                }
                next.reserved -= qty;
                next.quantity -= qty;
            }
            StockMutation::SetQuantity(quantity) => {
                if quantity < self.reserved {
                    return Err(LedgerError::InvalidQuantity {
                        product_id: product_id(),
                        quantity,
                        reason: "quantity cannot drop below reserved units",
                    });
                }
                next.quantity = quantity;
            }
        }

        next.available = next.quantity - next.reserved;
        next.version = self.version.next();
        next.updated_at = Utc::now();

        debug_assert!(next.reserved <= next.quantity);
        debug_assert_eq!(next.available, next.quantity - next.reserved);

        Ok(next)
    }
}
