//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Paid ──► Shipped ──► Delivered
///    │            │           │
///    ├──► Failed  └───────────┴──► Cancelled
///    └──────────────────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order placed, inventory not yet reserved.
    #[default]
    Pending,

    /// Inventory reserved, awaiting payment.
    Confirmed,

    /// Payment captured.
    Paid,

    /// Shipment created and stock committed.
    Shipped,

    /// Delivered to the customer (terminal state).
    Delivered,

    /// Order was cancelled (terminal state).
    Cancelled,

    /// Order could not be processed (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if the transition table allows moving to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled | Failed)
                | (Confirmed, Paid | Cancelled)
                | (Paid, Shipped | Cancelled)
                | (Shipped, Delivered)
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
