//! Collaborator contracts used by the pipeline, with in-memory
//! implementations for tests and single-process deployments.

pub mod catalog;
pub mod inventory;
pub mod notification;
pub mod payment;
pub mod shipping;

pub use catalog::{InMemoryProductCatalog, ProductCatalog, ProductInfo};
pub use inventory::{InventoryService, LedgerInventoryService};
pub use notification::{InMemoryNotificationService, NotificationKind, NotificationService};
pub use payment::{InMemoryPaymentService, PaymentReceipt, PaymentService};
pub use shipping::{InMemoryShippingService, Shipment, ShippingService};

use std::sync::{Mutex, MutexGuard};

/// Locks a fake's state, recovering it if a panicking test poisoned it.
pub(crate) fn lock_state<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
