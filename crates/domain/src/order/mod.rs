//! Order aggregate and related types.

mod aggregate;
mod state;
mod store;
mod value_objects;

pub use aggregate::Order;
pub use state::OrderStatus;
pub use store::{InMemoryOrderStore, OrderStore};
pub use value_objects::{CustomerId, OrderItem, PaymentMethod};

use common::ProductId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The status table does not allow this transition.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price} (must be greater than 0)")]
    InvalidPrice { product_id: ProductId, price: i64 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// The order total does not fit in a money amount.
    #[error("Order total overflows")]
    TotalOverflow,
}
