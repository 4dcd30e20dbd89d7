//! Order domain for the inventory fulfillment engine.
//!
//! This crate provides:
//! - The [`Order`] aggregate with its line items and computed total
//! - The [`OrderStatus`] state machine and its legal transition table
//! - The [`OrderStore`] collaborator contract with an in-memory implementation

pub mod error;
pub mod order;

pub use common::{AggregateId, Money, ProductId};
pub use error::{DomainError, Result};
pub use order::{
    CustomerId, InMemoryOrderStore, Order, OrderError, OrderItem, OrderStatus, OrderStore,
    PaymentMethod,
};
