//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money, ProductId};
use serde::{Deserialize, Serialize};

use super::{CustomerId, OrderError, OrderItem, OrderStatus};

/// Order aggregate root.
///
/// Created in `Pending` with a validated, non-empty item list and a total
/// computed from the items' unit prices. After creation only the status
/// changes, and only along the [`OrderStatus`] transition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: AggregateId,
    customer_id: CustomerId,
    items: Vec<OrderItem>,
    total_amount: Money,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new order.
    ///
    /// Lines for the same product are merged. Every line needs a positive
    /// quantity and a positive unit price.
    pub fn place(customer_id: CustomerId, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut merged: Vec<OrderItem> = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price.cents(),
                });
            }

            match merged.iter_mut().find(|m| m.product_id == item.product_id) {
                Some(existing) => {
                    existing.quantity = existing
                        .quantity
                        .checked_add(item.quantity)
                        .ok_or(OrderError::TotalOverflow)?;
                }
                None => merged.push(item),
            }
        }

        let total_amount = merged.iter().try_fold(Money::zero(), |total, item| {
            item.total_price()
                .and_then(|line| total.checked_add(line))
                .ok_or(OrderError::TotalOverflow)
        })?;

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            customer_id,
            items: merged,
            total_amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves the order to `next` if the transition table allows it.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns an item by product ID.
    pub fn get_item(&self, product_id: &ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|item| &item.product_id == product_id)
    }

    /// Returns the total quantity of all items.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
