//! Order store collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use tokio::sync::RwLock;

use super::{Order, OrderStatus};
use crate::{DomainError, Result};

/// Persistence contract for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a newly placed order.
    async fn create(&self, order: Order) -> Result<Order>;

    /// Fetches an order by id.
    async fn get(&self, order_id: AggregateId) -> Result<Option<Order>>;

    /// Moves an order to `status`, validated against the transition table.
    async fn update_status(&self, order_id: AggregateId, status: OrderStatus) -> Result<Order>;
}

/// In-memory order store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<AggregateId, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn create(&self, order: Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(DomainError::OrderAlreadyExists(order.id()));
        }
        orders.insert(order.id(), order.clone());
        Ok(order)
    }

    async fn get(&self, order_id: AggregateId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, order_id: AggregateId, status: OrderStatus) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(DomainError::OrderNotFound(order_id))?;

        order.transition_to(status)?;
        tracing::debug!(%status, "order status updated");
        Ok(order.clone())
    }
}
