//! Shipping collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::AggregateId;
use domain::CustomerId;
use ledger::StockLine;
use serde::{Deserialize, Serialize};

use super::lock_state;
use crate::error::ServiceError;

/// A shipment created for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: String,
    pub tracking_number: String,
}

#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Books a shipment for the given lines.
    async fn create_shipment(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        lines: &[StockLine],
    ) -> Result<Shipment, ServiceError>;

    /// Cancels a shipment that has not left the warehouse.
    async fn cancel_shipment(&self, shipment_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct ShippingState {
    shipments: HashMap<String, AggregateId>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<Mutex<ShippingState>>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail shipment creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        lock_state(&self.state).fail_on_create = fail;
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        lock_state(&self.state).shipments.len()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(
        &self,
        order_id: AggregateId,
        _customer_id: CustomerId,
        _lines: &[StockLine],
    ) -> Result<Shipment, ServiceError> {
        let mut state = lock_state(&self.state);
        if state.fail_on_create {
            return Err(ServiceError::Unavailable {
                service: "shipping",
                reason: "Shipping service unavailable".to_string(),
            });
        }

        state.next_id += 1;
        let shipment_id = format!("SHIP-{:04}", state.next_id);
        let tracking_number = format!("TRACK-{:08}", state.next_id);
        state.shipments.insert(shipment_id.clone(), order_id);

        Ok(Shipment {
            shipment_id,
            tracking_number,
        })
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> Result<(), ServiceError> {
        lock_state(&self.state).shipments.remove(shipment_id);
        Ok(())
    }
}
