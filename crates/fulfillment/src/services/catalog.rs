//! Product catalog lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use super::lock_state;
use crate::error::ServiceError;

/// Price and availability of a product as the catalog sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub active: bool,
}

impl ProductInfo {
    pub fn new(product_id: impl Into<ProductId>, name: impl Into<String>, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            unit_price,
            active: true,
        }
    }

    /// Marks the product as not for sale.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Read-only product lookup.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the product, or `None` if it is unknown.
    async fn lookup(&self, product_id: &ProductId) -> Result<Option<ProductInfo>, ServiceError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, ProductInfo>,
    fail_on_lookup: bool,
}

/// In-memory catalog for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub fn insert(&self, product: ProductInfo) {
        lock_state(&self.state)
            .products
            .insert(product.product_id.clone(), product);
    }

    /// Makes every lookup fail as if the catalog were down.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        lock_state(&self.state).fail_on_lookup = fail;
    }

    pub fn product_count(&self) -> usize {
        lock_state(&self.state).products.len()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn lookup(&self, product_id: &ProductId) -> Result<Option<ProductInfo>, ServiceError> {
        let state = lock_state(&self.state);
        if state.fail_on_lookup {
            return Err(ServiceError::Unavailable {
                service: "catalog",
                reason: "catalog offline".to_string(),
            });
        }
        Ok(state.products.get(product_id).cloned())
    }
}
