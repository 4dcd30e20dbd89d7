//! Inventory movements for the pipeline.
//!
//! Every movement is the same stack: the retry policy re-runs a lock-guarded
//! ledger call, and the ledger's version check decides the winner. The lock
//! keeps concurrent writers from burning retries on each other; the version
//! check keeps them correct when a lease is lost.

use std::sync::Arc;

use async_trait::async_trait;
use common::{CancellationToken, RetryPolicy, retry_with_policy};
use ledger::{LedgerStore, LedgerStoreExt, StockLedgerEntry, StockLine, StockMutation};
use locking::{LockCoordinator, inventory_key};

use crate::error::InventoryError;

/// Stock movements the pipeline needs.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Holds `line.quantity` units for an order.
    async fn reserve(
        &self,
        line: &StockLine,
        cancel: &CancellationToken,
    ) -> Result<StockLedgerEntry, InventoryError>;

    /// Returns previously held units.
    async fn release(
        &self,
        line: &StockLine,
        cancel: &CancellationToken,
    ) -> Result<StockLedgerEntry, InventoryError>;

    /// Turns every held line into a permanent decrement, all or nothing.
    async fn fulfill_all(
        &self,
        lines: &[StockLine],
        cancel: &CancellationToken,
    ) -> Result<Vec<StockLedgerEntry>, InventoryError>;
}

/// [`InventoryService`] backed by a ledger store and a lock coordinator.
#[derive(Clone)]
pub struct LedgerInventoryService {
    ledger: Arc<dyn LedgerStore>,
    locks: LockCoordinator,
    retry: RetryPolicy,
}

impl LedgerInventoryService {
    pub fn new(ledger: Arc<dyn LedgerStore>, locks: LockCoordinator, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            locks,
            retry,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    async fn move_stock(
        &self,
        line: &StockLine,
        mutation: StockMutation,
        cancel: &CancellationToken,
    ) -> Result<StockLedgerEntry, InventoryError> {
        let key = inventory_key(&line.product_id);
        let key = key.as_str();
        let product_id = &line.product_id;

        retry_with_policy(&self.retry, cancel, move || {
            self.locks.with_lock(key, cancel, move || async move {
                Ok::<_, InventoryError>(self.ledger.apply(product_id, mutation, None).await?)
            })
        })
        .await
        .map_err(InventoryError::from_retry)
    }
}

#[async_trait]
impl InventoryService for LedgerInventoryService {
    #[tracing::instrument(skip(self, cancel), fields(product_id = %line.product_id, quantity = line.quantity))]
    async fn reserve(
        &self,
        line: &StockLine,
        cancel: &CancellationToken,
    ) -> Result<StockLedgerEntry, InventoryError> {
        self.move_stock(line, StockMutation::Reserve(line.quantity), cancel)
            .await
    }

    #[tracing::instrument(skip(self, cancel), fields(product_id = %line.product_id, quantity = line.quantity))]
    async fn release(
        &self,
        line: &StockLine,
        cancel: &CancellationToken,
    ) -> Result<StockLedgerEntry, InventoryError> {
        self.move_stock(line, StockMutation::Release(line.quantity), cancel)
            .await
    }

    #[tracing::instrument(skip(self, lines, cancel), fields(lines = lines.len()))]
    async fn fulfill_all(
        &self,
        lines: &[StockLine],
        cancel: &CancellationToken,
    ) -> Result<Vec<StockLedgerEntry>, InventoryError> {
        let keys: Vec<String> = lines
            .iter()
            .map(|line| inventory_key(&line.product_id))
            .collect();
        let keys = &keys;

        retry_with_policy(&self.retry, cancel, move || {
            self.locks
                .with_bulk_lock(keys.iter().cloned(), cancel, move || async move {
                    Ok::<_, InventoryError>(self.ledger.bulk_fulfill(lines).await?)
                })
        })
        .await
        .map_err(InventoryError::from_retry)
    }
}
