use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use tokio::sync::RwLock;

use crate::{
    LedgerError, Result, StockLedgerEntry, StockMutation, StockThresholds, Version,
    store::{LedgerStore, record_outcome},
};

/// In-memory ledger store for tests and single-process deployments.
///
/// Single-entry mutations follow the same read → validate → conditional write
/// shape as the PostgreSQL store: the read and the write take the lock
/// separately, so concurrent writers genuinely race and the loser sees
/// `StockConflict`. Bulk operations hold the write lock for the whole batch,
/// which plays the role of the enclosing transaction.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    entries: Arc<RwLock<HashMap<ProductId, StockLedgerEntry>>>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of ledger entries.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Clears all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Entries matching `wanted`, ascending by available then product id.
    async fn scan(&self, wanted: impl Fn(&StockLedgerEntry) -> bool) -> Vec<StockLedgerEntry> {
        let entries = self.entries.read().await;
        let mut matched: Vec<_> = entries.values().filter(|e| wanted(*e)).cloned().collect();
        matched.sort_by(|a, b| {
            a.available()
                .cmp(&b.available())
                .then_with(|| a.product_id().cmp(b.product_id()))
        });
        matched
    }

    async fn apply_once(
        &self,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry> {
        let current = self
            .get_entry(product_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(product_id.clone()))?;

        if let Some(expected) = expected_version
            && current.version() != expected
        {
            return Err(LedgerError::StockConflict {
                product_id: product_id.clone(),
                expected,
            });
        }

        let updated = current.apply(mutation)?;
        self.compare_and_swap(current.version(), updated).await
    }

    /// Writes `updated` only if the stored entry is still at `expected`.
    async fn compare_and_swap(
        &self,
        expected: Version,
        updated: StockLedgerEntry,
    ) -> Result<StockLedgerEntry> {
        let mut entries = self.entries.write().await;
        let product_id = updated.product_id().clone();

        match entries.get(&product_id) {
            Some(current) if current.version() == expected => {
                entries.insert(product_id, updated.clone());
                Ok(updated)
            }
            Some(_) => Err(LedgerError::StockConflict {
                product_id,
                expected,
            }),
            None => Err(LedgerError::NotFound(product_id)),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_entry(
        &self,
        product_id: ProductId,
        quantity: u32,
        thresholds: StockThresholds,
    ) -> Result<StockLedgerEntry> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&product_id) {
            return Err(LedgerError::AlreadyExists(product_id));
        }

        let entry = StockLedgerEntry::new(product_id.clone(), quantity, thresholds);
        entries.insert(product_id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>> {
        Ok(self.entries.read().await.get(product_id).cloned())
    }

    #[tracing::instrument(skip(self), fields(op = mutation.kind()))]
    async fn apply(
        &self,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry> {
        let result = self.apply_once(product_id, mutation, expected_version).await;
        record_outcome(mutation.kind(), &result);
        result
    }

    #[tracing::instrument(skip(self, mutations), fields(lines = mutations.len()))]
    async fn apply_bulk(
        &self,
        mutations: Vec<(ProductId, StockMutation)>,
    ) -> Result<Vec<StockLedgerEntry>> {
        if mutations.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        let op = mutations[0].1.kind();

        let mut entries = self.entries.write().await;
        let result = stage_bulk(&entries, &mutations).map(|(staged, applied)| {
            entries.extend(staged);
            applied
        });

        record_outcome(op, &result);
        result
    }

    async fn get_low_stock_items(&self, threshold: u32) -> Result<Vec<StockLedgerEntry>> {
        Ok(self.scan(|e| e.available() <= threshold).await)
    }

    async fn get_items_below_min_stock(&self) -> Result<Vec<StockLedgerEntry>> {
        Ok(self.scan(StockLedgerEntry::is_below_min_stock).await)
    }

    async fn remove_entry(&self, product_id: &ProductId) -> Result<bool> {
        Ok(self.entries.write().await.remove(product_id).is_some())
    }
}

/// Applies a batch to staged copies; nothing reaches the map unless every
/// line succeeds.
fn stage_bulk(
    entries: &HashMap<ProductId, StockLedgerEntry>,
    mutations: &[(ProductId, StockMutation)],
) -> Result<(HashMap<ProductId, StockLedgerEntry>, Vec<StockLedgerEntry>)> {
    let mut staged: HashMap<ProductId, StockLedgerEntry> = HashMap::new();
    let mut applied = Vec::with_capacity(mutations.len());

    for (product_id, mutation) in mutations {
        let current = match staged.get(product_id) {
            Some(entry) => entry.clone(),
            None => entries
                .get(product_id)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(product_id.clone()))?,
        };
        let updated = current.apply(*mutation)?;
        staged.insert(product_id.clone(), updated.clone());
        applied.push(updated);
    }

    Ok((staged, applied))
}
