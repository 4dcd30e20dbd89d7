use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{
    Result, StockLedgerEntry, StockMutation, StockThresholds, Version, store::LedgerStore,
};

/// Configuration for the read-through ledger cache.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// How long a cached entry is served before the next read goes to the store.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(2000),
        }
    }
}

#[derive(Default)]
struct CacheState {
    /// Bumped on every write. A read-miss only populates the cache if no
    /// write happened between its store read and its insert.
    generation: u64,
    entries: HashMap<ProductId, (Instant, StockLedgerEntry)>,
}

/// Read-through cache in front of any [`LedgerStore`].
///
/// Only `get_entry` is served from the cache. Writes always go to the inner
/// store and then drop the touched keys, whether the write succeeded or not;
/// the cache is never patched from a write's own result because that write
/// may have lost a version race. Scans bypass the cache entirely.
#[derive(Clone)]
pub struct CachedLedgerStore<S> {
    inner: S,
    state: Arc<RwLock<CacheState>>,
    ttl: Duration,
}

impl<S: LedgerStore> CachedLedgerStore<S> {
    /// Wraps `inner` with a cache using the given configuration.
    pub fn new(inner: S, config: CacheConfig) -> Self {
        Self {
            inner,
            state: Arc::new(RwLock::new(CacheState::default())),
            ttl: config.ttl,
        }
    }

    /// Gets a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of entries currently cached, expired ones included.
    pub async fn cached_len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Drops every cached entry.
    pub async fn invalidate_all(&self) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state.entries.clear();
    }

    async fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a ProductId>) {
        let mut state = self.state.write().await;
        state.generation += 1;
        for key in keys {
            state.entries.remove(key);
        }
    }

    async fn cached(&self, product_id: &ProductId) -> Option<StockLedgerEntry> {
        let state = self.state.read().await;
        state
            .entries
            .get(product_id)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, entry)| entry.clone())
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for CachedLedgerStore<S> {
    async fn create_entry(
        &self,
        product_id: ProductId,
        quantity: u32,
        thresholds: StockThresholds,
    ) -> Result<StockLedgerEntry> {
        let result = self
            .inner
            .create_entry(product_id.clone(), quantity, thresholds)
            .await;
        self.invalidate([&product_id]).await;
        result
    }

    async fn get_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>> {
        if let Some(entry) = self.cached(product_id).await {
            metrics::counter!("ledger_cache_hits_total").increment(1);
            return Ok(Some(entry));
        }
        metrics::counter!("ledger_cache_misses_total").increment(1);

        let generation = self.state.read().await.generation;
        let entry = self.inner.get_entry(product_id).await?;

        if let Some(entry) = &entry {
            let mut state = self.state.write().await;
            if state.generation == generation {
                state
                    .entries
                    .insert(product_id.clone(), (Instant::now(), entry.clone()));
            } else {
                tracing::trace!(%product_id, "skipping cache fill after concurrent write");
            }
        }

        Ok(entry)
    }

    async fn apply(
        &self,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry> {
        let result = self
            .inner
            .apply(product_id, mutation, expected_version)
            .await;
        self.invalidate([product_id]).await;
        result
    }

    async fn apply_bulk(
        &self,
        mutations: Vec<(ProductId, StockMutation)>,
    ) -> Result<Vec<StockLedgerEntry>> {
        let keys: Vec<ProductId> = mutations.iter().map(|(id, _)| id.clone()).collect();
        let result = self.inner.apply_bulk(mutations).await;
        self.invalidate(&keys).await;
        result
    }

    async fn get_low_stock_items(&self, threshold: u32) -> Result<Vec<StockLedgerEntry>> {
        self.inner.get_low_stock_items(threshold).await
    }

    async fn get_items_below_min_stock(&self) -> Result<Vec<StockLedgerEntry>> {
        self.inner.get_items_below_min_stock().await
    }

    async fn remove_entry(&self, product_id: &ProductId) -> Result<bool> {
        let result = self.inner.remove_entry(product_id).await;
        self.invalidate([product_id]).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryLedgerStore, LedgerStoreExt};

    async fn cached_store() -> (CachedLedgerStore<InMemoryLedgerStore>, ProductId) {
        let inner = InMemoryLedgerStore::new();
        let id = ProductId::new("SKU-001");
        inner
            .create_entry(id.clone(), 10, StockThresholds::default())
            .await
            .unwrap();
        let store = CachedLedgerStore::new(
            inner,
            CacheConfig {
                ttl: Duration::from_secs(5),
            },
        );
        (store, id)
    }

    #[tokio::test]
    async fn reads_are_served_from_cache() {
        let (store, id) = cached_store().await;

        store.get_entry(&id).await.unwrap();
        assert_eq!(store.cached_len().await, 1);

        // Writes that bypass the decorator are invisible until the entry expires.
        store.inner().reserve(&id, 3).await.unwrap();
        let entry = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.reserved(), 0);
    }

    #[tokio::test]
    async fn writes_invalidate_touched_keys() {
        let (store, id) = cached_store().await;
        store.get_entry(&id).await.unwrap();

        store.reserve(&id, 3).await.unwrap();
        assert_eq!(store.cached_len().await, 0);

        let entry = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.reserved(), 3);
        assert_eq!(entry.version(), Version::new(2));
    }

    #[tokio::test]
    async fn failed_writes_also_invalidate() {
        let (store, id) = cached_store().await;
        store.get_entry(&id).await.unwrap();

        assert!(store.reserve(&id, 50).await.is_err());
        assert_eq!(store.cached_len().await, 0);
    }

    #[tokio::test]
    async fn bulk_writes_invalidate_every_line() {
        let (store, id) = cached_store().await;
        let other = ProductId::new("SKU-002");
        store
            .create_entry(other.clone(), 5, StockThresholds::default())
            .await
            .unwrap();
        store.get_entry(&id).await.unwrap();
        store.get_entry(&other).await.unwrap();
        assert_eq!(store.cached_len().await, 2);

        store
            .bulk_reserve(&[
                crate::StockLine::new("SKU-001", 1),
                crate::StockLine::new("SKU-002", 1),
            ])
            .await
            .unwrap();
        assert_eq!(store.cached_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_reloaded() {
        let (store, id) = cached_store().await;
        store.get_entry(&id).await.unwrap();
        store.inner().reserve(&id, 4).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let entry = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.reserved(), 4);
    }

    #[tokio::test]
    async fn invalidate_all_clears_cache() {
        let (store, id) = cached_store().await;
        store.get_entry(&id).await.unwrap();

        store.invalidate_all().await;
        assert_eq!(store.cached_len().await, 0);
    }

    #[tokio::test]
    async fn missing_entries_are_not_cached() {
        let (store, _) = cached_store().await;
        let missing = ProductId::new("nope");
        assert!(store.get_entry(&missing).await.unwrap().is_none());
        assert_eq!(store.cached_len().await, 0);
    }
}
