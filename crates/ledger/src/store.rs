use async_trait::async_trait;
use common::ProductId;

use crate::{
    LedgerError, Result, StockLedgerEntry, StockLine, StockMutation, StockThresholds, Version,
};

/// Core trait for stock ledger storage.
///
/// Every mutation is a compare-and-swap: the implementation reads the current
/// entry, computes the new state with [`StockLedgerEntry::apply`], and writes
/// it back only if the stored version is still the one it read. A lost race
/// surfaces as [`LedgerError::StockConflict`]; the store itself never retries.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the entry for a newly stocked product at version 1.
    ///
    /// Fails with `AlreadyExists` if the product already has an entry.
    async fn create_entry(
        &self,
        product_id: ProductId,
        quantity: u32,
        thresholds: StockThresholds,
    ) -> Result<StockLedgerEntry>;

    /// Reads the current entry for a product.
    async fn get_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>>;

    /// Applies one mutation with a versioned read-modify-write.
    ///
    /// With `expected_version` set, the mutation is only applied if the stored
    /// entry is at exactly that version; otherwise the version read in this
    /// call is the one the write is conditioned on.
    async fn apply(
        &self,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry>;

    /// Applies a batch of mutations as one all-or-nothing unit.
    ///
    /// If any line fails, none of the batch stays applied and the error names
    /// the failing product. Returns the entries in line order.
    async fn apply_bulk(
        &self,
        mutations: Vec<(ProductId, StockMutation)>,
    ) -> Result<Vec<StockLedgerEntry>>;

    /// Returns entries with `available <= threshold`, ascending by available.
    async fn get_low_stock_items(&self, threshold: u32) -> Result<Vec<StockLedgerEntry>>;

    /// Returns entries at or below their own `min_stock`, ascending by
    /// available. See [`StockLedgerEntry::is_below_min_stock`].
    async fn get_items_below_min_stock(&self) -> Result<Vec<StockLedgerEntry>>;

    /// Removes a retired product's entry. Returns false if there was none.
    async fn remove_entry(&self, product_id: &ProductId) -> Result<bool>;
}

/// Extension trait providing the ledger vocabulary on top of [`LedgerStore`].
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Holds `quantity` units of a product against an in-flight order.
    async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<StockLedgerEntry> {
        self.apply(product_id, StockMutation::Reserve(quantity), None)
            .await
    }

    /// Returns previously reserved units to the available pool.
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<StockLedgerEntry> {
        self.apply(product_id, StockMutation::Release(quantity), None)
            .await
    }

    /// Converts reserved units into a permanent decrement.
    async fn fulfill(&self, product_id: &ProductId, quantity: u32) -> Result<StockLedgerEntry> {
        self.apply(product_id, StockMutation::Fulfill(quantity), None)
            .await
    }

    /// Sets the total quantity of a product (administrative restock/adjust).
    async fn update_stock(
        &self,
        product_id: &ProductId,
        new_quantity: u32,
    ) -> Result<StockLedgerEntry> {
        self.apply(product_id, StockMutation::SetQuantity(new_quantity), None)
            .await
    }

    /// Reserves every line or none of them.
    async fn bulk_reserve(&self, lines: &[StockLine]) -> Result<Vec<StockLedgerEntry>> {
        self.apply_bulk(to_mutations(lines, StockMutation::Reserve)?)
            .await
    }

    /// Releases every line or none of them.
    async fn bulk_release(&self, lines: &[StockLine]) -> Result<Vec<StockLedgerEntry>> {
        self.apply_bulk(to_mutations(lines, StockMutation::Release)?)
            .await
    }

    /// Fulfills every line or none of them.
    async fn bulk_fulfill(&self, lines: &[StockLine]) -> Result<Vec<StockLedgerEntry>> {
        self.apply_bulk(to_mutations(lines, StockMutation::Fulfill)?)
            .await
    }

    /// Checks if a product has a ledger entry.
    async fn entry_exists(&self, product_id: &ProductId) -> Result<bool> {
        Ok(self.get_entry(product_id).await?.is_some())
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

fn to_mutations(
    lines: &[StockLine],
    make: fn(u32) -> StockMutation,
) -> Result<Vec<(ProductId, StockMutation)>> {
    if lines.is_empty() {
        return Err(LedgerError::EmptyBatch);
    }
    Ok(lines
        .iter()
        .map(|line| (line.product_id.clone(), make(line.quantity)))
        .collect())
}

/// Records the outcome of a ledger operation.
pub(crate) fn record_outcome<T>(op: &'static str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(LedgerError::StockConflict { .. }) => {
            metrics::counter!("ledger_conflicts_total", "op" => op).increment(1);
            "conflict"
        }
        Err(e) if e.is_business_rule() => "rejected",
        Err(_) => "error",
    };
    metrics::counter!("ledger_operations_total", "op" => op, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batches_are_rejected() {
        assert!(matches!(
            to_mutations(&[], StockMutation::Reserve),
            Err(LedgerError::EmptyBatch)
        ));
    }

    #[test]
    fn lines_map_to_mutations_in_order() {
        let lines = [StockLine::new("A", 1), StockLine::new("B", 2)];
        let mutations = to_mutations(&lines, StockMutation::Release).unwrap();
        assert_eq!(
            mutations,
            vec![
                (ProductId::new("A"), StockMutation::Release(1)),
                (ProductId::new("B"), StockMutation::Release(2)),
            ]
        );
    }
}
