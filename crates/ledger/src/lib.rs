//! Stock ledger for the inventory fulfillment engine.
//!
//! One [`StockLedgerEntry`] per product records total, reserved and available
//! units. Every mutation is a compare-and-swap on the entry's [`Version`]:
//! read the row, validate, write back only if nobody else wrote in between.
//!
//! - [`LedgerStore`] is the storage contract, [`LedgerStoreExt`] adds the
//!   reserve/release/fulfill vocabulary on top of it
//! - [`InMemoryLedgerStore`] and [`PostgresLedgerStore`] implement it
//! - [`CachedLedgerStore`] wraps any store with a read-through cache that is
//!   invalidated on every write

pub mod cache;
pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use cache::{CacheConfig, CachedLedgerStore};
pub use common::ProductId;
pub use entry::{StockLedgerEntry, StockLine, StockMutation, StockThresholds, Version};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{LedgerStore, LedgerStoreExt};
