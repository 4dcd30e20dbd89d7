//! Lease-based lock coordination.
//!
//! Leases live in a [`LeaseStore`] so several processes sharing one database
//! can serialize access to the same product before touching the ledger. The
//! ledger's version check stays the correctness backstop; a lost or expired
//! lease only costs extra `StockConflict` retries.
//!
//! - [`LeaseStore`] is the storage contract, implemented by
//!   [`InMemoryLeaseStore`] and [`PostgresLeaseStore`]
//! - [`LockCoordinator`] adds bounded acquisition, background renewal and
//!   deadlock-free multi-key locking on top of it

pub mod coordinator;
pub mod error;
pub mod lease;
pub mod postgres;

pub use coordinator::{LeaseGuard, LockConfig, LockCoordinator, inventory_key};
pub use error::{LockError, Result};
pub use lease::{InMemoryLeaseStore, LeaseStore};
pub use postgres::PostgresLeaseStore;
