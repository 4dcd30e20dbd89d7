//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use ledger::{
    LedgerError, LedgerStore, LedgerStoreExt, PostgresLedgerStore, ProductId, StockLine,
    StockMutation, StockThresholds, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_stock_ledger.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and a cleared ledger table
async fn get_test_store() -> PostgresLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_ledger")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLedgerStore::new(pool)
}

async fn stock(store: &PostgresLedgerStore, sku: &str, quantity: u32) -> ProductId {
    let id = ProductId::new(sku);
    store
        .create_entry(id.clone(), quantity, StockThresholds::new(5, Some(500)))
        .await
        .unwrap();
    id
}

#[tokio::test]
#[serial]
async fn create_and_read_entry() {
    let store = get_test_store().await;
    let id = stock(&store, "SKU-001", 100).await;

    let entry = store.get_entry(&id).await.unwrap().unwrap();
    assert_eq!(entry.quantity(), 100);
    assert_eq!(entry.reserved(), 0);
    assert_eq!(entry.available(), 100);
    assert_eq!(entry.version(), Version::first());
    assert_eq!(entry.thresholds(), StockThresholds::new(5, Some(500)));

    let again = store
        .create_entry(id, 1, StockThresholds::default())
        .await;
    assert!(matches!(again, Err(LedgerError::AlreadyExists(_))));
}

#[tokio::test]
#[serial]
async fn reserve_release_fulfill() {
    let store = get_test_store().await;
    let id = stock(&store, "SKU-001", 100).await;

    store.reserve(&id, 5).await.unwrap();
    let entry = store.release(&id, 3).await.unwrap();
    assert_eq!(entry.reserved(), 2);

    let err = store.release(&id, 3).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidRelease { .. }));

    let entry = store.fulfill(&id, 2).await.unwrap();
    assert_eq!(entry.quantity(), 98);
    assert_eq!(entry.reserved(), 0);
    assert_eq!(entry.available(), 98);
    assert_eq!(entry.version(), Version::new(4));
}

#[tokio::test]
#[serial]
async fn insufficient_stock_leaves_row_untouched() {
    let store = get_test_store().await;
    let id = stock(&store, "SKU-001", 3).await;

    let err = store.reserve(&id, 4).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientStock {
            requested: 4,
            available: 3,
            ..
        }
    ));

    let entry = store.get_entry(&id).await.unwrap().unwrap();
    assert_eq!(entry.version(), Version::first());
}

#[tokio::test]
#[serial]
async fn stale_version_fails() {
    let store = get_test_store().await;
    let id = stock(&store, "SKU-001", 10).await;
    store.reserve(&id, 1).await.unwrap();

    let result = store
        .apply(&id, StockMutation::Reserve(1), Some(Version::first()))
        .await;
    assert!(matches!(result, Err(LedgerError::StockConflict { .. })));
}

#[tokio::test]
#[serial]
async fn bulk_reserve_rolls_back_on_failure() {
    let store = get_test_store().await;
    stock(&store, "A", 10).await;
    stock(&store, "B", 10).await;
    stock(&store, "C", 1).await;

    let err = store
        .bulk_reserve(&[
            StockLine::new("A", 5),
            StockLine::new("B", 5),
            StockLine::new("C", 2),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.product_id(), Some(&ProductId::new("C")));

    for sku in ["A", "B", "C"] {
        let entry = store.get_entry(&ProductId::new(sku)).await.unwrap().unwrap();
        assert_eq!(entry.reserved(), 0, "{sku} must not stay reserved");
        assert_eq!(entry.version(), Version::first());
    }
}

#[tokio::test]
#[serial]
async fn bulk_reserve_and_fulfill() {
    let store = get_test_store().await;
    stock(&store, "A", 10).await;
    stock(&store, "B", 10).await;
    let lines = [StockLine::new("A", 3), StockLine::new("B", 4)];

    store.bulk_reserve(&lines).await.unwrap();
    let fulfilled = store.bulk_fulfill(&lines).await.unwrap();

    assert_eq!(fulfilled[0].quantity(), 7);
    assert_eq!(fulfilled[1].quantity(), 6);
    assert!(fulfilled.iter().all(|e| e.reserved() == 0));
}

#[tokio::test]
#[serial]
async fn update_stock_cannot_drop_below_reserved() {
    let store = get_test_store().await;
    let id = stock(&store, "SKU-001", 10).await;
    store.reserve(&id, 6).await.unwrap();

    let err = store.update_stock(&id, 5).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity { .. }));

    let entry = store.update_stock(&id, 40).await.unwrap();
    assert_eq!(entry.available(), 34);
}

#[tokio::test]
#[serial]
async fn low_stock_scan_is_ordered() {
    let store = get_test_store().await;
    stock(&store, "A", 8).await;
    stock(&store, "B", 2).await;
    stock(&store, "C", 50).await;
    stock(&store, "D", 5).await;

    let low = store.get_low_stock_items(8).await.unwrap();
    let skus: Vec<_> = low.iter().map(|e| e.product_id().as_str()).collect();
    assert_eq!(skus, vec!["B", "D", "A"]);
}

#[tokio::test]
#[serial]
async fn below_min_stock_scan_uses_row_thresholds() {
    let store = get_test_store().await;
    for (sku, qty, min) in [("A", 15, 20), ("B", 10, 0), ("C", 3, 3)] {
        store
            .create_entry(ProductId::new(sku), qty, StockThresholds::new(min, None))
            .await
            .unwrap();
    }

    let below = store.get_items_below_min_stock().await.unwrap();
    let skus: Vec<_> = below.iter().map(|e| e.product_id().as_str()).collect();
    assert_eq!(skus, vec!["C", "A"]);
}

#[tokio::test]
#[serial]
async fn remove_entry() {
    let store = get_test_store().await;
    let id = stock(&store, "SKU-001", 1).await;

    assert!(store.remove_entry(&id).await.unwrap());
    assert!(!store.remove_entry(&id).await.unwrap());
    assert!(store.get_entry(&id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let store = get_test_store().await;
    let id = stock(&store, "HOT", 100).await;

    let attempts = (0..20).map(|_| {
        let store = store.clone();
        let id = id.clone();
        tokio::spawn(async move { store.reserve(&id, 10).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count() as u32;
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            LedgerError::InsufficientStock { .. } | LedgerError::StockConflict { .. }
        ));
    }

    let entry = store.get_entry(&id).await.unwrap().unwrap();
    assert!(succeeded <= 10);
    assert_eq!(entry.reserved(), succeeded * 10);
    assert_eq!(entry.available() + entry.reserved(), 100);
    assert_eq!(entry.version(), Version::new(1 + i64::from(succeeded)));
}

#[tokio::test]
#[serial]
async fn check_constraints_reject_corrupt_rows() {
    let store = get_test_store().await;
    stock(&store, "SKU-001", 10).await;

    let result = sqlx::query("UPDATE stock_ledger SET reserved = 11 WHERE product_id = 'SKU-001'")
        .execute(store.pool())
        .await;
    assert!(result.is_err());
}
