//! PostgreSQL lease store integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p locking --test postgres_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::CancellationToken;
use locking::{LeaseStore, LockConfig, LockCoordinator, LockError, PostgresLeaseStore};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

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
                "../../../migrations/002_create_inventory_locks.sql"
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

async fn get_test_store() -> PostgresLeaseStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE inventory_locks")
        .execute(&pool)
        .await
        .unwrap();

    PostgresLeaseStore::new(pool)
}

const TTL: Duration = Duration::from_secs(30);

#[tokio::test]
#[serial]
async fn only_one_owner_at_a_time() {
    let store = get_test_store().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    assert!(store.try_acquire("inventory:A", a, TTL).await.unwrap());
    assert!(!store.try_acquire("inventory:A", b, TTL).await.unwrap());
    assert!(store.try_acquire("inventory:B", b, TTL).await.unwrap());
}

#[tokio::test]
#[serial]
async fn release_and_extend_are_owner_scoped() {
    let store = get_test_store().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    store.try_acquire("k", a, TTL).await.unwrap();

    assert!(!store.extend("k", b, TTL).await.unwrap());
    assert!(store.extend("k", a, TTL).await.unwrap());

    store.release("k", b).await.unwrap();
    assert!(!store.try_acquire("k", b, TTL).await.unwrap());

    store.release("k", a).await.unwrap();
    store.release("k", a).await.unwrap();
    assert!(store.try_acquire("k", b, TTL).await.unwrap());
}

#[tokio::test]
#[serial]
async fn expired_lease_is_taken_over() {
    let store = get_test_store().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    store
        .try_acquire("k", a, Duration::from_millis(50))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(!store.extend("k", a, TTL).await.unwrap());
    assert!(store.try_acquire("k", b, TTL).await.unwrap());
}

#[tokio::test]
#[serial]
async fn purge_removes_only_expired_leases() {
    let store = get_test_store().await;
    store
        .try_acquire("short", Uuid::new_v4(), Duration::from_millis(20))
        .await
        .unwrap();
    store.try_acquire("long", Uuid::new_v4(), TTL).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn coordinator_times_out_against_postgres_holder() {
    let store = get_test_store().await;
    store.try_acquire("k", Uuid::new_v4(), TTL).await.unwrap();

    let locks = LockCoordinator::new(
        Arc::new(store),
        LockConfig {
            ttl: TTL,
            acquire_timeout: Duration::from_millis(100),
            retry_interval: Duration::from_millis(20),
        },
    );
    let result = locks
        .with_lock("k", &CancellationToken::new(), || async {
            Ok::<_, LockError>(())
        })
        .await;

    assert!(matches!(result, Err(LockError::Timeout { .. })));
}
