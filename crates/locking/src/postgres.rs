use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{LeaseStore, Result};

/// PostgreSQL-backed lease store over the `inventory_locks` table.
///
/// Expiry is judged by the database clock so processes with skewed clocks
/// still agree on who holds a lease.
#[derive(Clone)]
pub struct PostgresLeaseStore {
    pool: PgPool,
}

impl PostgresLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes every expired lease. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM inventory_locks WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }
}

#[async_trait]
impl LeaseStore for PostgresLeaseStore {
    async fn try_acquire(&self, key: &str, owner: Uuid, ttl: Duration) -> Result<bool> {
        // The upsert only overwrites a row whose lease already expired.
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO inventory_locks (lock_key, owner_token, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (lock_key) DO UPDATE
            SET owner_token = EXCLUDED.owner_token,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE inventory_locks.expires_at < NOW()
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn extend(&self, key: &str, owner: Uuid, ttl: Duration) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE inventory_locks
            SET expires_at = NOW() + make_interval(secs => $3)
            WHERE lock_key = $1 AND owner_token = $2 AND expires_at >= NOW()
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn release(&self, key: &str, owner: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM inventory_locks WHERE lock_key = $1 AND owner_token = $2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
