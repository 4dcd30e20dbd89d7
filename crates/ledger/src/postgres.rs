use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProductId;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    LedgerError, Result, StockLedgerEntry, StockMutation, StockThresholds, Version,
    store::{LedgerStore, record_outcome},
};

const SELECT_COLUMNS: &str =
    "product_id, quantity, reserved, available, min_stock, max_stock, version, updated_at";

/// PostgreSQL-backed ledger store.
///
/// Each mutation runs in its own transaction: `SELECT` the row, validate, then
/// `UPDATE ... WHERE product_id = $1 AND version = $2`. Zero rows affected
/// means another writer committed first. Bulk operations run every line inside
/// one transaction and roll back on the first failure.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<StockLedgerEntry> {
        let product_id = ProductId::new(row.try_get::<String, _>("product_id")?);
        let min_stock: i64 = row.try_get("min_stock")?;
        let max_stock: Option<i64> = row.try_get("max_stock")?;

        let thresholds = StockThresholds::new(
            u32::try_from(min_stock).unwrap_or(0),
            max_stock.and_then(|m| u32::try_from(m).ok()),
        );

        StockLedgerEntry::from_parts(
            product_id,
            row.try_get("quantity")?,
            row.try_get("reserved")?,
            row.try_get("available")?,
            thresholds,
            Version::new(row.try_get("version")?),
            row.try_get::<DateTime<Utc>, _>("updated_at")?,
        )
    }

    async fn fetch_entry(
        conn: &mut PgConnection,
        product_id: &ProductId,
    ) -> Result<Option<StockLedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM stock_ledger WHERE product_id = $1"
        ))
        .bind(product_id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    /// One versioned read-modify-write on an open connection or transaction.
    async fn apply_on(
        conn: &mut PgConnection,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry> {
        let current = Self::fetch_entry(conn, product_id)
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

        let rows_affected = sqlx::query(
            r#"
            UPDATE stock_ledger
            SET quantity = $1, reserved = $2, available = $3, version = $4, updated_at = $5
            WHERE product_id = $6 AND version = $7
            "#,
        )
        .bind(i64::from(updated.quantity()))
        .bind(i64::from(updated.reserved()))
        .bind(i64::from(updated.available()))
        .bind(updated.version().as_i64())
        .bind(updated.updated_at())
        .bind(product_id.as_str())
        .bind(current.version().as_i64())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(LedgerError::StockConflict {
                product_id: product_id.clone(),
                expected: current.version(),
            });
        }

        Ok(updated)
    }

    async fn apply_single(
        &self,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let updated = Self::apply_on(&mut *tx, product_id, mutation, expected_version).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn apply_all(
        &self,
        mutations: &[(ProductId, StockMutation)],
    ) -> Result<Vec<StockLedgerEntry>> {
        let mut tx = self.pool.begin().await?;
        let mut applied = Vec::with_capacity(mutations.len());

        // Returning early drops `tx`, which rolls back every line applied so far.
        for (product_id, mutation) in mutations {
            applied.push(Self::apply_on(&mut *tx, product_id, *mutation, None).await?);
        }

        tx.commit().await?;
        Ok(applied)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[tracing::instrument(skip(self))]
    async fn create_entry(
        &self,
        product_id: ProductId,
        quantity: u32,
        thresholds: StockThresholds,
    ) -> Result<StockLedgerEntry> {
        let entry = StockLedgerEntry::new(product_id.clone(), quantity, thresholds);

        let rows_affected = sqlx::query(
            r#"
            INSERT INTO stock_ledger
                (product_id, quantity, reserved, available, min_stock, max_stock, version, updated_at)
            VALUES ($1, $2, 0, $3, $4, $5, $6, $7)
            ON CONFLICT (product_id) DO NOTHING
            "#,
        )
        .bind(product_id.as_str())
        .bind(i64::from(entry.quantity()))
        .bind(i64::from(entry.available()))
        .bind(i64::from(thresholds.min_stock))
        .bind(thresholds.max_stock.map(i64::from))
        .bind(entry.version().as_i64())
        .bind(entry.updated_at())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(LedgerError::AlreadyExists(product_id));
        }
        Ok(entry)
    }

    async fn get_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_entry(&mut *conn, product_id).await
    }

    #[tracing::instrument(skip(self), fields(op = mutation.kind()))]
    async fn apply(
        &self,
        product_id: &ProductId,
        mutation: StockMutation,
        expected_version: Option<Version>,
    ) -> Result<StockLedgerEntry> {
        let result = self
            .apply_single(product_id, mutation, expected_version)
            .await;
        record_outcome(mutation.kind(), &result);
        result
    }

    #[tracing::instrument(skip(self, mutations), fields(lines = mutations.len()))]
    async fn apply_bulk(
        &self,
        mutations: Vec<(ProductId, StockMutation)>,
    ) -> Result<Vec<StockLedgerEntry>> {
        let Some((_, first)) = mutations.first() else {
            return Err(LedgerError::EmptyBatch);
        };
        let op = first.kind();

        let result = self.apply_all(&mutations).await;
        record_outcome(op, &result);
        result
    }

    async fn get_low_stock_items(&self, threshold: u32) -> Result<Vec<StockLedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM stock_ledger WHERE available <= $1 \
             ORDER BY available ASC, product_id ASC"
        ))
        .bind(i64::from(threshold))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn get_items_below_min_stock(&self) -> Result<Vec<StockLedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM stock_ledger WHERE available <= min_stock \
             ORDER BY available ASC, product_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn remove_entry(&self, product_id: &ProductId) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM stock_ledger WHERE product_id = $1")
            .bind(product_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }
}
