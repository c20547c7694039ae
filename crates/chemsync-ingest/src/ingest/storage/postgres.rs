//! PostgreSQL compound store

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

use super::{CompoundStore, CompoundTransaction, SourceFile, SyncMarker};
use crate::error::Result;
use crate::ingest::sdf::CompoundRecord;

/// Key of the transaction-scoped advisory lock serializing runs
pub const SYNC_LOCK_KEY: i64 = 0x6368_656d_7379_6e63;

/// Postgres caps a statement at 65535 bind parameters
const MAX_ROWS_PER_STATEMENT: usize = 65535 / 3;

#[derive(Debug, Clone)]
pub struct PgCompoundStore {
    pool: PgPool,
}

impl PgCompoundStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CompoundStore for PgCompoundStore {
    type Tx = PgCompoundTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;
        // Blocks until any concurrent run against this database has finished
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SYNC_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        Ok(PgCompoundTransaction { tx })
    }

    async fn read_marker(&self, dataset: &str) -> Result<Option<SyncMarker>> {
        let marker = sqlx::query_as::<_, SyncMarker>(
            r#"
            SELECT dataset, version, generation, size, checked_at
            FROM sync_markers
            WHERE dataset = $1
            "#,
        )
        .bind(dataset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(marker)
    }

    async fn touch_checked(&self, dataset: &str) -> Result<()> {
        sqlx::query("UPDATE sync_markers SET checked_at = NOW() WHERE dataset = $1")
            .bind(dataset)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgCompoundTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CompoundTransaction for PgCompoundTransaction {
    async fn upsert_batch(
        &mut self,
        records: &[CompoundRecord],
        version: Option<i64>,
    ) -> Result<u64> {
        let mut affected = 0;
        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut query_builder = match version {
                Some(_) => QueryBuilder::<Postgres>::new("INSERT INTO compounds (id, molfile, version) "),
                None => QueryBuilder::<Postgres>::new("INSERT INTO compounds (id, molfile) "),
            };

            query_builder.push_values(chunk.iter(), |mut b, record| {
                b.push_bind(record.id).push_bind(&record.molfile);
                if let Some(version) = version {
                    b.push_bind(version);
                }
            });

            match version {
                Some(_) => query_builder.push(
                    " ON CONFLICT (id) DO UPDATE SET molfile = EXCLUDED.molfile, version = EXCLUDED.version",
                ),
                None => query_builder.push(" ON CONFLICT (id) DO UPDATE SET molfile = EXCLUDED.molfile"),
            };

            let result = query_builder.build().execute(&mut *self.tx).await?;
            affected += result.rows_affected();
        }

        debug!(rows = affected, "Upserted compound batch");
        Ok(affected)
    }

    async fn delete_ids(&mut self, ids: &[i32]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM compounds WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn all_ids(&mut self) -> Result<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>("SELECT id FROM compounds")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids)
    }

    async fn max_version(&mut self) -> Result<i64> {
        let version = sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM compounds")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(version)
    }

    async fn delete_older_than(&mut self, version: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM compounds WHERE version < $1")
            .bind(version)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&mut self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM compounds")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn write_marker(&mut self, marker: &SyncMarker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_markers (dataset, version, generation, size, checked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (dataset) DO UPDATE SET
                version = EXCLUDED.version,
                generation = EXCLUDED.generation,
                size = EXCLUDED.size,
                checked_at = EXCLUDED.checked_at
            "#,
        )
        .bind(&marker.dataset)
        .bind(&marker.version)
        .bind(marker.generation)
        .bind(marker.size)
        .bind(marker.checked_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn replace_sources(&mut self, dataset: &str, sources: &[SourceFile]) -> Result<()> {
        sqlx::query("DELETE FROM compound_sources WHERE dataset = $1")
            .bind(dataset)
            .execute(&mut *self.tx)
            .await?;

        if sources.is_empty() {
            return Ok(());
        }

        let mut query_builder =
            QueryBuilder::<Postgres>::new("INSERT INTO compound_sources (dataset, name, size) ");
        query_builder.push_values(sources.iter(), |mut b, source| {
            b.push_bind(dataset).push_bind(&source.name).push_bind(source.size);
        });
        query_builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
