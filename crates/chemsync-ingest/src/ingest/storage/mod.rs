//! Compound store interface
//!
//! A synchronization run owns exactly one [`CompoundTransaction`] from start
//! to finish. Every write of the run goes through it and the run ends with a
//! single `commit` or `rollback`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::sdf::CompoundRecord;
use crate::error::Result;

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::{PgCompoundStore, PgCompoundTransaction};

/// Persisted synchronization state of one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SyncMarker {
    pub dataset: String,
    /// Last applied remote version token
    pub version: Option<String>,
    /// Highest committed version stamp
    pub generation: i64,
    /// Compound count after the last successful run
    pub size: i64,
    pub checked_at: DateTime<Utc>,
}

impl SyncMarker {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            version: None,
            generation: 0,
            size: 0,
            checked_at: Utc::now(),
        }
    }
}

/// A downloaded file recorded against a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SourceFile {
    pub name: String,
    pub size: i64,
}

#[async_trait]
pub trait CompoundStore: Send + Sync {
    type Tx: CompoundTransaction;

    /// Open the run transaction
    async fn begin(&self) -> Result<Self::Tx>;

    async fn read_marker(&self, dataset: &str) -> Result<Option<SyncMarker>>;

    /// Refresh the last-checked timestamp without touching compound data
    async fn touch_checked(&self, dataset: &str) -> Result<()>;
}

#[async_trait]
pub trait CompoundTransaction: Send {
    /// Insert or overwrite every record; ids within `records` are unique
    ///
    /// `version` is written to every row when given.
    async fn upsert_batch(&mut self, records: &[CompoundRecord], version: Option<i64>)
        -> Result<u64>;

    async fn delete_ids(&mut self, ids: &[i32]) -> Result<u64>;

    async fn all_ids(&mut self) -> Result<Vec<i32>>;

    /// Highest stored version stamp, 0 for an empty store
    async fn max_version(&mut self) -> Result<i64>;

    async fn delete_older_than(&mut self, version: i64) -> Result<u64>;

    async fn count(&mut self) -> Result<i64>;

    async fn write_marker(&mut self, marker: &SyncMarker) -> Result<()>;

    async fn replace_sources(&mut self, dataset: &str, sources: &[SourceFile]) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
