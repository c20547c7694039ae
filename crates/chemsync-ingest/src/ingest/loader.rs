//! Batched loading of parsed records into the compound store
//!
//! Parsing runs on a blocking thread and hands full batches to the async side
//! through a channel with room for a single batch. While one batch is being
//! flushed, at most one more waits in the channel and a third is being filled,
//! so memory stays bounded by three batches whatever the file size.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::common::ContainerReader;
use super::enrich::{EnrichmentStage, RecordEnricher};
use super::reconcile::VersionReconciler;
use super::sdf::{CompoundRecord, ParserOptions};
use super::storage::CompoundTransaction;
use crate::error::{IngestError, Result};

/// Default number of records per upsert batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of identifiers per delete statement
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 10000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LoadStats {
    pub files: usize,
    pub records: u64,
    pub batches: u64,
    pub deleted: u64,
}

impl LoadStats {
    pub fn merge(&mut self, other: LoadStats) {
        self.files += other.files;
        self.records += other.records;
        self.batches += other.batches;
        self.deleted += other.deleted;
    }
}

#[derive(Clone)]
pub struct BatchLoader {
    parser: ParserOptions,
    containers: ContainerReader,
    batch_size: usize,
    delete_batch_size: usize,
    enrichment: Option<EnrichmentStage>,
}

impl BatchLoader {
    pub fn new(parser: ParserOptions, containers: ContainerReader) -> Self {
        Self {
            parser,
            containers,
            batch_size: DEFAULT_BATCH_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            enrichment: None,
        }
    }

    pub fn with_batch_sizes(mut self, batch_size: usize, delete_batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.delete_batch_size = delete_batch_size.max(1);
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn RecordEnricher>, workers: usize) -> Self {
        self.enrichment = Some(EnrichmentStage::new(enricher, workers));
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn delete_batch_size(&self) -> usize {
        self.delete_batch_size
    }

    pub fn containers(&self) -> &ContainerReader {
        &self.containers
    }

    /// Load every supported file of `dir` in file-name order
    pub async fn load_directory<T: CompoundTransaction>(
        &self,
        tx: &mut T,
        dir: &Path,
        reconciler: &mut VersionReconciler,
    ) -> Result<LoadStats> {
        let files = self.containers.list_directory(dir)?;
        if files.is_empty() {
            warn!(dir = %dir.display(), "No record files found");
        }
        self.load_files(tx, files, reconciler).await
    }

    /// Upsert every record of `files`, in order
    pub async fn load_files<T: CompoundTransaction>(
        &self,
        tx: &mut T,
        files: Vec<PathBuf>,
        reconciler: &mut VersionReconciler,
    ) -> Result<LoadStats> {
        let (sender, mut receiver) = mpsc::channel::<Vec<CompoundRecord>>(1);
        let producer = {
            let parser = self.parser.clone();
            let containers = self.containers.clone();
            let batch_size = self.batch_size;
            tokio::task::spawn_blocking(move || {
                produce_batches(&parser, &containers, &files, batch_size, &sender)
            })
        };

        let mut stats = LoadStats::default();
        let mut consumed = Ok(());
        while let Some(batch) = receiver.recv().await {
            match self.flush(tx, batch, reconciler).await {
                Ok(count) => {
                    stats.records += count as u64;
                    stats.batches += 1;
                },
                Err(e) => {
                    consumed = Err(e);
                    break;
                },
            }
        }
        drop(receiver);

        let produced = producer.await?;
        consumed?;
        stats.files = produced?;

        info!(
            files = stats.files,
            records = stats.records,
            batches = stats.batches,
            "Loaded record files"
        );
        Ok(stats)
    }

    async fn flush<T: CompoundTransaction>(
        &self,
        tx: &mut T,
        batch: Vec<CompoundRecord>,
        reconciler: &mut VersionReconciler,
    ) -> Result<usize> {
        let batch = match &self.enrichment {
            Some(stage) => stage.enrich_batch(batch).await?,
            None => batch,
        };
        let batch = last_write_wins(batch);

        tx.upsert_batch(&batch, reconciler.stamp()).await?;
        reconciler.observe(batch.iter().map(|record| record.id));
        debug!(records = batch.len(), "Flushed batch");
        Ok(batch.len())
    }

    /// Delete every identifier listed in a removal manifest
    ///
    /// The manifest holds one integer per line; blank lines are ignored.
    pub async fn apply_removals<T: CompoundTransaction>(
        &self,
        tx: &mut T,
        manifest: &Path,
    ) -> Result<u64> {
        let ids = read_removal_manifest(manifest)?;
        let mut deleted = 0;
        for chunk in ids.chunks(self.delete_batch_size) {
            deleted += tx.delete_ids(chunk).await?;
        }

        info!(
            manifest = %manifest.display(),
            listed = ids.len(),
            deleted,
            "Applied removal manifest"
        );
        Ok(deleted)
    }
}

/// Parse `files` into batches, returns the number of files read
fn produce_batches(
    parser: &ParserOptions,
    containers: &ContainerReader,
    files: &[PathBuf],
    batch_size: usize,
    sender: &mpsc::Sender<Vec<CompoundRecord>>,
) -> Result<usize> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut files_read = 0;

    for path in files {
        let mut open = true;
        containers.for_each_stream(path, |name, reader| {
            for record in parser.records(reader, name) {
                batch.push(record?.into_compound(name)?);
                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if sender.blocking_send(full).is_err() {
                        open = false;
                        return Ok(());
                    }
                }
            }
            Ok(())
        })?;

        if !open {
            // Consumer stopped, its error is reported instead
            return Ok(files_read);
        }
        files_read += 1;
        debug!(path = %path.display(), "Parsed record file");
    }

    if !batch.is_empty() {
        let _ = sender.blocking_send(batch);
    }
    Ok(files_read)
}

/// Keep the last record per id, at the position of its first occurrence
fn last_write_wins(batch: Vec<CompoundRecord>) -> Vec<CompoundRecord> {
    let mut positions: HashMap<i32, usize> = HashMap::with_capacity(batch.len());
    let mut unique: Vec<CompoundRecord> = Vec::with_capacity(batch.len());
    for record in batch {
        match positions.get(&record.id) {
            Some(&index) => unique[index] = record,
            None => {
                positions.insert(record.id, unique.len());
                unique.push(record);
            },
        }
    }
    unique
}

fn read_removal_manifest(path: &Path) -> Result<Vec<i32>> {
    let source_name = path.display().to_string();
    let content = std::fs::read(path)?;
    let text: String = content.iter().map(|&b| char::from(b)).collect();

    let mut ids = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let id = line.parse::<i32>().map_err(|_| {
            IngestError::malformed(&source_name, index + 1, format!("invalid identifier {:?}", line))
        })?;
        ids.push(id);
    }
    Ok(ids)
}
