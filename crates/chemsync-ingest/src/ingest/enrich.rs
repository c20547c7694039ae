//! Per-record enrichment stage
//!
//! Enrichment (canonicalization, fingerprints, ...) is supplied by the caller
//! through [`RecordEnricher`]. A batch is split into one contiguous chunk per
//! worker; each worker gets its own [`EnrichContext`] and the chunks are
//! joined back in their original order, so the flushed batch is identical
//! whatever the worker count.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

use super::sdf::CompoundRecord;
use crate::error::{IngestError, Result};

/// Factory for worker-confined enrichment state
pub trait RecordEnricher: Send + Sync {
    fn name(&self) -> &str;

    fn new_context(&self) -> Box<dyn EnrichContext>;
}

/// Mutable scratch state owned by a single worker
pub trait EnrichContext: Send {
    fn enrich(&mut self, record: &mut CompoundRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct EnrichmentStage {
    enricher: Arc<dyn RecordEnricher>,
    workers: usize,
}

impl EnrichmentStage {
    pub fn new(enricher: Arc<dyn RecordEnricher>, workers: usize) -> Self {
        Self {
            enricher,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn enrich_batch(&self, batch: Vec<CompoundRecord>) -> Result<Vec<CompoundRecord>> {
        if batch.is_empty() {
            return Ok(batch);
        }

        let chunk_size = batch.len().div_ceil(self.workers);
        let mut chunks = Vec::with_capacity(self.workers);
        let mut rest = batch;
        while rest.len() > chunk_size {
            let tail = rest.split_off(chunk_size);
            chunks.push(rest);
            rest = tail;
        }
        chunks.push(rest);

        debug!(
            enricher = self.enricher.name(),
            chunks = chunks.len(),
            "Enriching batch"
        );

        let handles = chunks.into_iter().map(|mut chunk| {
            let enricher = Arc::clone(&self.enricher);
            tokio::task::spawn_blocking(move || -> Result<Vec<CompoundRecord>> {
                let mut context = enricher.new_context();
                for record in chunk.iter_mut() {
                    context.enrich(record)?;
                }
                Ok(chunk)
            })
        });

        let mut enriched = Vec::new();
        for chunk in try_join_all(handles).await.map_err(IngestError::from)? {
            enriched.extend(chunk?);
        }
        Ok(enriched)
    }
}
