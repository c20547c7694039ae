//! In-memory compound store for unit tests
//!
//! A transaction works on a private copy of the state and publishes it on
//! commit, so rollback leaves the store untouched.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::{CompoundStore, CompoundTransaction, SourceFile, SyncMarker};
use crate::error::Result;
use crate::ingest::sdf::CompoundRecord;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    /// id -> (molfile, version)
    pub compounds: BTreeMap<i32, (String, i64)>,
    pub markers: HashMap<String, SyncMarker>,
    pub sources: HashMap<String, Vec<SourceFile>>,
    /// Batch sizes seen by `upsert_batch`, in call order
    pub upsert_calls: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    commits: Arc<Mutex<usize>>,
    rollbacks: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compounds(records: &[(i32, &str, i64)]) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for (id, molfile, version) in records {
                state.compounds.insert(*id, (molfile.to_string(), *version));
            }
        }
        store
    }

    pub fn set_marker(&self, marker: SyncMarker) {
        self.state
            .lock()
            .unwrap()
            .markers
            .insert(marker.dataset.clone(), marker);
    }

    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.state.lock().unwrap().compounds.keys().copied().collect()
    }

    pub fn molfile(&self, id: i32) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .compounds
            .get(&id)
            .map(|(molfile, _)| molfile.clone())
    }

    pub fn marker(&self, dataset: &str) -> Option<SyncMarker> {
        self.state.lock().unwrap().markers.get(dataset).cloned()
    }

    pub fn commits(&self) -> usize {
        *self.commits.lock().unwrap()
    }

    pub fn rollbacks(&self) -> usize {
        *self.rollbacks.lock().unwrap()
    }
}

#[async_trait]
impl CompoundStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(MemoryTransaction {
            working: self.snapshot(),
            store: self.clone(),
        })
    }

    async fn read_marker(&self, dataset: &str) -> Result<Option<SyncMarker>> {
        Ok(self.marker(dataset))
    }

    async fn touch_checked(&self, dataset: &str) -> Result<()> {
        if let Some(marker) = self.state.lock().unwrap().markers.get_mut(dataset) {
            marker.checked_at = Utc::now();
        }
        Ok(())
    }
}

pub struct MemoryTransaction {
    working: MemoryState,
    store: MemoryStore,
}

#[async_trait]
impl CompoundTransaction for MemoryTransaction {
    async fn upsert_batch(
        &mut self,
        records: &[CompoundRecord],
        version: Option<i64>,
    ) -> Result<u64> {
        self.working.upsert_calls.push(records.len());
        for record in records {
            let entry = self
                .working
                .compounds
                .entry(record.id)
                .or_insert_with(|| (String::new(), 0));
            entry.0 = record.molfile.clone();
            if let Some(version) = version {
                entry.1 = version;
            }
        }
        Ok(records.len() as u64)
    }

    async fn delete_ids(&mut self, ids: &[i32]) -> Result<u64> {
        let removed = ids
            .iter()
            .filter(|id| self.working.compounds.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn all_ids(&mut self) -> Result<Vec<i32>> {
        Ok(self.working.compounds.keys().copied().collect())
    }

    async fn max_version(&mut self) -> Result<i64> {
        Ok(self
            .working
            .compounds
            .values()
            .map(|(_, version)| *version)
            .max()
            .unwrap_or(0))
    }

    async fn delete_older_than(&mut self, version: i64) -> Result<u64> {
        let before = self.working.compounds.len();
        self.working.compounds.retain(|_, (_, v)| *v >= version);
        Ok((before - self.working.compounds.len()) as u64)
    }

    async fn count(&mut self) -> Result<i64> {
        Ok(self.working.compounds.len() as i64)
    }

    async fn write_marker(&mut self, marker: &SyncMarker) -> Result<()> {
        self.working
            .markers
            .insert(marker.dataset.clone(), marker.clone());
        Ok(())
    }

    async fn replace_sources(&mut self, dataset: &str, sources: &[SourceFile]) -> Result<()> {
        self.working
            .sources
            .insert(dataset.to_string(), sources.to_vec());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        *self.store.state.lock().unwrap() = self.working;
        *self.store.commits.lock().unwrap() += 1;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        *self.store.rollbacks.lock().unwrap() += 1;
        Ok(())
    }
}
