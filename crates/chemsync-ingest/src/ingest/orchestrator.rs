//! Synchronization runs
//!
//! A run walks through
//!
//! ```text
//! IDLE -> CHECKING_REMOTE_VERSION -> UP_TO_DATE
//!                                 -> RESOLVING_DELTAS -> FETCHING -> LOADING -> COMMITTING -> DONE
//! ```
//!
//! and ends in `FAILED` on any error after `IDLE`. Everything the run writes
//! goes through one store transaction that is committed at the end or rolled
//! back on failure. Downloaded files are kept either way.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::delta::{DeltaKind, DeltaResolver, SyncState};
use super::loader::{BatchLoader, LoadStats};
use super::reconcile::{PassKind, ReconcileStrategy, VersionReconciler};
use super::source::{DeltaSource, FetchedDelta, ReleaseSource};
use super::storage::{CompoundStore, CompoundTransaction, SourceFile, SyncMarker};
use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Idle,
    CheckingRemoteVersion,
    UpToDate,
    ResolvingDeltas,
    Fetching,
    Loading,
    Committing,
    Done,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::CheckingRemoteVersion => "checking_remote_version",
            SyncPhase::UpToDate => "up_to_date",
            SyncPhase::ResolvingDeltas => "resolving_deltas",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Loading => "loading",
            SyncPhase::Committing => "committing",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::UpToDate | SyncPhase::Done | SyncPhase::Failed)
    }

    /// Local directory loads skip the remote phases and go straight to loading
    pub fn can_transition_to(&self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (Idle, CheckingRemoteVersion) | (Idle, Loading) => true,
            (CheckingRemoteVersion, UpToDate) | (CheckingRemoteVersion, ResolvingDeltas) => true,
            (ResolvingDeltas, Fetching) => true,
            (Fetching, Loading) => true,
            (Loading, Committing) => true,
            (Committing, Done) => true,
            (current, Failed) => !matches!(current, Idle | Done | UpToDate | Failed),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    UpToDate,
    Applied,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub dataset: String,
    pub outcome: SyncOutcome,
    pub phases: Vec<SyncPhase>,
    pub previous_version: Option<String>,
    pub final_version: Option<String>,
    pub base_loaded: bool,
    pub deltas_applied: Vec<String>,
    pub files: usize,
    pub upserted: u64,
    pub deleted: u64,
    pub generation: i64,
    pub compounds: i64,
}

/// Full dump loaded when the store has never been synchronized
#[derive(Debug, Clone)]
pub struct BaseSnapshot {
    pub directory: PathBuf,
    pub version: String,
}

struct RunTracker {
    run_id: Uuid,
    phases: Vec<SyncPhase>,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phases: vec![SyncPhase::Idle],
        }
    }

    fn current(&self) -> SyncPhase {
        self.phases.last().copied().unwrap_or(SyncPhase::Idle)
    }

    fn transition(&mut self, next: SyncPhase) {
        let current = self.current();
        if !current.can_transition_to(next) {
            warn!(from = current.as_str(), to = next.as_str(), "Unexpected phase transition");
        }
        info!(from = current.as_str(), to = next.as_str(), "Phase transition");
        self.phases.push(next);
    }

    fn fail(&mut self, err: IngestError) -> IngestError {
        error!(phase = self.current().as_str(), error = %err, "Synchronization failed");
        self.transition(SyncPhase::Failed);
        err
    }
}

/// Work done inside the run transaction
enum LoadPlan<'a> {
    /// Optional base snapshot followed by downloaded deltas, oldest first
    Deltas {
        base: Option<&'a BaseSnapshot>,
        fetched: &'a [FetchedDelta],
    },
    /// Reload of one directory, optionally recording its source files
    Full {
        dir: &'a Path,
        sources: Option<Vec<SourceFile>>,
    },
}

/// What a loading phase wrote
#[derive(Debug, Default)]
struct LoadSummary {
    stats: LoadStats,
    generation: i64,
    base_loaded: bool,
}

pub struct SyncOrchestrator<S: CompoundStore> {
    store: S,
    loader: BatchLoader,
    dataset: String,
    strategy: ReconcileStrategy,
}

impl<S: CompoundStore> SyncOrchestrator<S> {
    pub fn new(
        store: S,
        loader: BatchLoader,
        dataset: impl Into<String>,
        strategy: ReconcileStrategy,
    ) -> Self {
        Self {
            store,
            loader,
            dataset: dataset.into(),
            strategy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Resolve the delta plan without downloading or writing anything
    pub async fn plan_deltas(
        &self,
        source: &dyn DeltaSource,
        base_version: Option<&str>,
    ) -> Result<SyncState> {
        let marker = self.store.read_marker(&self.dataset).await?;
        let daily = source.list_windows(DeltaKind::Daily).await?;
        let weekly = source.list_windows(DeltaKind::Weekly).await?;
        let start = start_version(marker.as_ref(), base_version)?;
        DeltaResolver.resolve(Some(&start), &start, &daily, &weekly)
    }

    /// Follow a daily/weekly delta feed
    ///
    /// A store without a marker first gets `base` loaded in full.
    pub async fn run_delta_sync(
        &self,
        source: &dyn DeltaSource,
        base: Option<&BaseSnapshot>,
    ) -> Result<SyncReport> {
        let mut run = RunTracker::new();
        let span = info_span!("sync_run", run_id = %run.run_id, dataset = %self.dataset, mode = "delta");
        self.delta_sync(&mut run, source, base).instrument(span).await
    }

    /// Replace the store content with the latest published release
    pub async fn run_release_sync(&self, source: &dyn ReleaseSource) -> Result<SyncReport> {
        let mut run = RunTracker::new();
        let span = info_span!("sync_run", run_id = %run.run_id, dataset = %self.dataset, mode = "release");
        self.release_sync(&mut run, source).instrument(span).await
    }

    /// Reload the store from a local directory
    ///
    /// The stored version is replaced by `version` when given and kept otherwise.
    pub async fn run_directory_load(&self, dir: &Path, version: Option<&str>) -> Result<SyncReport> {
        let mut run = RunTracker::new();
        let span = info_span!("sync_run", run_id = %run.run_id, dataset = %self.dataset, mode = "load");
        self.directory_load(&mut run, dir, version).instrument(span).await
    }

    async fn delta_sync(
        &self,
        run: &mut RunTracker,
        source: &dyn DeltaSource,
        base: Option<&BaseSnapshot>,
    ) -> Result<SyncReport> {
        run.transition(SyncPhase::CheckingRemoteVersion);
        let listings = async {
            let marker = self.store.read_marker(&self.dataset).await?;
            let daily = source.list_windows(DeltaKind::Daily).await?;
            let weekly = source.list_windows(DeltaKind::Weekly).await?;
            Ok::<_, IngestError>((marker, daily, weekly))
        }
        .await;
        let (marker, daily, weekly) = listings.map_err(|e| run.fail(e))?;

        let previous_version = marker.as_ref().and_then(|m| m.version.clone());
        if let Some(version) = &previous_version {
            // An empty listing says nothing about the remote version
            if !daily.is_empty() && daily.iter().all(|name| name.as_str() <= version.as_str()) {
                return self.up_to_date(run, previous_version.clone()).await;
            }
        }

        run.transition(SyncPhase::ResolvingDeltas);
        let base = match (&previous_version, base) {
            (None, None) => {
                return Err(run.fail(IngestError::Config(
                    "store has no version marker; BASE_DIRECTORY and BASE_VERSION are required"
                        .to_string(),
                )))
            },
            (None, Some(base)) => Some(base),
            (Some(_), _) => None,
        };
        let base_version = base.map(|b| b.version.as_str()).unwrap_or_default();
        let state = DeltaResolver
            .resolve(previous_version.as_deref(), base_version, &daily, &weekly)
            .map_err(|e| run.fail(e))?;
        info!(
            start = %state.last_applied_marker,
            deltas = state.pending_deltas.len(),
            final_version = %state.resolved_final_marker,
            "Delta plan resolved"
        );

        run.transition(SyncPhase::Fetching);
        let mut fetched = Vec::with_capacity(state.pending_deltas.len());
        for window in &state.pending_deltas {
            fetched.push(source.fetch(window).await.map_err(|e| run.fail(e))?);
        }

        run.transition(SyncPhase::Loading);
        let committed_generation = marker.as_ref().map(|m| m.generation).unwrap_or(0);
        let final_version = state.resolved_final_marker.clone();
        let plan = LoadPlan::Deltas {
            base,
            fetched: &fetched,
        };
        let (summary, compounds) = self
            .transactional(run, plan, Some(final_version.clone()), committed_generation)
            .await?;

        Ok(self.report(
            run,
            SyncOutcome::Applied,
            previous_version,
            Some(final_version),
            summary,
            fetched.iter().map(|f| f.window.to_string()).collect(),
            compounds,
        ))
    }

    async fn release_sync(
        &self,
        run: &mut RunTracker,
        source: &dyn ReleaseSource,
    ) -> Result<SyncReport> {
        run.transition(SyncPhase::CheckingRemoteVersion);
        let checked = async {
            let marker = self.store.read_marker(&self.dataset).await?;
            let latest = source.latest_version().await?;
            Ok::<_, IngestError>((marker, latest))
        }
        .await;
        let (marker, latest) = checked.map_err(|e| run.fail(e))?;

        let previous_version = marker.as_ref().and_then(|m| m.version.clone());
        if previous_version.as_deref() == Some(latest.as_str()) {
            return self.up_to_date(run, previous_version).await;
        }

        run.transition(SyncPhase::ResolvingDeltas);
        info!(
            previous = previous_version.as_deref().unwrap_or("none"),
            latest = %latest,
            "New release available"
        );

        run.transition(SyncPhase::Fetching);
        let release = source.download(&latest).await.map_err(|e| run.fail(e))?;

        run.transition(SyncPhase::Loading);
        let committed_generation = marker.as_ref().map(|m| m.generation).unwrap_or(0);
        let sources = vec![SourceFile {
            name: release.file_name.clone(),
            size: release.size as i64,
        }];
        let plan = LoadPlan::Full {
            dir: &release.dir,
            sources: Some(sources),
        };
        let (summary, compounds) = self
            .transactional(run, plan, Some(latest.clone()), committed_generation)
            .await?;

        Ok(self.report(
            run,
            SyncOutcome::Applied,
            previous_version,
            Some(latest),
            summary,
            Vec::new(),
            compounds,
        ))
    }

    async fn directory_load(
        &self,
        run: &mut RunTracker,
        dir: &Path,
        version: Option<&str>,
    ) -> Result<SyncReport> {
        let marker = self.store.read_marker(&self.dataset).await?;
        let previous_version = marker.as_ref().and_then(|m| m.version.clone());
        let final_version = version.map(str::to_string).or_else(|| previous_version.clone());
        let committed_generation = marker.as_ref().map(|m| m.generation).unwrap_or(0);

        run.transition(SyncPhase::Loading);
        let plan = LoadPlan::Full { dir, sources: None };
        let (summary, compounds) = self
            .transactional(run, plan, final_version.clone(), committed_generation)
            .await?;

        Ok(self.report(
            run,
            SyncOutcome::Applied,
            previous_version,
            final_version,
            summary,
            Vec::new(),
            compounds,
        ))
    }

    async fn up_to_date(
        &self,
        run: &mut RunTracker,
        version: Option<String>,
    ) -> Result<SyncReport> {
        self.store
            .touch_checked(&self.dataset)
            .await
            .map_err(|e| run.fail(e))?;
        run.transition(SyncPhase::UpToDate);
        info!(version = version.as_deref().unwrap_or("none"), "Store is up to date");

        Ok(self.report(
            run,
            SyncOutcome::UpToDate,
            version.clone(),
            version,
            LoadSummary::default(),
            Vec::new(),
            0,
        ))
    }

    /// Execute `plan` inside the run transaction, then write the marker and commit
    ///
    /// Any failure rolls the transaction back before it is returned.
    async fn transactional(
        &self,
        run: &mut RunTracker,
        plan: LoadPlan<'_>,
        final_version: Option<String>,
        committed_generation: i64,
    ) -> Result<(LoadSummary, i64)> {
        let mut tx = self.store.begin().await.map_err(|e| run.fail(e))?;

        let written = match self.execute(&mut tx, plan, committed_generation).await {
            Ok(summary) => {
                run.transition(SyncPhase::Committing);
                self.write_marker(&mut tx, final_version, summary.generation)
                    .await
                    .map(|compounds| (summary, compounds))
            },
            Err(e) => Err(e),
        };

        match written {
            Ok(result) => {
                tx.commit().await.map_err(|e| run.fail(e))?;
                run.transition(SyncPhase::Done);
                Ok(result)
            },
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(run.fail(e))
            },
        }
    }

    async fn execute(
        &self,
        tx: &mut S::Tx,
        plan: LoadPlan<'_>,
        committed_generation: i64,
    ) -> Result<LoadSummary> {
        match plan {
            LoadPlan::Deltas { base, fetched } => {
                self.load_deltas(tx, base, fetched, committed_generation).await
            },
            LoadPlan::Full { dir, sources } => {
                let summary = self.load_full(tx, dir, committed_generation).await?;
                if let Some(sources) = sources {
                    tx.replace_sources(&self.dataset, &sources).await?;
                }
                Ok(summary)
            },
        }
    }

    async fn write_marker(
        &self,
        tx: &mut S::Tx,
        version: Option<String>,
        generation: i64,
    ) -> Result<i64> {
        let size = tx.count().await?;
        tx.write_marker(&SyncMarker {
            dataset: self.dataset.clone(),
            version,
            generation,
            size,
            checked_at: Utc::now(),
        })
        .await?;
        Ok(size)
    }

    async fn load_full(
        &self,
        tx: &mut S::Tx,
        dir: &Path,
        committed_generation: i64,
    ) -> Result<LoadSummary> {
        let mut reconciler = VersionReconciler::begin(
            tx,
            self.strategy,
            PassKind::Full,
            committed_generation,
            self.loader.delete_batch_size(),
        )
        .await?;
        let mut stats = self.loader.load_directory(tx, dir, &mut reconciler).await?;
        let outcome = reconciler.finish(tx).await?;
        stats.deleted += outcome.deleted;

        Ok(LoadSummary {
            stats,
            generation: outcome.generation,
            base_loaded: false,
        })
    }

    async fn load_deltas(
        &self,
        tx: &mut S::Tx,
        base: Option<&BaseSnapshot>,
        fetched: &[FetchedDelta],
        committed_generation: i64,
    ) -> Result<LoadSummary> {
        let mut summary = LoadSummary {
            generation: committed_generation,
            ..LoadSummary::default()
        };

        if let Some(base) = base {
            info!(dir = %base.directory.display(), version = %base.version, "Loading base snapshot");
            let loaded = self.load_full(tx, &base.directory, committed_generation).await?;
            summary.stats.merge(loaded.stats);
            summary.generation = loaded.generation;
            summary.base_loaded = true;
        }

        let mut reconciler = VersionReconciler::begin(
            tx,
            self.strategy,
            PassKind::Incremental,
            summary.generation,
            self.loader.delete_batch_size(),
        )
        .await?;

        for delta in fetched {
            info!(window = %delta.window, dir = %delta.dir.display(), "Applying delta");
            summary.stats.deleted += self
                .loader
                .apply_removals(tx, &delta.removal_manifest())
                .await?;
            let stats = self
                .loader
                .load_directory(tx, &delta.record_dir(), &mut reconciler)
                .await?;
            summary.stats.merge(stats);
        }

        let outcome = reconciler.finish(tx).await?;
        summary.generation = outcome.generation;
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        run: &RunTracker,
        outcome: SyncOutcome,
        previous_version: Option<String>,
        final_version: Option<String>,
        summary: LoadSummary,
        deltas_applied: Vec<String>,
        compounds: i64,
    ) -> SyncReport {
        SyncReport {
            run_id: run.run_id,
            dataset: self.dataset.clone(),
            outcome,
            phases: run.phases.clone(),
            previous_version,
            final_version,
            base_loaded: summary.base_loaded,
            deltas_applied,
            files: summary.stats.files,
            upserted: summary.stats.records,
            deleted: summary.stats.deleted,
            generation: summary.generation,
            compounds,
        }
    }
}

fn start_version(marker: Option<&SyncMarker>, base_version: Option<&str>) -> Result<String> {
    marker
        .and_then(|m| m.version.clone())
        .or_else(|| base_version.map(str::to_string))
        .ok_or_else(|| {
            IngestError::Config(
                "store has no version marker and no base version is configured".to_string(),
            )
        })
}
