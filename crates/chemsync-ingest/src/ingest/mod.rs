//! Compound synchronization
//!
//! # Architecture
//!
//! - **sdf**: structure-data record parsing
//! - **common**: compressed containers and the FTP client
//! - **loader**: batched upserts inside the run transaction
//! - **reconcile**: removal of records a full reload no longer contains
//! - **delta**: delta window planning for daily/weekly feeds
//! - **enrich**: optional per-record enrichment with worker-local state
//! - **storage**: store traits and the PostgreSQL implementation
//! - **pubchem** / **drugbank**: remote sources
//! - **orchestrator**: the synchronization run state machine

pub mod common;
pub mod delta;
pub mod drugbank;
pub mod enrich;
pub mod loader;
pub mod orchestrator;
pub mod pubchem;
pub mod reconcile;
pub mod sdf;
pub mod source;
pub mod storage;

pub use delta::{DeltaKind, DeltaResolver, DeltaWindow, SyncState};
pub use drugbank::{DrugBankHttpConfig, HttpReleaseSource};
pub use loader::{BatchLoader, LoadStats};
pub use orchestrator::{BaseSnapshot, SyncOrchestrator, SyncOutcome, SyncPhase, SyncReport};
pub use pubchem::{FtpDeltaSource, PubChemFtpConfig};
pub use reconcile::{PassKind, ReconcileStrategy, VersionReconciler};
pub use source::{DeltaSource, ReleaseSource};
pub use storage::{CompoundStore, CompoundTransaction, PgCompoundStore};
