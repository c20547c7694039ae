//! chemsync ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Keeps a relational compound table in sync with remote structure-data
//! publications.
//!
//! Two remote shapes are supported:
//!
//! - **Delta feeds** (PubChem): a full dump followed by daily and weekly
//!   windows, each holding a removal manifest and new or changed records
//! - **Releases** (DrugBank): a "latest version" page pointing at a complete
//!   archive that replaces the store content
//!
//! Every run is one database transaction: it commits the new data together
//! with the new version marker, or rolls back and leaves the store untouched.
//!
//! # Example
//!
//! ```no_run
//! use chemsync_ingest::config::{Config, PUBCHEM};
//! use chemsync_ingest::{db, ingest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::run_migrations(&pool).await?;
//!
//!     let source = ingest::FtpDeltaSource::new(ingest::PubChemFtpConfig::from_env()?)?;
//!     let orchestrator = ingest::SyncOrchestrator::new(
//!         ingest::PgCompoundStore::new(pool),
//!         config.batch_loader(&PUBCHEM),
//!         config.dataset_name(&PUBCHEM),
//!         config.load.strategy,
//!     );
//!     let report = orchestrator.run_delta_sync(&source, None).await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;

pub use error::{IngestError, Result};
