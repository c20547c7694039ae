//! Error taxonomy for synchronization runs

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while parsing, loading or synchronizing compound data
///
/// Everything except [`IngestError::UnsupportedContainer`] aborts the run and
/// rolls back its transaction.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A record block is truncated or carries an unparsable identifier
    #[error("Malformed record in {source_name} at line {line}: {reason}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        reason: String,
    },

    /// A record has no identifier tag in its metadata block
    #[error("Record #{record} in {source_name} has no identifier tag")]
    MissingIdentifier { source_name: String, record: usize },

    /// File suffix is not one of `.sdf`, `.sdf.gz`, `.zip`
    #[error("Unsupported container: {}", .0.display())]
    UnsupportedContainer(PathBuf),

    /// Remote listings cannot produce a gap-free delta sequence
    #[error("Inconsistent server data: {0}")]
    InconsistentServerData(String),

    /// Local version predates every delta still published remotely
    #[error("Stale database: local version {local} predates first recoverable window {first_uncovered}")]
    StaleDatabase {
        local: String,
        first_uncovered: String,
    },

    /// FTP or HTTP failure, surfaced as-is
    #[error("Transport error: {0:#}")]
    Transport(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid version token: {0}")]
    InvalidVersion(String),

    #[error("Enrichment failed for compound {id}: {reason}")]
    Enrichment { id: i32, reason: String },

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn malformed(source_name: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            source_name: source_name.to_string(),
            line,
            reason: reason.into(),
        }
    }

    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }

    /// Whether the error must abort the current run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IngestError::UnsupportedContainer(_))
    }
}

impl From<chemsync_common::ChemsyncError> for IngestError {
    fn from(err: chemsync_common::ChemsyncError) -> Self {
        match err {
            chemsync_common::ChemsyncError::Io(e) => IngestError::Io(e),
            chemsync_common::ChemsyncError::InvalidVersion(v) => IngestError::InvalidVersion(v),
            other => IngestError::Config(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for IngestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        IngestError::Database(sqlx::Error::Migrate(Box::new(err)))
    }
}
