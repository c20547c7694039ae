//! Remote data sources driven by the orchestrator

use async_trait::async_trait;
use std::path::PathBuf;

use super::delta::{DeltaKind, DeltaWindow};
use crate::error::Result;

/// Name of the removal manifest inside a delta directory
pub const REMOVAL_MANIFEST: &str = "killed-CIDs";

/// Name of the record directory inside a delta directory
pub const RECORD_DIR: &str = "SDF";

/// A delta window materialized on local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDelta {
    pub window: DeltaWindow,
    /// `<workdir>/<Kind>/<name>`
    pub dir: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

impl FetchedDelta {
    pub fn new(window: DeltaWindow, dir: PathBuf) -> Self {
        Self {
            window,
            dir,
            files: 0,
            bytes: 0,
        }
    }

    pub fn removal_manifest(&self) -> PathBuf {
        self.dir.join(REMOVAL_MANIFEST)
    }

    pub fn record_dir(&self) -> PathBuf {
        self.dir.join(RECORD_DIR)
    }
}

/// A feed publishing daily and weekly delta windows
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Window names of one kind, in any order
    async fn list_windows(&self, kind: DeltaKind) -> Result<Vec<String>>;

    /// Download one window into the local work directory
    async fn fetch(&self, window: &DeltaWindow) -> Result<FetchedDelta>;
}

/// A downloaded release archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedRelease {
    pub version: String,
    /// Directory holding only this release
    pub dir: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// A source publishing complete releases under a version tag
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest_version(&self) -> Result<String>;

    async fn download(&self, version: &str) -> Result<DownloadedRelease>;
}
