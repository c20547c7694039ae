//! PubChem delta feed over FTP
//!
//! Remote layout, relative to the feed root:
//!
//! ```text
//! Daily/2024-03-02/killed-CIDs
//! Daily/2024-03-02/SDF/Compound_000000001_000500000.sdf.gz
//! Weekly/2024-02-25/...
//! ```
//!
//! Each fetched window is mirrored to `<workdir>/<Kind>/<name>`.

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use super::config::PubChemFtpConfig;
use crate::error::{IngestError, Result};
use crate::ingest::common::FtpClient;
use crate::ingest::delta::{parse_version, DeltaKind, DeltaWindow};
use crate::ingest::source::{DeltaSource, FetchedDelta, RECORD_DIR, REMOVAL_MANIFEST};

pub struct FtpDeltaSource {
    client: FtpClient,
    config: PubChemFtpConfig,
    file_regex: Regex,
}

impl FtpDeltaSource {
    pub fn new(config: PubChemFtpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: FtpClient::new(config.ftp.clone()),
            file_regex: config.file_regex()?,
            config,
        })
    }

    pub fn config(&self) -> &PubChemFtpConfig {
        &self.config
    }
}

/// Window names that are valid version tokens
fn window_names(entries: Vec<String>) -> Vec<String> {
    entries
        .into_iter()
        .filter(|name| match parse_version(name) {
            Ok(_) => true,
            Err(_) => {
                debug!(name = %name, "Ignoring non-window entry");
                false
            },
        })
        .collect()
}

#[async_trait]
impl DeltaSource for FtpDeltaSource {
    async fn list_windows(&self, kind: DeltaKind) -> Result<Vec<String>> {
        let path = self.config.remote_dir(kind.as_str());
        let entries = self
            .client
            .list_directory(&path)
            .await
            .map_err(IngestError::transport)?;

        let names = window_names(entries.into_iter().map(|e| e.name).collect());
        info!(kind = %kind, windows = names.len(), "Listed delta windows");
        Ok(names)
    }

    async fn fetch(&self, window: &DeltaWindow) -> Result<FetchedDelta> {
        let relative = window.relative_dir();
        let remote = self.config.remote_dir(&relative);
        let mut fetched = FetchedDelta::new(window.clone(), self.config.workdir.join(&relative));
        tokio::fs::create_dir_all(fetched.record_dir()).await?;

        info!(window = %window, local = %fetched.dir.display(), "Downloading delta");

        fetched.bytes += self
            .client
            .download_to_file(
                &format!("{}/{}", remote, REMOVAL_MANIFEST),
                &fetched.removal_manifest(),
            )
            .await
            .map_err(IngestError::transport)?;

        let record_remote = format!("{}/{}", remote, RECORD_DIR);
        let mut names = self
            .client
            .list_files(&record_remote)
            .await
            .map_err(IngestError::transport)?;
        names.retain(|name| self.file_regex.is_match(name));
        names.sort();

        for name in names {
            let local = fetched.record_dir().join(&name);
            fetched.bytes += self
                .client
                .download_to_file(&format!("{}/{}", record_remote, name), &local)
                .await
                .map_err(IngestError::transport)?;
            fetched.files += 1;
        }

        info!(
            window = %window,
            files = fetched.files,
            bytes = fetched.bytes,
            "Delta downloaded"
        );
        Ok(fetched)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_window_names_keep_only_dates() {
        let names = window_names(vec![
            "2024-03-02".to_string(),
            "README".to_string(),
            "2024-03-01".to_string(),
            "latest".to_string(),
        ]);
        assert_eq!(names, vec!["2024-03-02", "2024-03-01"]);
    }

    #[test]
    fn test_new_rejects_invalid_pattern() {
        let config = PubChemFtpConfig {
            file_pattern: "[".to_string(),
            ..PubChemFtpConfig::default()
        };
        assert!(FtpDeltaSource::new(config).is_err());
    }

    #[test]
    fn test_fetched_delta_layout() {
        let config = PubChemFtpConfig {
            workdir: "/tmp/pubchem".into(),
            ..PubChemFtpConfig::default()
        };
        let window = DeltaWindow::daily("2024-03-02");
        let fetched = FetchedDelta::new(window.clone(), config.workdir.join(window.relative_dir()));

        assert_eq!(
            fetched.removal_manifest().to_str().unwrap(),
            "/tmp/pubchem/Daily/2024-03-02/killed-CIDs"
        );
        assert_eq!(fetched.record_dir().to_str().unwrap(), "/tmp/pubchem/Daily/2024-03-02/SDF");
    }
}
