//! DrugBank release configuration

use chemsync_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{IngestError, Result};

pub const DEFAULT_SERVER: &str = "https://go.drugbank.com";
pub const DEFAULT_FILE_NAME: &str = "structures.zip";
pub const DEFAULT_WORKDIR: &str = "./data/drugbank";
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugBankHttpConfig {
    /// Base URL of the release site
    pub server: String,

    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Each release is downloaded into a fresh timestamped directory below this one
    pub workdir: PathBuf,

    /// Local name of the downloaded archive
    pub file_name: String,

    pub timeout_secs: u64,
}

impl Default for DrugBankHttpConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            username: None,
            password: None,
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            file_name: DEFAULT_FILE_NAME.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DrugBankHttpConfig {
    /// Load from `HTTP_SERVER`, `HTTP_USERNAME`, `HTTP_PASSWORD`,
    /// `SDF_DIRECTORY` and `SDF_FILE`
    pub fn from_env() -> Result<Self> {
        let default = Self::default();
        let config = Self {
            server: env::optional("HTTP_SERVER").unwrap_or(default.server),
            username: env::optional("HTTP_USERNAME"),
            password: env::optional("HTTP_PASSWORD"),
            workdir: env::optional("SDF_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(default.workdir),
            file_name: env::optional("SDF_FILE").unwrap_or(default.file_name),
            timeout_secs: env::parse_or("HTTP_TIMEOUT_SECS", default.timeout_secs)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(IngestError::Config("HTTP server cannot be empty".to_string()));
        }
        if self.file_name.is_empty() || self.file_name.contains('/') {
            return Err(IngestError::Config(format!(
                "SDF_FILE must be a plain file name, got '{}'",
                self.file_name
            )));
        }
        if self.timeout_secs == 0 {
            return Err(IngestError::Config("Timeout must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn latest_url(&self) -> String {
        format!("{}/releases/latest", self.server.trim_end_matches('/'))
    }

    pub fn download_url(&self, version: &str) -> String {
        format!(
            "{}/releases/{}/downloads/all-structures",
            self.server.trim_end_matches('/'),
            version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = DrugBankHttpConfig {
            server: "https://example.org/".to_string(),
            ..DrugBankHttpConfig::default()
        };
        assert_eq!(config.latest_url(), "https://example.org/releases/latest");
        assert_eq!(
            config.download_url("5-1-12"),
            "https://example.org/releases/5-1-12/downloads/all-structures"
        );
    }

    #[test]
    fn test_validate() {
        assert!(DrugBankHttpConfig::default().validate().is_ok());

        let config = DrugBankHttpConfig {
            file_name: "../escape.zip".to_string(),
            ..DrugBankHttpConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
