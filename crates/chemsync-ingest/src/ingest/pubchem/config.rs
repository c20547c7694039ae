//! PubChem FTP feed configuration

use chemsync_common::env;
use regex::Regex;
use std::path::PathBuf;

use crate::error::{IngestError, Result};
use crate::ingest::common::ftp::{FtpConfig, RETRY_DELAY_SECS};
use crate::ingest::delta::parse_version;

pub const DEFAULT_FTP_PATH: &str = "/pubchem/Compound";
pub const DEFAULT_FILE_PATTERN: &str = r"Compound_[0-9]+_[0-9]+\.sdf\.gz";
pub const DEFAULT_WORKDIR: &str = "./data/pubchem";

#[derive(Debug, Clone)]
pub struct PubChemFtpConfig {
    pub ftp: FtpConfig,

    /// Feed root holding `Daily` and `Weekly`
    pub ftp_path: String,

    /// Remote record files to download, matched against the whole name
    pub file_pattern: String,

    /// Local directory that receives `<Kind>/<name>` trees
    pub workdir: PathBuf,

    /// Full dump loaded when the store has no marker yet
    pub base_directory: Option<PathBuf>,

    /// Version of the full dump
    pub base_version: Option<String>,
}

impl Default for PubChemFtpConfig {
    fn default() -> Self {
        Self {
            ftp: FtpConfig::default(),
            ftp_path: DEFAULT_FTP_PATH.to_string(),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            base_directory: None,
            base_version: None,
        }
    }
}

impl PubChemFtpConfig {
    /// Load from `FTP_*`, `SDF_FILE_PATTERN`, `SDF_DIRECTORY`, `BASE_DIRECTORY`
    /// and `BASE_VERSION`
    ///
    /// `FTP_MAX_ATTEMPTS` defaults to a single attempt per operation.
    pub fn from_env() -> Result<Self> {
        let default = Self::default();
        let config = Self {
            ftp: FtpConfig {
                host: env::optional("FTP_HOST").unwrap_or(default.ftp.host),
                port: env::parse_or("FTP_PORT", default.ftp.port)?,
                username: env::optional("FTP_USERNAME").unwrap_or(default.ftp.username),
                password: env::optional("FTP_PASSWORD").unwrap_or(default.ftp.password),
                max_attempts: env::parse_or("FTP_MAX_ATTEMPTS", default.ftp.max_attempts)?,
                retry_delay_secs: env::parse_or("FTP_RETRY_DELAY_SECS", RETRY_DELAY_SECS)?,
            },
            ftp_path: env::optional("FTP_PATH").unwrap_or(default.ftp_path),
            file_pattern: env::optional("SDF_FILE_PATTERN").unwrap_or(default.file_pattern),
            workdir: env::optional("SDF_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(default.workdir),
            base_directory: env::optional("BASE_DIRECTORY").map(PathBuf::from),
            base_version: env::optional("BASE_VERSION"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ftp.host.is_empty() {
            return Err(IngestError::Config("FTP host cannot be empty".to_string()));
        }
        if self.ftp.port == 0 {
            return Err(IngestError::Config("FTP port must be greater than 0".to_string()));
        }
        if let Some(version) = &self.base_version {
            parse_version(version)?;
        }
        self.file_regex()?;
        Ok(())
    }

    /// File pattern anchored at both ends
    pub fn file_regex(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.file_pattern)).map_err(|e| {
            IngestError::Config(format!("invalid SDF_FILE_PATTERN '{}': {}", self.file_pattern, e))
        })
    }

    /// Remote directory of one window, e.g. `/pubchem/Compound/Daily/2024-03-02`
    pub fn remote_dir(&self, relative: &str) -> String {
        format!("{}/{}", self.ftp_path.trim_end_matches('/'), relative)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pattern_matches_whole_names() {
        let regex = PubChemFtpConfig::default().file_regex().unwrap();

        assert!(regex.is_match("Compound_000000001_000500000.sdf.gz"));
        assert!(!regex.is_match("Compound_000000001_000500000.sdf.gz.md5"));
        assert!(!regex.is_match("README"));
    }

    #[test]
    fn test_validate_rejects_bad_inputs() {
        let config = PubChemFtpConfig {
            file_pattern: "(".to_string(),
            ..PubChemFtpConfig::default()
        };
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));

        let config = PubChemFtpConfig {
            base_version: Some("2024/01/01".to_string()),
            ..PubChemFtpConfig::default()
        };
        assert!(matches!(config.validate(), Err(IngestError::InvalidVersion(_))));
    }

    #[test]
    fn test_remote_dir() {
        let config = PubChemFtpConfig {
            ftp_path: "/pubchem/Compound/".to_string(),
            ..PubChemFtpConfig::default()
        };
        assert_eq!(
            config.remote_dir("Weekly/2024-03-01"),
            "/pubchem/Compound/Weekly/2024-03-01"
        );
    }
}
