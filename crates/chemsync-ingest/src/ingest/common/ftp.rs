//! FTP transport with retry logic
//!
//! suppaftp's blocking client runs inside `spawn_blocking`; every operation
//! opens its own session so a failed attempt never leaves a half-used
//! connection behind.
//!
//! ```rust,ignore
//! let client = FtpClient::new(FtpConfig::default());
//! let files = client.list_files("/pubchem/Compound/Daily/2024-03-02/SDF").await?;
//! client.download_to_file("/pubchem/Compound/Daily/2024-03-02/SDF/a.sdf.gz", &local).await?;
//! ```

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use suppaftp::FtpStream;
use tracing::{debug, info, warn};

/// Attempts per FTP operation; a failed run is simply run again
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Base delay between attempts, multiplied by the attempt number
pub const RETRY_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub max_attempts: u32,
    /// Delay unit between retries, seconds
    pub retry_delay_secs: u64,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "ftp.ncbi.nlm.nih.gov".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "anonymous@".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: RETRY_DELAY_SECS,
        }
    }
}

/// Blocking-session FTP client exposed through async methods
#[derive(Debug, Clone)]
pub struct FtpClient {
    config: FtpConfig,
}

impl FtpClient {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    /// List directory contents
    pub async fn list_directory(&self, path: &str) -> Result<Vec<FtpEntry>> {
        let path = path.to_string();
        let entries = self
            .with_retry("LIST", &path, {
                let path = path.clone();
                move |config: &FtpConfig| Self::list_directory_sync(config, &path)
            })
            .await?;
        info!(path = %path, entries = entries.len(), "Listed FTP directory");
        Ok(entries)
    }

    /// Names of the plain files of `path`
    pub async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let entries = self.list_directory(path).await?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.name)
            .collect())
    }

    /// Stream a remote file to `local`, returning the number of bytes written
    ///
    /// Parent directories of `local` are created as needed.
    pub async fn download_to_file(&self, remote: &str, local: &Path) -> Result<u64> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let remote = remote.to_string();
        let local_path = local.to_path_buf();
        let bytes = self
            .with_retry("RETR", &remote, {
                let remote = remote.clone();
                move |config: &FtpConfig| Self::download_sync(config, &remote, &local_path)
            })
            .await?;
        info!(remote = %remote, local = %local.display(), bytes, "Downloaded file");
        Ok(bytes)
    }

    async fn with_retry<T, F>(&self, operation: &str, target: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&FtpConfig) -> Result<T> + Clone + Send + 'static,
    {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            debug!("{} attempt {}/{} for: {}", operation, attempt, max_attempts, target);

            let config = self.config.clone();
            let op = op.clone();
            match tokio::task::spawn_blocking(move || op(&config)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if attempt < max_attempts => {
                    let delay = self.config.retry_delay_secs * attempt as u64;
                    warn!(
                        "{} attempt {}/{} failed: {:#}. Retrying in {}s...",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                },
                Ok(Err(e)) => {
                    return Err(e).with_context(|| {
                        format!("{} {} failed after {} attempt(s)", operation, target, attempt)
                    });
                },
                Err(e) => {
                    return Err(anyhow::anyhow!("FTP {} task panicked: {}", operation, e));
                },
            }
        }

        Err(anyhow::anyhow!("{} {} was never attempted", operation, target))
    }

    fn connect(config: &FtpConfig) -> Result<FtpStream> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);
        let mut ftp_stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
            .context("Failed to connect to FTP server")?;

        ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);
        ftp_stream
            .login(&config.username, &config.password)
            .context("FTP login failed")?;
        Ok(ftp_stream)
    }

    fn quit(mut ftp_stream: FtpStream) {
        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }
    }

    fn download_sync(config: &FtpConfig, remote: &str, local: &Path) -> Result<u64> {
        let mut ftp_stream = Self::connect(config)?;
        ftp_stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .context("Failed to set binary mode")?;

        let mut data = ftp_stream
            .retr_as_stream(remote)
            .with_context(|| format!("Failed to retrieve {}", remote))?;
        let mut file = std::fs::File::create(local)
            .with_context(|| format!("Failed to create {}", local.display()))?;
        let bytes = std::io::copy(&mut data, &mut file)
            .with_context(|| format!("Failed to write {}", local.display()))?;
        ftp_stream
            .finalize_retr_stream(data)
            .context("Failed to finalize transfer")?;

        Self::quit(ftp_stream);
        Ok(bytes)
    }

    fn list_directory_sync(config: &FtpConfig, path: &str) -> Result<Vec<FtpEntry>> {
        let mut ftp_stream = Self::connect(config)?;
        let lines = ftp_stream
            .list(Some(path))
            .with_context(|| format!("Failed to list directory: {}", path))?;
        Self::quit(ftp_stream);

        Ok(lines.iter().filter_map(|line| FtpEntry::parse(line)).collect())
    }
}

/// Parsed FTP LIST line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl FtpEntry {
    /// Parse a Unix-style LIST line
    ///
    /// `drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 2024-01-15`
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let name = parts.last()?.to_string();
        if name == "." || name == ".." {
            return None;
        }

        Some(Self {
            name,
            is_directory: parts[0].starts_with('d'),
            size: parts.get(4).and_then(|s| s.parse().ok()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directory_entry() {
        let entry = FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 2024-01-15").unwrap();
        assert_eq!(entry.name, "2024-01-15");
        assert!(entry.is_directory);
        assert_eq!(entry.size, Some(4096));
    }

    #[test]
    fn test_parse_file_entry() {
        let entry = FtpEntry::parse(
            "-rw-r--r--   1 ftp ftp  81234 Jan 15 12:00 Compound_000000001_000500000.sdf.gz",
        )
        .unwrap();
        assert_eq!(entry.name, "Compound_000000001_000500000.sdf.gz");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, Some(81234));
    }

    #[test]
    fn test_parse_skips_dot_entries_and_noise() {
        assert!(FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15 12:00 .").is_none());
        assert!(FtpEntry::parse("total 12").is_none());
        assert!(FtpEntry::parse("   ").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_surfaces_error() {
        let client = FtpClient::new(FtpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..FtpConfig::default()
        });

        let err = client.list_directory("/").await.unwrap_err();
        assert!(format!("{:#}", err).contains("failed after 1 attempt(s)"));
    }

    #[tokio::test]
    async fn test_configured_attempts_are_used() {
        let client = FtpClient::new(FtpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            max_attempts: 3,
            retry_delay_secs: 0,
            ..FtpConfig::default()
        });

        let err = client.list_directory("/").await.unwrap_err();
        assert!(format!("{:#}", err).contains("failed after 3 attempt(s)"));
    }
}
