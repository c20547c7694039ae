//! DrugBank release discovery and download over HTTP
//!
//! The latest release tag is scraped from the `releases/latest` page, which
//! links the structure archive as
//! `href="/releases/<tag>/downloads/all-structures"`.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Local;
use futures::StreamExt;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::config::DrugBankHttpConfig;
use crate::error::{IngestError, Result};
use crate::ingest::source::{DownloadedRelease, ReleaseSource};

/// Timestamp format of per-download directories
pub const DOWNLOAD_DIR_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Link to the structure archive of a release, capturing the release tag
pub const RELEASE_LINK_PATTERN: &str = r#"href="/releases/([^/]+)/downloads/all-structures""#;

/// Last release tag linked from `page`
pub fn extract_latest_version(release_link: &Regex, page: &str) -> Option<String> {
    page.lines()
        .flat_map(|line| release_link.captures_iter(line))
        .filter_map(|captures| captures.get(1).map(|m| m.as_str().to_string()))
        .last()
}

pub struct HttpReleaseSource {
    client: Client,
    config: DrugBankHttpConfig,
    release_link: Regex,
}

impl HttpReleaseSource {
    pub fn new(config: DrugBankHttpConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("chemsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(IngestError::transport)?;
        let release_link = Regex::new(RELEASE_LINK_PATTERN)
            .map_err(|e| IngestError::Config(format!("invalid release link pattern: {}", e)))?;
        Ok(Self {
            client,
            config,
            release_link,
        })
    }

    pub fn config(&self) -> &DrugBankHttpConfig {
        &self.config
    }

    async fn fetch_latest_page(&self) -> anyhow::Result<String> {
        let url = self.config.latest_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch {}: {}", url, response.status());
        }
        response.text().await.context("Failed to read release page")
    }

    async fn download_archive(&self, version: &str) -> anyhow::Result<DownloadedRelease> {
        let dir = self
            .config
            .workdir
            .join(Local::now().format(DOWNLOAD_DIR_FORMAT).to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let url = self.config.download_url(version);
        let mut request = self.client.get(&url);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!("Failed to download {}: {}", url, response.status());
        }

        let path = dir.join(&self.config.file_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut size = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Download interrupted")?;
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        info!(version, path = %path.display(), size, "Downloaded release");
        Ok(DownloadedRelease {
            version: version.to_string(),
            dir,
            file_name: self.config.file_name.clone(),
            size,
        })
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn latest_version(&self) -> Result<String> {
        let page = self.fetch_latest_page().await.map_err(IngestError::transport)?;
        extract_latest_version(&self.release_link, &page).ok_or_else(|| {
            IngestError::transport(anyhow::anyhow!(
                "the latest published version cannot be determined from {}",
                self.config.latest_url()
            ))
        })
    }

    async fn download(&self, version: &str) -> Result<DownloadedRelease> {
        self.download_archive(version)
            .await
            .map_err(IngestError::transport)
    }
}
