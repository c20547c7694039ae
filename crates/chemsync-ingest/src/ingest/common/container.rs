//! Container handling for downloaded structure files
//!
//! # Supported Formats
//!
//! - **Plain** (`.sdf`): read as-is
//! - **Gzip** (`.sdf.gz`): decompressed on the fly with flate2
//! - **Zip** (`.zip`): every member whose name ends with the member suffix,
//!   in archive order
//!
//! Directories are visited in lexicographic file-name order so loads are
//! reproducible. Files with other suffixes are skipped.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IngestError, Result};

/// Default suffix selecting zip members that hold records
pub const DEFAULT_MEMBER_SUFFIX: &str = ".sdf";

/// Container format, chosen from the file name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Plain,
    Gzip,
    Zip,
}

impl ContainerKind {
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".sdf.gz") {
            Ok(ContainerKind::Gzip)
        } else if name.ends_with(".zip") {
            Ok(ContainerKind::Zip)
        } else if name.ends_with(".sdf") {
            Ok(ContainerKind::Plain)
        } else {
            Err(IngestError::UnsupportedContainer(path.to_path_buf()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Plain => "plain",
            ContainerKind::Gzip => "gzip",
            ContainerKind::Zip => "zip",
        }
    }
}

/// Opens record streams from files and directories
#[derive(Debug, Clone)]
pub struct ContainerReader {
    member_suffix: String,
}

impl ContainerReader {
    pub fn new(member_suffix: impl Into<String>) -> Self {
        Self {
            member_suffix: member_suffix.into(),
        }
    }

    pub fn member_suffix(&self) -> &str {
        &self.member_suffix
    }

    /// Supported files of `dir`, sorted by file name
    pub fn list_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match ContainerKind::detect(&path) {
                Ok(_) => files.push(path),
                Err(e) if !e.is_fatal() => {
                    debug!(path = %path.display(), "Skipping unsupported file");
                },
                Err(e) => return Err(e),
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Call `visit` once per record stream held by `path`
    ///
    /// The stream name passed to `visit` is the file name, or
    /// `archive.zip:member.sdf` for zip members.
    pub fn for_each_stream<F>(&self, path: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &mut dyn BufRead) -> Result<()>,
    {
        let kind = ContainerKind::detect(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!(path = %path.display(), kind = kind.as_str(), "Opening container");

        let file = File::open(path)?;
        match kind {
            ContainerKind::Plain => {
                let mut reader = BufReader::new(file);
                visit(&file_name, &mut reader)
            },
            ContainerKind::Gzip => {
                let mut reader = BufReader::new(GzDecoder::new(file));
                visit(&file_name, &mut reader)
            },
            ContainerKind::Zip => {
                let mut archive = zip::ZipArchive::new(file).map_err(zip_error)?;
                for i in 0..archive.len() {
                    let member = archive.by_index(i).map_err(zip_error)?;
                    if member.is_dir() || !member.name().ends_with(&self.member_suffix) {
                        continue;
                    }

                    let stream_name = format!("{}:{}", file_name, member.name());
                    debug!(member = %stream_name, "Reading zip member");
                    let mut reader = BufReader::new(member);
                    visit(&stream_name, &mut reader)?;
                }
                Ok(())
            },
        }
    }
}

impl Default for ContainerReader {
    fn default() -> Self {
        Self::new(DEFAULT_MEMBER_SUFFIX)
    }
}

fn zip_error(err: zip::result::ZipError) -> IngestError {
    IngestError::Io(io::Error::new(io::ErrorKind::InvalidData, err))
}
