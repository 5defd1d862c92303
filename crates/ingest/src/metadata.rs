//! Metadata provider interface.
//!
//! Catalogue lookups sit behind [`MetadataProvider`], which turns a parsed
//! title into a provider-agnostic [`TitleRecord`] and optionally fetches
//! artwork for it. The bundled [`FilenameMetadata`] provider works offline
//! and derives everything from the file name.

use crate::fsops::{self, FsError};
use crate::title::{MediaKind, ParsedTitle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-item metadata sidecar.
pub const METADATA_FILE: &str = "metadata.json";
/// Per-item artwork.
pub const IMAGE_FILE: &str = "image.jpg";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to serialise metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Normalised metadata for one library item, whatever provider produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRecord {
    pub kind: MediaKind,
    /// Movie title, or show name for episodes.
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    /// Where the artwork lives, for providers that have any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Name of the provider that produced this record.
    pub provider: String,
}

impl TitleRecord {
    /// The record a file name alone can support.
    pub fn from_parsed(parsed: &ParsedTitle, provider: &str) -> Self {
        let mut record = TitleRecord {
            kind: parsed.kind(),
            title: String::new(),
            year: None,
            season: None,
            season_name: None,
            episode: None,
            episode_name: None,
            overview: None,
            image_url: None,
            provider: provider.to_string(),
        };
        match parsed {
            ParsedTitle::Movie { title, year } => {
                record.title = title.clone();
                record.year = *year;
            }
            ParsedTitle::Episode {
                show,
                season,
                episode,
                season_name,
                episode_name,
            } => {
                record.title = show.clone();
                record.season = Some(*season);
                record.episode = Some(*episode);
                record.season_name = season_name.clone();
                record.episode_name = episode_name.clone();
            }
        }
        record
    }
}

/// A catalogue that can describe titles.
///
/// Implementations are shared behind an `Arc` and must be thread-safe.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short, lowercase identifier (e.g. `"filename"`).
    fn name(&self) -> &'static str;

    /// Look up a title. An error means the title is unknown or the
    /// catalogue is unreachable; either way the file cannot be ingested.
    async fn lookup_title(&self, title: &ParsedTitle) -> anyhow::Result<TitleRecord>;

    /// Fetch artwork for a record. `Ok(None)` means there is none.
    async fn fetch_image(&self, record: &TitleRecord) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Offline provider: the record is whatever the file name says.
#[derive(Debug, Clone, Default)]
pub struct FilenameMetadata;

#[async_trait]
impl MetadataProvider for FilenameMetadata {
    fn name(&self) -> &'static str {
        "filename"
    }

    async fn lookup_title(&self, title: &ParsedTitle) -> anyhow::Result<TitleRecord> {
        if title.display_name().trim().is_empty() {
            anyhow::bail!("file name yields an empty title");
        }
        Ok(TitleRecord::from_parsed(title, self.name()))
    }

    async fn fetch_image(&self, _record: &TitleRecord) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Write `metadata.json` into an item folder.
pub fn write_sidecar(dir: &Path, record: &TitleRecord) -> Result<PathBuf, MetadataError> {
    let path = dir.join(METADATA_FILE);
    let json = serde_json::to_vec_pretty(record)?;
    fsops::write_file(&path, &json)?;
    Ok(path)
}

/// Write `image.jpg` into an item folder.
pub fn write_image(dir: &Path, image: &[u8]) -> Result<PathBuf, FsError> {
    let path = dir.join(IMAGE_FILE);
    fsops::write_file(&path, image)?;
    Ok(path)
}
