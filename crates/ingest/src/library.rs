//! Library index generation.
//!
//! After every promotion the whole library is re-read from disk and the
//! root `metadata.json` is rewritten from scratch. Items are discovered by
//! their per-item `metadata.json` sidecar; folders without one are not
//! listed. Output is sorted so an unchanged library always produces the
//! same bytes.

use crate::metadata::{TitleRecord, IMAGE_FILE, METADATA_FILE};
use crate::paths::Paths;
use crate::playlist::MASTER_PLAYLIST;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialise library index: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Rebuilds whatever index or pages describe the library.
pub trait LibraryIndexer: Send + Sync {
    /// Regenerate from the current library contents. Safe to rerun.
    fn regenerate(&self, paths: &Paths) -> Result<(), LibraryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryIndex {
    pub movies: Vec<MovieEntry>,
    pub tv_shows: Vec<ShowEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieEntry {
    pub title: String,
    pub year: Option<u32>,
    pub overview: Option<String>,
    /// Master playlist, relative to the root
    pub media: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowEntry {
    pub name: String,
    pub seasons: Vec<SeasonEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonEntry {
    pub season: u32,
    pub name: Option<String>,
    pub episodes: Vec<EpisodeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub episode: u32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub media: String,
    pub image: Option<String>,
}

/// Writes the library index as JSON at `<root>/metadata.json`.
#[derive(Debug, Clone, Default)]
pub struct JsonLibraryIndex;

impl LibraryIndexer for JsonLibraryIndex {
    fn regenerate(&self, paths: &Paths) -> Result<(), LibraryError> {
        let index = build_index(paths)?;
        let mut json = serde_json::to_vec_pretty(&index)?;
        json.push(b'\n');

        let target = paths.library_index();
        fs::write(&target, json).map_err(|source| LibraryError::Write {
            path: target.clone(),
            source,
        })?;
        tracing::info!(
            movies = index.movies.len(),
            shows = index.tv_shows.len(),
            path = %target.display(),
            "Library index regenerated"
        );
        Ok(())
    }
}

/// Read the library tree into an index.
pub fn build_index(paths: &Paths) -> Result<LibraryIndex, LibraryError> {
    let mut movies = Vec::new();
    for folder in directories_in(&paths.movies)? {
        let Some(record) = read_record(&folder) else {
            continue;
        };
        movies.push(MovieEntry {
            title: record.title,
            year: record.year,
            overview: record.overview,
            media: relative(&paths.root, &folder.join(MASTER_PLAYLIST)),
            image: image_of(&paths.root, &folder),
        });
    }

    let mut tv_shows = Vec::new();
    for show_folder in directories_in(&paths.tv)? {
        let mut seasons = Vec::new();
        let mut show_name: Option<String> = None;

        for season_folder in directories_in(&show_folder)? {
            let mut episodes = Vec::new();
            let mut season_number = season_from_folder(&season_folder);
            let mut season_name = None;

            for episode_folder in directories_in(&season_folder)? {
                let Some(record) = read_record(&episode_folder) else {
                    continue;
                };
                show_name.get_or_insert_with(|| record.title.clone());
                season_number = season_number.or(record.season);
                if season_name.is_none() {
                    season_name = record.season_name.clone();
                }
                episodes.push(EpisodeEntry {
                    episode: record.episode.unwrap_or(0),
                    name: record.episode_name,
                    overview: record.overview,
                    media: relative(&paths.root, &episode_folder.join(MASTER_PLAYLIST)),
                    image: image_of(&paths.root, &episode_folder),
                });
            }

            if episodes.is_empty() {
                continue;
            }
            episodes.sort_by(|a, b| a.episode.cmp(&b.episode).then_with(|| a.media.cmp(&b.media)));
            seasons.push(SeasonEntry {
                season: season_number.unwrap_or(0),
                name: season_name,
                episodes,
            });
        }

        if seasons.is_empty() {
            continue;
        }
        seasons.sort_by_key(|s| s.season);
        tv_shows.push(ShowEntry {
            name: show_name.unwrap_or_else(|| folder_name(&show_folder)),
            seasons,
        });
    }

    Ok(LibraryIndex { movies, tv_shows })
}

/// Sub-directories of `path`, sorted by name. A missing folder is empty.
fn directories_in(path: &Path) -> Result<Vec<PathBuf>, LibraryError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(LibraryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn read_record(folder: &Path) -> Option<TitleRecord> {
    let path = folder.join(METADATA_FILE);
    let data = fs::read(&path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable item metadata, leaving it out of the index");
            None
        }
    }
}

fn image_of(root: &Path, folder: &Path) -> Option<String> {
    let image = folder.join(IMAGE_FILE);
    image.is_file().then(|| relative(root, &image))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `Season 3` -> 3
fn season_from_folder(path: &Path) -> Option<u32> {
    folder_name(path)
        .strip_prefix("Season ")
        .and_then(|n| n.trim().parse().ok())
}
