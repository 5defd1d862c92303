//! Scanner module for discovering new media in the watched folders.
//!
//! Only the top level of each watched folder is considered. Sub-folders,
//! hidden files and files with an unsupported extension are ignored; the
//! latter includes sources renamed for disambiguation, whose extension is
//! the instruction to the user.

use crate::paths::Paths;
use crate::title::MediaKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Media file extensions accepted for ingestion (case-insensitive matching).
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "vob", "avi", "mpg", "m4v"];

/// A media file waiting in a watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Full path to the file.
    pub path: PathBuf,
    /// Which watched folder it was found in.
    pub kind: MediaKind,
}

/// Checks if a file name starts with a dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Returns the lowercased extension when it is one we ingest.
pub fn media_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}

/// Scans one watched folder, non-recursively, in file name order.
///
/// A folder that does not exist yields nothing.
pub fn scan_folder(dir: &Path, kind: MediaKind) -> Vec<Candidate> {
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "Watched folder missing, nothing to scan");
        return Vec::new();
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    let mut candidates = Vec::new();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if !entry.file_type().is_file() || is_hidden(path) {
            continue;
        }

        if media_extension(path).is_none() {
            continue;
        }

        candidates.push(Candidate {
            path: path.to_path_buf(),
            kind,
        });
    }

    candidates
}

/// Scans `New/Movies` then `New/TV`.
pub fn scan_watched(paths: &Paths) -> Vec<Candidate> {
    paths
        .watched()
        .into_iter()
        .flat_map(|(dir, kind)| scan_folder(dir, kind))
        .collect()
}
