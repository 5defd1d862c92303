//! Folder layout under the configured root.

use crate::fsops::{self, FsError};
use crate::title::MediaKind;
use std::path::{Path, PathBuf};

/// Every folder the daemon reads or writes, derived from one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    /// Root/New/Movies, watched
    pub new_movies: PathBuf,
    /// Root/New/TV, watched
    pub new_tv: PathBuf,
    /// Root/Staging, cleared at startup
    pub staging: PathBuf,
    pub movies: PathBuf,
    pub tv: PathBuf,
    /// Root/Failed, quarantine
    pub failed: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            new_movies: root.join("New").join("Movies"),
            new_tv: root.join("New").join("TV"),
            staging: root.join("Staging"),
            movies: root.join("Movies"),
            tv: root.join("TV"),
            failed: root.join("Failed"),
            root,
        }
    }

    /// Watched folders in scan order, with the kind of media each holds.
    pub fn watched(&self) -> [(&Path, MediaKind); 2] {
        [
            (self.new_movies.as_path(), MediaKind::Movie),
            (self.new_tv.as_path(), MediaKind::Tv),
        ]
    }

    /// Library folder for a kind of media.
    pub fn library_for(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Movie => &self.movies,
            MediaKind::Tv => &self.tv,
        }
    }

    /// The root-level library index.
    pub fn library_index(&self) -> PathBuf {
        self.root.join(crate::metadata::METADATA_FILE)
    }

    /// Create every folder that should exist.
    pub fn create_all(&self) -> Result<(), FsError> {
        for dir in [
            &self.new_movies,
            &self.new_tv,
            &self.staging,
            &self.movies,
            &self.tv,
            &self.failed,
        ] {
            fsops::ensure_dir(dir)?;
        }
        Ok(())
    }
}
