//! Filesystem helpers for staging, promotion and quarantine.
//!
//! Every mutation here tolerates the target having already vanished, and
//! every destination is collision-safe: an existing entry is never
//! clobbered, the new one gets a ` (n)` suffix instead.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur while moving media around.
#[derive(Debug, Error)]
pub enum FsError {
    /// Failed to create a directory.
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to move a file or directory.
    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to remove a file or directory.
    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ran out of ` (n)` suffixes.
    #[error("No free name for {0}")]
    NoFreeName(PathBuf),
}

const MAX_SUFFIX: u32 = 10_000;

/// Replaces characters that are unsafe on common filesystems with `-`.
pub fn sanitise_for_filesystem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '<' | '>' | ':' | '"' | '\\' | '|' | '?' | '*' => '-',
            other => other,
        })
        .collect()
}

/// Returns `dir/name`, or `dir/name (2)`, `dir/name (3)`, ... for the first
/// one that does not exist. The extension is kept after the suffix, so
/// `film.mkv` becomes `film (2).mkv`.
///
/// # Arguments
///
/// * `dir` - Directory the entry will live in
/// * `name` - Preferred file or directory name
///
/// # Returns
///
/// A path that did not exist when checked
pub fn unique_path(dir: &Path, name: &str) -> Result<PathBuf, FsError> {
    let candidate = dir.join(name);
    if !exists(&candidate) {
        return Ok(candidate);
    }

    let (stem, ext) = match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) if name.len() > ext.len() + 1 => (&name[..name.len() - ext.len() - 1], Some(ext)),
        _ => (name, None),
    };

    for n in 2..MAX_SUFFIX {
        let next = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = dir.join(next);
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }

    Err(FsError::NoFreeName(dir.join(name)))
}

/// Like [`unique_path`] but never splits an extension off. For folders
/// named after titles, which often contain dots.
pub fn unique_dir(parent: &Path, name: &str) -> Result<PathBuf, FsError> {
    let candidate = parent.join(name);
    if !exists(&candidate) {
        return Ok(candidate);
    }
    for n in 2..MAX_SUFFIX {
        let candidate = parent.join(format!("{} ({})", name, n));
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }
    Err(FsError::NoFreeName(parent.join(name)))
}

fn exists(path: &Path) -> bool {
    // symlink_metadata so a dangling link still counts as taken
    fs::symlink_metadata(path).is_ok()
}

/// Creates a directory and all its parents.
pub fn ensure_dir(path: &Path) -> Result<(), FsError> {
    fs::create_dir_all(path).map_err(|source| FsError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a file in one go.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<(), FsError> {
    fs::write(path, contents).map_err(|source| FsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Moves a file or directory tree, creating the destination's parent.
///
/// Tries a rename first (fast, same filesystem) and falls back to copy and
/// delete when the rename fails. A source that no longer exists is treated
/// as already moved.
///
/// # Returns
///
/// * `Ok(true)` if something was moved
/// * `Ok(false)` if the source was already gone
pub fn move_path(from: &Path, to: &Path) -> Result<bool, FsError> {
    let move_err = |source| FsError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    let metadata = match fs::symlink_metadata(from) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(move_err(e)),
    };

    if let Some(parent) = to.parent() {
        ensure_dir(parent)?;
    }

    match fs::rename(from, to) {
        Ok(()) => return Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            tracing::debug!(from = %from.display(), to = %to.display(), error = %e, "Rename failed, copying instead");
        }
    }

    if metadata.is_dir() {
        copy_tree(from, to).map_err(move_err)?;
        remove_dir_all_if_exists(from)?;
    } else {
        fs::copy(from, to).map_err(move_err)?;
        remove_file_if_exists(from)?;
    }
    Ok(true)
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Removes a file; a missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> Result<bool, FsError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(FsError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Removes a directory tree; a missing directory is not an error.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<bool, FsError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(FsError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Empties a directory but keeps the directory itself, creating it if needed.
pub fn clear_dir(path: &Path) -> Result<(), FsError> {
    remove_dir_all_if_exists(path)?;
    ensure_dir(path)
}
