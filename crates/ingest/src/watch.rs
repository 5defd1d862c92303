//! Folder watcher.
//!
//! Surfaces changes in the watched folders as a stream of paths. Each
//! surfaced change is followed by a settling delay, and everything that
//! arrived in the meantime is folded into it: the caller rescans whole
//! folders, so one wake-up per burst is enough.
//!
//! Reads and opens are ignored. A writer closing its handle is not: that is
//! usually the moment a copy finishes and the file becomes ingestible.

use crate::scan::is_hidden;
use notify::event::{AccessKind, AccessMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create file watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Non-recursive watch over a fixed set of folders.
pub struct FolderWatcher {
    // Dropping the watcher ends the stream.
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<PathBuf>,
    settle: Duration,
}

impl FolderWatcher {
    /// Start watching. Any folder that cannot be watched is an error.
    pub fn start(dirs: &[&Path], settle: Duration) -> Result<Self, WatchError> {
        let (event_tx, events) = mpsc::channel::<PathBuf>(EVENT_BUFFER);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !is_relevant(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if is_hidden(&path) {
                            continue;
                        }
                        // A full buffer already guarantees a rescan.
                        let _ = event_tx.try_send(path);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "File watcher error"),
            },
            NotifyConfig::default(),
        )
        .map_err(WatchError::Create)?;

        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: dir.to_path_buf(),
                    source,
                })?;
            tracing::info!(dir = %dir.display(), "Watching");
        }

        Ok(Self {
            _watcher: watcher,
            events,
            settle,
        })
    }

    /// Wait for the next change, let it settle, and swallow whatever
    /// arrived meanwhile. Returns the first changed path of the burst.
    pub async fn next_change(&mut self) -> Option<PathBuf> {
        let first = self.events.recv().await?;
        tracing::debug!(path = %first.display(), "Change noticed, settling");

        tokio::time::sleep(self.settle).await;

        let mut coalesced = 0usize;
        while self.events.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            tracing::debug!(coalesced, "Folded further changes into this one");
        }
        Some(first)
    }
}

/// Everything but access events, except a writer closing the file.
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::fs;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_missing_folder_is_fatal() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("New").join("Movies");

        let result = FolderWatcher::start(&[temp.path(), missing.as_path()], Duration::from_millis(10));
        match result {
            Err(WatchError::Watch { path, .. }) => assert_eq!(path, missing),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Expected the watch to fail"),
        }
    }

    #[test]
    fn test_close_after_write_is_relevant() {
        assert!(is_relevant(&EventKind::Access(AccessKind::Close(AccessMode::Write))));
        assert!(is_relevant(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Close(AccessMode::Read))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Open(AccessMode::Any))));
        assert!(!is_relevant(&EventKind::Access(AccessKind::Read)));
    }

    // Only inotify reports the close of a written file.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_finished_copy_surfaces_again() {
        use std::io::Write;

        let temp = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::start(&[temp.path()], Duration::from_millis(50)).unwrap();

        let mut copying = fs::File::create(temp.path().join("copying.mkv")).unwrap();
        copying.write_all(b"first half").unwrap();
        copying.flush().unwrap();

        let first = tokio::time::timeout(WAIT, watcher.next_change())
            .await
            .expect("no change surfaced")
            .unwrap();
        assert_eq!(first.file_name().unwrap(), "copying.mkv");

        drop(copying);

        let closed = tokio::time::timeout(WAIT, watcher.next_change())
            .await
            .expect("closing the written file should surface")
            .unwrap();
        assert_eq!(closed.file_name().unwrap(), "copying.mkv");
    }

    #[tokio::test]
    async fn test_new_file_surfaces() {
        let temp = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::start(&[temp.path()], Duration::from_millis(50)).unwrap();

        fs::write(temp.path().join("Heat.1995.mkv"), b"data").unwrap();

        let changed = tokio::time::timeout(WAIT, watcher.next_change())
            .await
            .expect("no change surfaced")
            .unwrap();
        assert_eq!(changed.file_name().unwrap(), "Heat.1995.mkv");
    }

    #[tokio::test]
    async fn test_hidden_files_are_dropped() {
        let temp = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::start(&[temp.path()], Duration::from_millis(50)).unwrap();

        fs::write(temp.path().join(".partial"), b"data").unwrap();
        fs::write(temp.path().join("visible.mkv"), b"data").unwrap();

        let changed = tokio::time::timeout(WAIT, watcher.next_change())
            .await
            .expect("no change surfaced")
            .unwrap();
        assert_eq!(changed.file_name().unwrap(), "visible.mkv");
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let temp = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::start(&[temp.path()], Duration::from_millis(500)).unwrap();

        for name in ["a.mkv", "b.mkv", "c.mkv"] {
            fs::write(temp.path().join(name), b"data").unwrap();
        }

        let first = tokio::time::timeout(WAIT, watcher.next_change()).await.unwrap();
        assert!(first.is_some());

        let second = tokio::time::timeout(Duration::from_millis(300), watcher.next_change()).await;
        assert!(second.is_err(), "burst should surface once");
    }
}
