//! Daemon startup and main loop for Gondola
//!
//! Provides the daemon context, startup sequence, and the watch loop.

use crate::fsops::{self, FsError};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::library::{JsonLibraryIndex, LibraryError, LibraryIndexer};
use crate::metadata::{FilenameMetadata, MetadataProvider};
use crate::paths::Paths;
use crate::runner::{ProcessRunner, SystemRunner};
use crate::startup::{run_startup_checks, StartupError};
use crate::watch::{FolderWatcher, WatchError};
use gondola_config::{Config, ConfigError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Preparing the folder layout failed
    #[error("Couldn't prepare folders: {0}")]
    Fs(#[from] FsError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("Couldn't write the library index: {0}")]
    Library(#[from] LibraryError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Folder layout under the configured root
    pub paths: Paths,
    runner: Arc<dyn ProcessRunner>,
    indexer: Arc<dyn LibraryIndexer>,
    ingestor: Ingestor,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file and apply environment overrides
    /// 2. Run startup checks (ffmpeg, ffprobe, lsof)
    /// 3. Create the folder layout, clear leftovers in Staging and
    ///    rebuild the library index
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        let daemon = Self::with_config(config)?;
        daemon.startup_checks().await?;
        daemon.prepare()?;
        Ok(daemon)
    }

    /// Build the daemon with the real process runner and the offline
    /// metadata provider. Runs no checks and touches no files.
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        Self::with_components(
            config,
            Arc::new(SystemRunner::new()),
            Arc::new(FilenameMetadata),
            Arc::new(JsonLibraryIndex),
        )
    }

    /// Build the daemon from explicit components.
    pub fn with_components(
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        metadata: Arc<dyn MetadataProvider>,
        indexer: Arc<dyn LibraryIndexer>,
    ) -> Result<Self, DaemonError> {
        config.validate()?;
        let paths = Paths::new(config.root_path());
        tracing::info!(
            root = %paths.root.display(),
            metadata = metadata.name(),
            "Daemon configured"
        );

        let ingestor = Ingestor::new(&config, paths.clone(), runner.clone(), metadata, indexer.clone());
        Ok(Self {
            config,
            paths,
            runner,
            indexer,
            ingestor,
        })
    }

    /// Verify the external tools.
    pub async fn startup_checks(&self) -> Result<(), DaemonError> {
        run_startup_checks(self.runner.as_ref(), &self.config).await?;
        Ok(())
    }

    /// Create any missing folders, empty Staging and rebuild the library
    /// index. Anything left in Staging is from an interrupted run and was
    /// never promoted; the index may be stale for the same reason.
    pub fn prepare(&self) -> Result<(), DaemonError> {
        self.paths.create_all()?;
        fsops::clear_dir(&self.paths.staging)?;
        tracing::debug!(staging = %self.paths.staging.display(), "Staging cleared");
        self.indexer.regenerate(&self.paths)?;
        tracing::info!(index = %self.paths.library_index().display(), "Library index rebuilt");
        Ok(())
    }

    /// Scan both watched folders once.
    pub async fn run_once(&self) -> Vec<IngestOutcome> {
        let outcomes = self.ingestor.scan_once().await;
        log_summary(&outcomes);
        outcomes
    }

    /// Run the daemon main loop
    ///
    /// Starts watching, ingests whatever is already waiting, then rescans
    /// after every settled change. Only returns if the watch stream ends.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let watched: Vec<&Path> = self.paths.watched().into_iter().map(|(dir, _)| dir).collect();
        let mut watcher = FolderWatcher::start(
            &watched,
            Duration::from_millis(self.config.watch.settle_millis),
        )?;

        self.run_once().await;

        while let Some(changed) = watcher.next_change().await {
            tracing::debug!(path = %changed.display(), "Rescanning after change");
            self.run_once().await;
        }

        tracing::warn!("Watch stream ended");
        Ok(())
    }
}

fn log_summary(outcomes: &[IngestOutcome]) {
    if outcomes.is_empty() {
        return;
    }

    let mut promoted = 0;
    let mut quarantined = 0;
    let mut renamed = 0;
    let mut deferred = 0;
    for outcome in outcomes {
        match outcome {
            IngestOutcome::Promoted { .. } => promoted += 1,
            IngestOutcome::Quarantined { .. } => quarantined += 1,
            IngestOutcome::RenamedForDisambiguation { .. } => renamed += 1,
            IngestOutcome::Deferred { .. } => deferred += 1,
        }
    }
    tracing::info!(promoted, quarantined, renamed, deferred, "Scan finished");
}
