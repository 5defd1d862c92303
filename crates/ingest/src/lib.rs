//! Gondola
//!
//! Media ingestion daemon: watches drop folders, works out how each file
//! should be converted, writes HLS output into the library and keeps the
//! library index current.

pub mod daemon;
pub mod decide;
pub mod exclusive;
pub mod fsops;
pub mod hints;
pub mod hls;
pub mod ingest;
pub mod jobs;
pub mod library;
pub mod metadata;
pub mod paths;
pub mod playlist;
pub mod probe;
pub mod runner;
pub mod scan;
pub mod startup;
pub mod title;
pub mod watch;

pub use daemon::{Daemon, DaemonError};
pub use decide::{decide, AudioPreview, Decision, DecisionError, EncodePlan};
pub use exclusive::ExclusivityGate;
pub use gondola_config as config;
pub use gondola_config::Config;
pub use hints::HintSet;
pub use hls::{ConversionError, HlsConverter};
pub use ingest::{IngestError, IngestOutcome, Ingestor};
pub use jobs::{IngestionJob, JobError, JobState};
pub use library::{JsonLibraryIndex, LibraryIndexer};
pub use metadata::{FilenameMetadata, MetadataProvider, TitleRecord};
pub use paths::Paths;
pub use probe::{ProbeError, ProbeResult, StreamDescriptor, StreamKind, StreamProber};
pub use runner::{Invocation, ProcessOutput, ProcessRunner, RunError, SystemRunner};
pub use scan::{scan_watched, Candidate};
pub use startup::{run_startup_checks, StartupError};
pub use title::{parse_title, MediaKind, ParsedTitle, TitleError};
pub use watch::{FolderWatcher, WatchError};
