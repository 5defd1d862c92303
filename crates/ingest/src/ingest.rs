//! Ingestion orchestrator.
//!
//! Takes one file from a watched folder to a terminal outcome:
//!
//! 1. Ask the exclusivity gate; a file still being written is left alone.
//! 2. Parse the title, create a staging folder, write the metadata sidecar.
//! 3. Probe the streams and decide how to convert.
//! 4. Convert into the staging folder, then move it into the library,
//!    delete the source and regenerate the library index.
//!
//! Any hard failure quarantines the source into `Failed/` and discards the
//! staging folder. A multi-audio file without a usable hint gets audio
//! previews and is renamed so the user can choose.
//!
//! Files are processed one at a time; a failure never stops the rest of a
//! scan.

use crate::decide::{decide, AudioPreview, Decision, DecisionError};
use crate::exclusive::ExclusivityGate;
use crate::fsops::{self, sanitise_for_filesystem, FsError};
use crate::hints::{HintSet, AUDIO_STREAM_PLACEHOLDER};
use crate::hls::{ConversionError, HlsConverter};
use crate::jobs::{IngestionJob, JobError, JobState};
use crate::library::LibraryIndexer;
use crate::metadata::{self, MetadataError, MetadataProvider};
use crate::paths::Paths;
use crate::probe::{ProbeError, StreamProber};
use crate::runner::ProcessRunner;
use crate::scan::{scan_watched, Candidate};
use crate::title::{parse_title, ParsedTitle, TitleError};
use gondola_config::{Config, RecipeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Appended to a source renamed for disambiguation. Also takes the file out
/// of the scanner's extension filter until the user edits the name.
pub const DISAMBIGUATION_SUFFIX: &str = "please insert correct audio stream number then remove this";

/// Why a file was quarantined.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("couldn't parse title: {0}")]
    Title(#[from] TitleError),

    #[error("metadata lookup failed: {0:#}")]
    Lookup(anyhow::Error),

    #[error("couldn't write metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("can't convert: {0}")]
    Decision(#[from] DecisionError),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("staging folder {0} vanished before promotion")]
    StageVanished(PathBuf),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Where one file ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Another process still has the file open; try again on a later scan.
    Deferred { source: PathBuf },
    /// Converted and moved into the library.
    Promoted { source: PathBuf, destination: PathBuf },
    /// Moved to `Failed/` (if it still existed).
    Quarantined {
        source: PathBuf,
        moved_to: Option<PathBuf>,
        reason: String,
    },
    /// Renamed so the user picks an audio stream.
    RenamedForDisambiguation {
        source: PathBuf,
        renamed_to: PathBuf,
        previews: Vec<PathBuf>,
    },
}

impl IngestOutcome {
    /// The job's terminal state, `None` for a deferred file.
    pub fn state(&self) -> Option<JobState> {
        match self {
            IngestOutcome::Deferred { .. } => None,
            IngestOutcome::Promoted { .. } => Some(JobState::Promoted),
            IngestOutcome::Quarantined { .. } => Some(JobState::Quarantined),
            IngestOutcome::RenamedForDisambiguation { .. } => Some(JobState::RenamedForDisambiguation),
        }
    }
}

/// Runs the ingestion pipeline over the watched folders.
pub struct Ingestor {
    paths: Paths,
    recipes: Vec<RecipeConfig>,
    debug_skip_hls: bool,
    gate: ExclusivityGate,
    prober: StreamProber,
    converter: HlsConverter,
    metadata: Arc<dyn MetadataProvider>,
    indexer: Arc<dyn LibraryIndexer>,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        paths: Paths,
        runner: Arc<dyn ProcessRunner>,
        metadata: Arc<dyn MetadataProvider>,
        indexer: Arc<dyn LibraryIndexer>,
    ) -> Self {
        Self {
            paths,
            recipes: config.recipes.clone(),
            debug_skip_hls: config.debug_skip_hls,
            gate: ExclusivityGate::new(runner.clone(), config),
            prober: StreamProber::new(
                runner.clone(),
                config.tools.ffprobe.clone(),
                Duration::from_secs(config.timeouts.probe_secs),
            ),
            converter: HlsConverter::new(runner, config),
            metadata,
            indexer,
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Scan both watched folders and ingest every eligible file in turn.
    pub async fn scan_once(&self) -> Vec<IngestOutcome> {
        let candidates = scan_watched(&self.paths);
        if candidates.is_empty() {
            tracing::debug!("Nothing to ingest");
            return Vec::new();
        }

        tracing::info!(count = candidates.len(), "Scan found candidates");
        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            outcomes.push(self.ingest(candidate).await);
        }
        outcomes
    }

    /// Take one file to a terminal outcome. Never panics on a bad file.
    pub async fn ingest(&self, candidate: &Candidate) -> IngestOutcome {
        let source = candidate.path.clone();
        let mut job = IngestionJob::new(source.clone(), candidate.kind);

        if !self.gate.is_exclusively_available(&source).await {
            tracing::info!(path = %source.display(), "Deferred, file is still being written");
            return IngestOutcome::Deferred { source };
        }

        tracing::info!(job = %job.id, path = %source.display(), kind = %job.kind, "Processing");
        if let Err(e) = job.transition(JobState::Staged) {
            return self.quarantine(&mut job, IngestError::Job(e));
        }

        match self.process(&mut job).await {
            Ok(outcome) => outcome,
            Err(e) => self.quarantine(&mut job, e),
        }
    }

    async fn process(&self, job: &mut IngestionJob) -> Result<IngestOutcome, IngestError> {
        let source = job.source_path.clone();
        let file_name = file_name_of(&source);

        let title = parse_title(&file_name, job.kind)?;
        job.title = Some(title.clone());

        let staging_dir = self.create_stage(&title, &job.id)?;
        job.staging_dir = Some(staging_dir.clone());

        self.write_metadata(&title, &staging_dir).await?;

        let probe = self.prober.probe(&source).await?;
        job.transition(JobState::Probed)?;

        let hints = HintSet::from_path(&source, &self.recipes);
        let plan = match decide(&probe, &hints, &source)? {
            Decision::Encode(plan) => plan,
            Decision::Disambiguate(previews) => {
                return self.disambiguate(job, &hints, &previews).await;
            }
        };
        job.transition(JobState::PlanReady)?;

        job.transition(JobState::Converting)?;
        if self.debug_skip_hls {
            tracing::warn!(path = %source.display(), "Not converting to HLS (debug_skip_hls)");
        } else {
            self.converter.convert(&source, &plan, &staging_dir).await?;
        }

        self.promote(job, &title, &staging_dir)
    }

    fn create_stage(&self, title: &ParsedTitle, job_id: &str) -> Result<PathBuf, FsError> {
        let name = sanitise_for_filesystem(title.display_name().trim());
        let name = if name.is_empty() { job_id.to_string() } else { name };
        let dir = fsops::unique_dir(&self.paths.staging, &name)?;
        fsops::ensure_dir(&dir)?;
        Ok(dir)
    }

    async fn write_metadata(&self, title: &ParsedTitle, staging_dir: &Path) -> Result<(), IngestError> {
        let record = self
            .metadata
            .lookup_title(title)
            .await
            .map_err(IngestError::Lookup)?;
        metadata::write_sidecar(staging_dir, &record)?;

        match self.metadata.fetch_image(&record).await {
            Ok(Some(image)) => {
                if let Err(e) = metadata::write_image(staging_dir, &image) {
                    tracing::warn!(error = %e, "Couldn't save the image");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(title = %record.title, error = %e, "Couldn't download the image"),
        }
        Ok(())
    }

    async fn disambiguate(
        &self,
        job: &mut IngestionJob,
        hints: &HintSet,
        previews: &[AudioPreview],
    ) -> Result<IngestOutcome, IngestError> {
        let source = job.source_path.clone();
        tracing::info!(
            path = %source.display(),
            streams = previews.len(),
            "Several audio streams and no choice in the file name, writing previews"
        );

        let mut rendered = Vec::with_capacity(previews.len());
        for preview in previews {
            match self.converter.render_preview(&source, preview).await {
                Ok(()) => rendered.push(preview.output_path.clone()),
                Err(e) => tracing::warn!(
                    stream = preview.stream_index,
                    error = %e,
                    "Couldn't render audio preview"
                ),
            }
        }

        let dir = source.parent().unwrap_or(Path::new("."));
        let renamed_name = disambiguation_name(&source, hints.audio_placeholder);
        let renamed_to = fsops::unique_path(dir, &renamed_name)?;
        fsops::move_path(&source, &renamed_to)?;

        if let Some(stage) = job.staging_dir.take() {
            fsops::remove_dir_all_if_exists(&stage)?;
        }
        job.transition(JobState::RenamedForDisambiguation)?;

        tracing::info!(
            path = %renamed_to.display(),
            "Renamed for disambiguation, put the chosen stream number in the name and remove the suffix"
        );
        Ok(IngestOutcome::RenamedForDisambiguation {
            source,
            renamed_to,
            previews: rendered,
        })
    }

    fn promote(
        &self,
        job: &mut IngestionJob,
        title: &ParsedTitle,
        staging_dir: &Path,
    ) -> Result<IngestOutcome, IngestError> {
        let wanted = self
            .paths
            .library_for(job.kind)
            .join(title.library_relative_path());
        let parent = wanted.parent().unwrap_or(self.paths.root.as_path());
        let name = file_name_of(&wanted);
        let destination = fsops::unique_dir(parent, &name)?;

        if !fsops::move_path(staging_dir, &destination)? {
            return Err(IngestError::StageVanished(staging_dir.to_path_buf()));
        }
        job.staging_dir = None;
        job.transition(JobState::Promoted)?;
        tracing::info!(
            job = %job.id,
            destination = %destination.display(),
            state = %job.state,
            "Success, removing original"
        );

        let source = job.source_path.clone();
        if let Err(e) = fsops::remove_file_if_exists(&source) {
            tracing::warn!(path = %source.display(), error = %e, "Couldn't remove the original");
        }
        if let Err(e) = self.indexer.regenerate(&self.paths) {
            tracing::warn!(error = %e, "Library index regeneration failed");
        }

        Ok(IngestOutcome::Promoted { source, destination })
    }

    fn quarantine(&self, job: &mut IngestionJob, error: IngestError) -> IngestOutcome {
        let source = job.source_path.clone();
        let reason = error.to_string();
        tracing::error!(
            job = %job.id,
            path = %source.display(),
            state = %job.state,
            "Failed, moving to the Failed folder: {}",
            reason
        );

        let moved_to = match fsops::unique_path(&self.paths.failed, &file_name_of(&source))
            .and_then(|target| fsops::move_path(&source, &target).map(|moved| moved.then_some(target)))
        {
            Ok(moved_to) => moved_to,
            Err(e) => {
                tracing::error!(path = %source.display(), error = %e, "Couldn't quarantine the source");
                None
            }
        };

        if let Some(stage) = job.staging_dir.take() {
            if let Err(e) = fsops::remove_dir_all_if_exists(&stage) {
                tracing::warn!(path = %stage.display(), error = %e, "Couldn't tidy up the staging folder");
            }
        }

        if let Err(e) = job.quarantine(reason.clone()) {
            tracing::warn!(job = %job.id, error = %e, "Job state not updated");
        }

        IngestOutcome::Quarantined {
            source,
            moved_to,
            reason,
        }
    }
}

/// `Heat.mkv` -> `Heat.AudioStreamX.mkv.<suffix>`; the placeholder is not
/// inserted twice.
pub fn disambiguation_name(source: &Path, has_placeholder: bool) -> String {
    let file_name = file_name_of(source);
    if has_placeholder {
        return format!("{}.{}", file_name, DISAMBIGUATION_SUFFIX);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => format!(
            "{}.{}.{}.{}",
            stem,
            AUDIO_STREAM_PLACEHOLDER,
            ext.to_string_lossy(),
            DISAMBIGUATION_SUFFIX
        ),
        None => format!("{}.{}.{}", stem, AUDIO_STREAM_PLACEHOLDER, DISAMBIGUATION_SUFFIX),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::JsonLibraryIndex;
    use crate::metadata::{FilenameMetadata, TitleRecord};
    use crate::runner::testing::{failed, ok, touch_output, ScriptedRunner};
    use crate::runner::{Invocation, ProcessOutput, RunError};
    use crate::scan::scan_folder;
    use crate::title::MediaKind;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SINGLE_AUDIO: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264",
             "codec_tag_string": "[0][0][0][0]", "pix_fmt": "yuv420p", "r_frame_rate": "25/1"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "channel_layout": "stereo"}
        ],
        "format": {"duration": "3000.0"}
    }"#;

    const TWO_AUDIO: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264",
             "codec_tag_string": "avc1", "pix_fmt": "yuv420p", "r_frame_rate": "25/1"},
            {"index": 1, "codec_type": "audio", "codec_name": "ac3", "channel_layout": "5.1"},
            {"index": 2, "codec_type": "audio", "codec_name": "aac", "channel_layout": "stereo"}
        ],
        "format": {"duration": "3000.0"}
    }"#;

    const AUDIO_ONLY: &str = r#"{
        "streams": [{"index": 0, "codec_type": "audio", "codec_name": "mp3", "channel_layout": "stereo"}],
        "format": {"duration": "180.0"}
    }"#;

    struct Fixture {
        _temp: TempDir,
        paths: Paths,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let paths = Paths::new(temp.path());
            paths.create_all().unwrap();
            let mut config = Config::default();
            config.root = temp.path().to_string_lossy().into_owned();
            Self {
                _temp: temp,
                paths,
                config,
            }
        }

        fn drop_movie(&self, name: &str) -> PathBuf {
            let path = self.paths.new_movies.join(name);
            fs::write(&path, b"source bytes").unwrap();
            path
        }

        fn drop_episode(&self, name: &str) -> PathBuf {
            let path = self.paths.new_tv.join(name);
            fs::write(&path, b"source bytes").unwrap();
            path
        }

        fn ingestor(&self, runner: Arc<ScriptedRunner>) -> Ingestor {
            self.ingestor_with(runner, Arc::new(FilenameMetadata))
        }

        fn ingestor_with(&self, runner: Arc<ScriptedRunner>, metadata: Arc<dyn MetadataProvider>) -> Ingestor {
            Ingestor::new(
                &self.config,
                self.paths.clone(),
                runner,
                metadata,
                Arc::new(JsonLibraryIndex),
            )
        }

        fn count(&self, dir: &Path) -> usize {
            fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
        }
    }

    fn is_hls(inv: &Invocation) -> bool {
        inv.args.iter().any(|a| a == "hls")
    }

    /// lsof says nobody has it open, ffprobe answers with `probe_json`,
    /// ffmpeg always succeeds and writes its output.
    fn tools(probe_json: &'static str) -> impl Fn(&Invocation) -> Result<ProcessOutput, RunError> {
        move |inv| match inv.program.as_str() {
            "lsof" => Ok(failed(1, "")),
            "ffprobe" => Ok(ok(probe_json)),
            _ => {
                touch_output(inv);
                Ok(ok(""))
            }
        }
    }

    async fn ingest_only(ingestor: &Ingestor, dir: &Path, kind: MediaKind) -> IngestOutcome {
        let candidates = scan_folder(dir, kind);
        assert_eq!(candidates.len(), 1);
        ingestor.ingest(&candidates[0]).await
    }

    #[tokio::test]
    async fn test_single_stream_file_is_promoted_with_passthrough() {
        let fx = Fixture::new();
        let source = fx.drop_movie("Heat.1995.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(SINGLE_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner.clone()), &fx.paths.new_movies, MediaKind::Movie).await;

        let destination = fx.paths.movies.join("Heat");
        assert_eq!(
            outcome,
            IngestOutcome::Promoted {
                source: source.clone(),
                destination: destination.clone()
            }
        );
        assert!(!source.exists());
        assert!(destination.join("hls.m3u8").exists());
        assert!(destination.join("stream.m3u8").exists());
        assert!(destination.join("metadata.json").exists());
        assert!(fx.paths.library_index().exists());
        assert_eq!(fx.count(&fx.paths.staging), 0);

        let encodes: Vec<Invocation> = runner.calls_to("ffmpeg").into_iter().filter(is_hls).collect();
        assert_eq!(encodes.len(), 1);
        let args = encodes[0].args.join(" ");
        assert!(args.contains("-c:v copy"));
        assert!(args.contains("-c:a copy"));
    }

    #[tokio::test]
    async fn test_two_audio_streams_without_hint_are_renamed() {
        let fx = Fixture::new();
        let source = fx.drop_movie("Heat.1995.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(TWO_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner.clone()), &fx.paths.new_movies, MediaKind::Movie).await;

        let renamed = fx.paths.new_movies.join(
            "Heat.1995.AudioStreamX.mkv.please insert correct audio stream number then remove this",
        );
        let previews = vec![
            fx.paths.new_movies.join("Heat.1995.mkv.AudioStream1 preview.mp3"),
            fx.paths.new_movies.join("Heat.1995.mkv.AudioStream2 preview.mp3"),
        ];
        assert_eq!(
            outcome,
            IngestOutcome::RenamedForDisambiguation {
                source: source.clone(),
                renamed_to: renamed.clone(),
                previews: previews.clone(),
            }
        );
        assert_eq!(fs::read(&renamed).unwrap(), b"source bytes");
        for preview in &previews {
            assert!(preview.exists());
        }
        assert_eq!(fx.count(&fx.paths.failed), 0);
        assert_eq!(fx.count(&fx.paths.staging), 0);
        assert!(runner.calls_to("ffmpeg").iter().all(|inv| !is_hls(inv)));

        // The renamed source is no longer a candidate.
        assert!(fx.ingestor(runner).scan_once().await.is_empty());
    }

    #[tokio::test]
    async fn test_hint_resolves_multiple_audio_streams() {
        let fx = Fixture::new();
        fx.drop_movie("Heat.1995.AudioStream2.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(TWO_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner.clone()), &fx.paths.new_movies, MediaKind::Movie).await;

        assert_eq!(outcome.state(), Some(JobState::Promoted));
        let encode = runner.calls_to("ffmpeg").into_iter().find(is_hls).unwrap();
        assert!(encode.args.join(" ").contains("-map 0:2"));
        assert!(encode.args.join(" ").contains("-c:v libx264"));
    }

    fn annexb_runner(fail_retry: bool) -> (Arc<ScriptedRunner>, Arc<AtomicUsize>) {
        let encodes = Arc::new(AtomicUsize::new(0));
        let counter = encodes.clone();
        let runner = Arc::new(ScriptedRunner::new(move |inv| match inv.program.as_str() {
            "lsof" => Ok(failed(1, "")),
            "ffprobe" => Ok(ok(SINGLE_AUDIO)),
            _ => {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 || fail_retry {
                    Ok(failed(
                        1,
                        "H.264 bitstream malformed, no startcode found, use the video bitstream filter 'h264_mp4toannexb' to fix it",
                    ))
                } else {
                    touch_output(inv);
                    Ok(ok(""))
                }
            }
        }));
        (runner, encodes)
    }

    #[tokio::test]
    async fn test_annexb_retry_then_promoted() {
        let fx = Fixture::new();
        let source = fx.drop_movie("Clip.2010.mp4");
        let (runner, encodes) = annexb_runner(false);

        let outcome = ingest_only(&fx.ingestor(runner.clone()), &fx.paths.new_movies, MediaKind::Movie).await;

        assert_eq!(outcome.state(), Some(JobState::Promoted));
        assert_eq!(encodes.load(Ordering::SeqCst), 2);
        let calls = runner.calls_to("ffmpeg");
        assert!(!calls[0].args.iter().any(|a| a == "-bsf:v"));
        assert!(calls[1].args.windows(2).any(|w| w[0] == "-bsf:v" && w[1] == "h264_mp4toannexb"));
        assert!(!source.exists());

        let destination = fx.paths.movies.join("Clip");
        assert!(destination.join("hls.m3u8").exists());
        assert!(destination.join("metadata.json").exists());
        let index = fs::read_to_string(fx.paths.library_index()).unwrap();
        assert!(index.contains("Clip"));
    }

    #[tokio::test]
    async fn test_annexb_retry_failure_quarantines() {
        let fx = Fixture::new();
        let source = fx.drop_movie("Clip.2010.mp4");
        let (runner, encodes) = annexb_runner(true);

        let outcome = ingest_only(&fx.ingestor(runner), &fx.paths.new_movies, MediaKind::Movie).await;

        match &outcome {
            IngestOutcome::Quarantined { moved_to, reason, .. } => {
                assert_eq!(moved_to.as_deref(), Some(fx.paths.failed.join("Clip.2010.mp4").as_path()));
                assert!(reason.contains("2 attempt"));
            }
            other => panic!("Expected Quarantined, got {:?}", other),
        }
        assert_eq!(encodes.load(Ordering::SeqCst), 2);
        assert!(!source.exists());
        assert!(!fx.paths.staging.join("Clip").exists());
        assert_eq!(fx.count(&fx.paths.staging), 0);
        assert_eq!(fx.count(&fx.paths.movies), 0);
    }

    #[tokio::test]
    async fn test_encode_timeout_quarantines() {
        let fx = Fixture::new();
        let source = fx.drop_movie("Slow.2004.mkv");
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.program.as_str() {
            "lsof" => Ok(failed(1, "")),
            "ffprobe" => Ok(ok(SINGLE_AUDIO)),
            _ => Err(RunError::TimedOut {
                program: "ffmpeg".into(),
                timeout: Duration::from_secs(1),
            }),
        }));

        let outcome = ingest_only(&fx.ingestor(runner), &fx.paths.new_movies, MediaKind::Movie).await;

        match &outcome {
            IngestOutcome::Quarantined { moved_to, .. } => {
                assert_eq!(moved_to.as_deref(), Some(fx.paths.failed.join("Slow.2004.mkv").as_path()));
            }
            other => panic!("Expected Quarantined, got {:?}", other),
        }
        assert!(!source.exists());
        assert_eq!(fx.count(&fx.paths.staging), 0);
        assert_eq!(fx.count(&fx.paths.movies), 0);
    }

    #[tokio::test]
    async fn test_file_in_use_is_left_alone() {
        let fx = Fixture::new();
        let source = fx.drop_movie("Copying.2020.mkv");
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.program.as_str() {
            "lsof" => Ok(ok("p99999\nf4\naw\nl \n")),
            _ => panic!("nothing but lsof may run for a file in use"),
        }));

        let outcomes = fx.ingestor(runner.clone()).scan_once().await;

        assert_eq!(outcomes, vec![IngestOutcome::Deferred { source: source.clone() }]);
        assert_eq!(fs::read(&source).unwrap(), b"source bytes");
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(fx.count(&fx.paths.staging), 0);
        assert_eq!(fx.count(&fx.paths.failed), 0);
    }

    #[tokio::test]
    async fn test_episode_promoted_into_season_folder() {
        let fx = Fixture::new();
        fx.drop_episode("!Tacfit - S1 Lite - E2 Warmup.mp4");
        let runner = Arc::new(ScriptedRunner::new(tools(SINGLE_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner), &fx.paths.new_tv, MediaKind::Tv).await;

        let expected = fx.paths.tv.join("Tacfit").join("Season 1").join("S01E02 Warmup");
        assert_eq!(
            outcome,
            IngestOutcome::Promoted {
                source: fx.paths.new_tv.join("!Tacfit - S1 Lite - E2 Warmup.mp4"),
                destination: expected.clone()
            }
        );
        assert!(expected.join("hls.m3u8").exists());
    }

    #[tokio::test]
    async fn test_existing_library_entry_is_not_clobbered() {
        let fx = Fixture::new();
        fs::create_dir_all(fx.paths.movies.join("Heat")).unwrap();
        fs::write(fx.paths.movies.join("Heat").join("hls.m3u8"), b"older").unwrap();
        fx.drop_movie("Heat.1995.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(SINGLE_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner), &fx.paths.new_movies, MediaKind::Movie).await;

        match outcome {
            IngestOutcome::Promoted { destination, .. } => {
                assert_eq!(destination, fx.paths.movies.join("Heat (2)"));
            }
            other => panic!("Expected Promoted, got {:?}", other),
        }
        assert_eq!(fs::read(fx.paths.movies.join("Heat").join("hls.m3u8")).unwrap(), b"older");
    }

    #[tokio::test]
    async fn test_no_video_quarantines_without_clobbering() {
        let fx = Fixture::new();
        fs::write(fx.paths.failed.join("Song.mp4"), b"earlier failure").unwrap();
        fx.drop_movie("Song.mp4");
        let runner = Arc::new(ScriptedRunner::new(tools(AUDIO_ONLY)));

        let outcome = ingest_only(&fx.ingestor(runner), &fx.paths.new_movies, MediaKind::Movie).await;

        match outcome {
            IngestOutcome::Quarantined { moved_to, reason, .. } => {
                assert_eq!(moved_to, Some(fx.paths.failed.join("Song (2).mp4")));
                assert!(reason.contains("no video stream"));
            }
            other => panic!("Expected Quarantined, got {:?}", other),
        }
        assert_eq!(fs::read(fx.paths.failed.join("Song.mp4")).unwrap(), b"earlier failure");
        assert_eq!(fx.count(&fx.paths.staging), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_quarantines() {
        let fx = Fixture::new();
        fx.drop_movie("Broken.2001.avi");
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.program.as_str() {
            "lsof" => Ok(failed(1, "")),
            _ => Ok(failed(1, "Invalid data found when processing input")),
        }));

        let outcome = ingest_only(&fx.ingestor(runner), &fx.paths.new_movies, MediaKind::Movie).await;

        assert_eq!(outcome.state(), Some(JobState::Quarantined));
        assert!(fx.paths.failed.join("Broken.2001.avi").exists());
        assert_eq!(fx.count(&fx.paths.staging), 0);
    }

    #[tokio::test]
    async fn test_unparsable_episode_quarantines() {
        let fx = Fixture::new();
        fx.drop_episode("Some Show - Pilot.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(SINGLE_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner.clone()), &fx.paths.new_tv, MediaKind::Tv).await;

        match outcome {
            IngestOutcome::Quarantined { reason, .. } => assert!(reason.contains("SxxEyy")),
            other => panic!("Expected Quarantined, got {:?}", other),
        }
        assert!(runner.calls_to("ffprobe").is_empty());
    }

    struct UnknownTitles;

    #[async_trait]
    impl MetadataProvider for UnknownTitles {
        fn name(&self) -> &'static str {
            "unknown"
        }

        async fn lookup_title(&self, _title: &ParsedTitle) -> anyhow::Result<TitleRecord> {
            anyhow::bail!("no match in catalogue")
        }

        async fn fetch_image(&self, _record: &TitleRecord) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_metadata_failure_quarantines() {
        let fx = Fixture::new();
        fx.drop_movie("Obscure.1950.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(SINGLE_AUDIO)));

        let outcome = ingest_only(
            &fx.ingestor_with(runner.clone(), Arc::new(UnknownTitles)),
            &fx.paths.new_movies,
            MediaKind::Movie,
        )
        .await;

        match outcome {
            IngestOutcome::Quarantined { reason, .. } => assert!(reason.contains("no match in catalogue")),
            other => panic!("Expected Quarantined, got {:?}", other),
        }
        assert!(runner.calls_to("ffprobe").is_empty());
        assert_eq!(fx.count(&fx.paths.staging), 0);
    }

    #[tokio::test]
    async fn test_debug_skip_hls_promotes_without_encoding() {
        let mut fx = Fixture::new();
        fx.config.debug_skip_hls = true;
        fx.drop_movie("Heat.1995.mkv");
        let runner = Arc::new(ScriptedRunner::new(tools(SINGLE_AUDIO)));

        let outcome = ingest_only(&fx.ingestor(runner.clone()), &fx.paths.new_movies, MediaKind::Movie).await;

        assert_eq!(outcome.state(), Some(JobState::Promoted));
        assert!(runner.calls_to("ffmpeg").is_empty());
        assert!(fx.paths.movies.join("Heat").join("metadata.json").exists());
    }

    #[tokio::test]
    async fn test_scan_continues_after_failure() {
        let fx = Fixture::new();
        fx.drop_movie("A.2001.mkv");
        fx.drop_movie("B.2002.mkv");
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.program.as_str() {
            "lsof" => Ok(failed(1, "")),
            "ffprobe" if inv.args.last().is_some_and(|p| p.ends_with("A.2001.mkv")) => {
                Ok(failed(1, "corrupt"))
            }
            "ffprobe" => Ok(ok(SINGLE_AUDIO)),
            _ => {
                touch_output(inv);
                Ok(ok(""))
            }
        }));

        let outcomes = fx.ingestor(runner).scan_once().await;

        let states: Vec<Option<JobState>> = outcomes.iter().map(IngestOutcome::state).collect();
        assert_eq!(states, vec![Some(JobState::Quarantined), Some(JobState::Promoted)]);
    }

    #[test]
    fn test_disambiguation_name() {
        assert_eq!(
            disambiguation_name(Path::new("/n/Heat.vob"), false),
            "Heat.AudioStreamX.vob.please insert correct audio stream number then remove this"
        );
        assert_eq!(
            disambiguation_name(Path::new("/n/Heat.AudioStreamX.vob"), true),
            "Heat.AudioStreamX.vob.please insert correct audio stream number then remove this"
        );
    }
}
