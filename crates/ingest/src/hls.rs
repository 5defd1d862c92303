//! HLS converter.
//!
//! Runs ffmpeg to segment a source into HLS according to an [`EncodePlan`],
//! extracts a text subtitle track when the plan asks for one, and writes
//! the master playlist. Also renders the short audio previews used when a
//! file needs its audio stream chosen by hand.

use crate::decide::{AudioPreview, EncodePlan};
use crate::fsops::{self, FsError};
use crate::playlist::{
    master_playlist, subtitles_playlist, MASTER_PLAYLIST, SEGMENT_PATTERN, STREAM_PLAYLIST,
    SUBTITLES_PLAYLIST, SUBTITLES_VTT,
};
use crate::runner::{Invocation, ProcessOutput, ProcessRunner, RunError};
use gondola_config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Token ffmpeg prints when an mp4-style h264 stream needs converting to
/// Annex B before it can go into MPEG-TS.
pub const ANNEXB_TOKEN: &str = "h264_mp4toannexb";

/// Segment length handed to ffmpeg, in seconds.
const SEGMENT_SECS: u32 = 10;

/// Preview clips are mono and small, they only need to identify the track.
const PREVIEW_BITRATE: &str = "96k";

/// Lines of encoder output kept in errors.
const OUTPUT_TAIL_LINES: usize = 30;

/// Error type for conversion operations
#[derive(Debug, Error)]
pub enum ConversionError {
    /// ffmpeg ran but failed
    #[error("ffmpeg failed after {attempts} attempt(s) (exit code {exit_code:?}): {output_tail}")]
    Encoder {
        attempts: u32,
        exit_code: Option<i32>,
        output_tail: String,
    },

    /// ffmpeg could not be started or timed out
    #[error(transparent)]
    Run(#[from] RunError),

    /// Output directory could not be prepared or written
    #[error(transparent)]
    Io(#[from] FsError),
}

/// Files produced by a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistPaths {
    pub master: PathBuf,
    pub stream: PathBuf,
    /// Set only when subtitle extraction succeeded.
    pub subtitles: Option<PathBuf>,
}

/// Build the main ffmpeg argument list.
///
/// # Arguments
/// * `source` - Input media file
/// * `plan` - Stream selection and codec arguments
/// * `output_dir` - Directory receiving the media playlist and segments
/// * `annexb` - Append `-bsf:v h264_mp4toannexb` (the retry)
///
/// # Returns
/// Arguments for ffmpeg, not including the program itself
pub fn build_hls_args(source: &Path, plan: &EncodePlan, output_dir: &Path, annexb: bool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-map".into(),
        format!("0:{}", plan.video_stream_index),
        "-map".into(),
        format!("0:{}", plan.audio_stream_index),
    ];

    args.extend(plan.audio_args.iter().cloned());

    if plan.is_video_passthrough() {
        args.extend(["-c:v".to_string(), "copy".to_string()]);
    } else {
        args.extend(plan.video_args.iter().cloned());
    }
    if annexb {
        args.extend(["-bsf:v".to_string(), ANNEXB_TOKEN.to_string()]);
    }

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        SEGMENT_SECS.to_string(),
        "-hls_list_size".to_string(),
        "0".to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_segment_filename".to_string(),
        output_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
        output_dir.join(STREAM_PLAYLIST).to_string_lossy().into_owned(),
    ]);
    args
}

/// Build the subtitle extraction argument list.
pub fn build_subtitle_args(source: &Path, stream_index: u32, output_dir: &Path) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-map".into(),
        format!("0:{}", stream_index),
        "-c:s".into(),
        "webvtt".into(),
        output_dir.join(SUBTITLES_VTT).to_string_lossy().into_owned(),
    ]
}

/// Build the argument list for one audio preview clip.
pub fn build_preview_args(source: &Path, preview: &AudioPreview) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-y".into(),
        "-ss".into(),
        preview.start_secs.to_string(),
        "-t".into(),
        preview.length_secs.to_string(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-map".into(),
        format!("0:{}", preview.stream_index),
        "-ac".into(),
        "1".into(),
        "-b:a".into(),
        PREVIEW_BITRATE.into(),
        preview.output_path.to_string_lossy().into_owned(),
    ]
}

/// Drives ffmpeg through a [`ProcessRunner`].
pub struct HlsConverter {
    runner: Arc<dyn ProcessRunner>,
    ffmpeg: String,
    niceness: Option<i32>,
    encode_timeout: Duration,
    short_timeout: Duration,
}

impl HlsConverter {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &Config) -> Self {
        Self {
            runner,
            ffmpeg: config.tools.ffmpeg.clone(),
            niceness: config.tools.niceness,
            encode_timeout: Duration::from_secs(config.timeouts.encode_secs),
            short_timeout: Duration::from_secs(config.timeouts.probe_secs),
        }
    }

    /// Convert a source to HLS inside `output_dir`.
    ///
    /// Retries the encode exactly once with the Annex B bitstream filter
    /// when the first attempt fails and mentions it; the partial playlist
    /// and segments are removed before the retry, anything else already in
    /// `output_dir` is kept. Subtitle extraction failures are logged
    /// and leave the output without subtitle references.
    pub async fn convert(
        &self,
        source: &Path,
        plan: &EncodePlan,
        output_dir: &Path,
    ) -> Result<PlaylistPaths, ConversionError> {
        fsops::ensure_dir(output_dir)?;

        tracing::info!(
            source = %source.display(),
            passthrough = plan.is_video_passthrough(),
            audio = ?plan.audio_args,
            video = ?plan.video_args,
            "Converting to HLS"
        );

        let first = self.encode(source, plan, output_dir, false).await?;
        if !first.success {
            if !first.combined.contains(ANNEXB_TOKEN) {
                return Err(encoder_error(1, &first));
            }

            tracing::warn!(
                source = %source.display(),
                "Encode failed, retrying with {}", ANNEXB_TOKEN
            );
            remove_encoder_output(output_dir)?;
            let second = self.encode(source, plan, output_dir, true).await?;
            if !second.success {
                return Err(encoder_error(2, &second));
            }
        }

        let subtitles = match plan.subtitle_stream {
            Some(index) => self.extract_subtitles(source, index, plan.duration_secs, output_dir).await?,
            None => None,
        };

        let master = output_dir.join(MASTER_PLAYLIST);
        fsops::write_file(
            &master,
            master_playlist(plan.frame_rate, subtitles.is_some()).as_bytes(),
        )?;

        tracing::info!(source = %source.display(), output = %output_dir.display(), "HLS conversion complete");
        Ok(PlaylistPaths {
            master,
            stream: output_dir.join(STREAM_PLAYLIST),
            subtitles,
        })
    }

    async fn encode(
        &self,
        source: &Path,
        plan: &EncodePlan,
        output_dir: &Path,
        annexb: bool,
    ) -> Result<ProcessOutput, RunError> {
        let invocation = Invocation::new(&self.ffmpeg)
            .args(build_hls_args(source, plan, output_dir, annexb))
            .niceness(self.niceness)
            .timeout(self.encode_timeout);
        let output = self.runner.run(&invocation).await?;
        if !output.success {
            tracing::warn!(
                source = %source.display(),
                exit_code = ?output.exit_code,
                annexb,
                "ffmpeg attempt failed:\n{}",
                output.tail(OUTPUT_TAIL_LINES)
            );
        }
        Ok(output)
    }

    /// Returns the subtitle playlist path, or None when extraction failed.
    async fn extract_subtitles(
        &self,
        source: &Path,
        stream_index: u32,
        duration_secs: f64,
        output_dir: &Path,
    ) -> Result<Option<PathBuf>, ConversionError> {
        let invocation = Invocation::new(&self.ffmpeg)
            .args(build_subtitle_args(source, stream_index, output_dir))
            .niceness(self.niceness)
            .timeout(self.encode_timeout);

        let failure = match self.runner.run(&invocation).await {
            Ok(output) if output.success => None,
            Ok(output) => Some(output.tail(OUTPUT_TAIL_LINES)),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            tracing::warn!(
                source = %source.display(),
                stream = stream_index,
                "Subtitle extraction failed, continuing without subtitles: {}",
                reason
            );
            fsops::remove_file_if_exists(&output_dir.join(SUBTITLES_VTT))?;
            return Ok(None);
        }

        let playlist = output_dir.join(SUBTITLES_PLAYLIST);
        fsops::write_file(&playlist, subtitles_playlist(duration_secs).as_bytes())?;
        Ok(Some(playlist))
    }

    /// Render one audio preview clip next to the source.
    pub async fn render_preview(&self, source: &Path, preview: &AudioPreview) -> Result<(), ConversionError> {
        let invocation = Invocation::new(&self.ffmpeg)
            .args(build_preview_args(source, preview))
            .niceness(self.niceness)
            .timeout(self.short_timeout);
        let output = self.runner.run(&invocation).await?;
        if output.success {
            Ok(())
        } else {
            Err(encoder_error(1, &output))
        }
    }
}

/// Remove what a failed encode left behind: the media playlist and its
/// segments. Other files in the folder (metadata, artwork) stay.
fn remove_encoder_output(output_dir: &Path) -> Result<(), FsError> {
    fsops::remove_file_if_exists(&output_dir.join(STREAM_PLAYLIST))?;

    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(FsError::Remove {
                path: output_dir.to_path_buf(),
                source,
            })
        }
    };
    let prefix = SEGMENT_PATTERN.split('%').next().unwrap_or(SEGMENT_PATTERN);
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".ts") {
            fsops::remove_file_if_exists(&entry.path())?;
        }
    }
    Ok(())
}

fn encoder_error(attempts: u32, output: &ProcessOutput) -> ConversionError {
    ConversionError::Encoder {
        attempts,
        exit_code: output.exit_code,
        output_tail: output.tail(OUTPUT_TAIL_LINES),
    }
}
