//! Stream probing via ffprobe.
//!
//! This module runs ffprobe against a media file and turns its JSON report
//! into a [`ProbeResult`]: the ordered list of streams plus the container
//! duration. Files with no audio or no video are valid probe results; it is
//! the decision engine that rejects them.

use crate::runner::{Invocation, ProcessRunner, RunError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe could not be run or timed out.
    #[error(transparent)]
    Run(#[from] RunError),

    /// ffprobe exited unsuccessfully.
    #[error("ffprobe exited with {exit_code:?}: {output}")]
    Failed {
        exit_code: Option<i32>,
        output: String,
    },

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    Parse(String),
}

/// Broad category of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

impl StreamKind {
    fn from_codec_type(codec_type: &str) -> Self {
        match codec_type {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "subtitle" => Self::Subtitle,
            _ => Self::Other,
        }
    }
}

/// One stream as reported by ffprobe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Container-level stream index (what `-map 0:<index>` refers to).
    pub index: u32,
    pub kind: StreamKind,
    /// Codec name (e.g., "h264", "aac", "subrip").
    pub codec_name: String,
    /// Codec tag string (e.g., "avc1", "[0][0][0][0]").
    pub codec_tag_string: String,
    /// Channel layout, audio only (e.g., "stereo", "5.1(side)").
    pub channel_layout: Option<String>,
    /// Pixel format, video only (e.g., "yuv420p").
    pub pixel_format: Option<String>,
    /// Frame rate as the raw rational string (e.g., "24000/1001").
    pub frame_rate: Option<String>,
}

/// Result of probing a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Streams in container order.
    pub streams: Vec<StreamDescriptor>,
    /// Container duration in seconds, 0.0 when unknown.
    pub duration_secs: f64,
}

impl ProbeResult {
    pub fn video_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.of_kind(StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.of_kind(StreamKind::Audio)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.of_kind(StreamKind::Subtitle)
    }

    pub fn has_subtitles(&self) -> bool {
        self.subtitle_streams().next().is_some()
    }

    fn of_kind(&self, kind: StreamKind) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: Option<u32>,
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub codec_tag_string: Option<String>,
        pub channel_layout: Option<String>,
        pub pix_fmt: Option<String>,
        pub r_frame_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Parses ffprobe JSON output into a ProbeResult.
///
/// Streams without an explicit index take their position in the array.
/// A missing `format` section is tolerated and yields a zero duration.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let streams = ffprobe
        .streams
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(position, stream)| {
            let kind = StreamKind::from_codec_type(stream.codec_type.as_deref().unwrap_or(""));
            let frame_rate = match kind {
                StreamKind::Video => stream
                    .r_frame_rate
                    .filter(|r| r != "0/0")
                    .or(stream.avg_frame_rate),
                _ => None,
            };
            StreamDescriptor {
                index: stream.index.unwrap_or(position as u32),
                kind,
                codec_name: stream.codec_name.unwrap_or_default(),
                codec_tag_string: stream.codec_tag_string.unwrap_or_default(),
                channel_layout: match kind {
                    StreamKind::Audio => stream.channel_layout,
                    _ => None,
                },
                pixel_format: match kind {
                    StreamKind::Video => stream.pix_fmt,
                    _ => None,
                },
                frame_rate,
            }
        })
        .collect();

    let duration_secs = ffprobe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(ProbeResult {
        streams,
        duration_secs,
    })
}

/// Runs ffprobe through a [`ProcessRunner`].
pub struct StreamProber {
    runner: Arc<dyn ProcessRunner>,
    ffprobe: String,
    timeout: Duration,
}

impl StreamProber {
    pub fn new(runner: Arc<dyn ProcessRunner>, ffprobe: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    /// Build the ffprobe invocation for a file.
    pub fn invocation(&self, path: &Path) -> Invocation {
        Invocation::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
    }

    /// Probes a media file. Never retries.
    pub async fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
        let output = self.runner.run(&self.invocation(path)).await?;

        if !output.success {
            return Err(ProbeError::Failed {
                exit_code: output.exit_code,
                output: output.tail(20),
            });
        }

        let result = parse_ffprobe_output(&output.stdout)?;
        tracing::debug!(
            path = %path.display(),
            streams = result.streams.len(),
            duration_secs = result.duration_secs,
            "Probed"
        );
        Ok(result)
    }
}
