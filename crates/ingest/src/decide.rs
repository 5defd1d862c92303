//! Transcode decision engine.
//!
//! Given a probe result and the filename hints, works out how to turn the
//! source into HLS: which streams to map, whether video can be copied as-is,
//! how to bring the audio down to stereo AAC, and whether a subtitle track
//! should be extracted. When a multi-audio file carries no usable hint the
//! engine asks for human help instead, by describing one preview clip per
//! audio stream.
//!
//! Everything here is pure: no processes are run and no files are touched.

use crate::hints::HintSet;
use crate::probe::{ProbeResult, StreamDescriptor};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Frame rate assumed when the probe reports nothing usable.
pub const DEFAULT_FRAME_RATE: f64 = 25.0;

/// Target AAC bitrate.
pub const AUDIO_BITRATE: &str = "192k";

/// Length of each audio preview clip, in seconds.
pub const PREVIEW_LENGTH_SECS: u32 = 60;

/// Sources longer than this get previews starting one minute in, past
/// studio logos and silence.
const PREVIEW_OFFSET_THRESHOLD_SECS: f64 = 120.0;
const PREVIEW_OFFSET_SECS: u32 = 60;

/// Pixel formats every HLS client can decode.
const PLAYABLE_PIXEL_FORMATS: &[&str] = &["yuv420p", "yuvj420p"];

/// Subtitle codecs ffmpeg can convert to WebVTT. Bitmap formats (PGS,
/// VobSub, DVB) need OCR and are skipped.
const TEXT_SUBTITLE_CODECS: &[&str] = &["subrip", "ass", "ssa", "mov_text", "webvtt", "text"];

const PAN_5_1: &str = "pan=stereo|FL<FL+BL+FC+LFE|FR<FR+BR+FC+LFE";
const PAN_5_1_SIDE: &str = "pan=stereo|FL<FL+SL+FC+LFE|FR<FR+SR+FC+LFE";

/// Hard reasons a file cannot be converted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("no video stream")]
    NoVideoStream,

    #[error("no audio stream")]
    NoAudioStream,

    #[error("filename asks for audio stream {requested} but the audio streams are {available:?}")]
    UnresolvableAudioHint { requested: u32, available: Vec<u32> },
}

/// A short audio-only clip the user listens to before choosing a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPreview {
    pub stream_index: u32,
    pub output_path: PathBuf,
    pub start_secs: u32,
    pub length_secs: u32,
}

/// Everything the HLS converter needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub video_stream_index: u32,
    pub audio_stream_index: u32,
    /// Empty means copy the video stream untouched.
    pub video_args: Vec<String>,
    pub audio_args: Vec<String>,
    /// Text subtitle stream to extract as WebVTT.
    pub subtitle_stream: Option<u32>,
    pub frame_rate: f64,
    /// Container duration, for the subtitle playlist.
    pub duration_secs: f64,
}

impl EncodePlan {
    pub fn is_video_passthrough(&self) -> bool {
        self.video_args.is_empty()
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Encode(EncodePlan),
    /// Several audio streams and no way to pick one.
    Disambiguate(Vec<AudioPreview>),
}

/// Decide how to convert a probed file.
///
/// # Arguments
///
/// * `probe` - Streams and duration of the source
/// * `hints` - Tokens parsed from the source's file name
/// * `source` - Source path, used to name preview clips
///
/// # Returns
///
/// * `Ok(Decision::Encode)` with a complete plan
/// * `Ok(Decision::Disambiguate)` when the user must pick an audio stream
/// * `Err(DecisionError)` when the file can never be converted
pub fn decide(probe: &ProbeResult, hints: &HintSet, source: &Path) -> Result<Decision, DecisionError> {
    let video = probe.video_streams().next().ok_or(DecisionError::NoVideoStream)?;

    let audio_streams: Vec<&StreamDescriptor> = probe.audio_streams().collect();
    let audio = match audio_streams.as_slice() {
        [] => return Err(DecisionError::NoAudioStream),
        [only] => *only,
        many => match hints.audio_stream {
            Some(requested) => many
                .iter()
                .find(|s| s.index == requested)
                .copied()
                .ok_or_else(|| DecisionError::UnresolvableAudioHint {
                    requested,
                    available: many.iter().map(|s| s.index).collect(),
                })?,
            None => {
                let start = preview_start_secs(probe.duration_secs);
                return Ok(Decision::Disambiguate(
                    many.iter()
                        .map(|s| AudioPreview {
                            stream_index: s.index,
                            output_path: preview_path(source, s.index),
                            start_secs: start,
                            length_secs: PREVIEW_LENGTH_SECS,
                        })
                        .collect(),
                ));
            }
        },
    };

    Ok(Decision::Encode(EncodePlan {
        video_stream_index: video.index,
        audio_stream_index: audio.index,
        video_args: video_args(video, hints),
        audio_args: audio_args(audio),
        subtitle_stream: select_subtitle(probe),
        frame_rate: video
            .frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(DEFAULT_FRAME_RATE),
        duration_secs: probe.duration_secs,
    }))
}

/// Audio arguments for bringing a stream to stereo AAC.
pub fn audio_args(stream: &StreamDescriptor) -> Vec<String> {
    let layout = stream
        .channel_layout
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    let aac = ["-c:a", "aac", "-b:a", AUDIO_BITRATE];

    let args: Vec<&str> = match layout.as_str() {
        "stereo" if stream.codec_name.eq_ignore_ascii_case("aac") => vec!["-c:a", "copy"],
        "stereo" => aac.to_vec(),
        "5.1" => [&aac[..], &["-af", PAN_5_1][..]].concat(),
        "5.1(side)" => [&aac[..], &["-af", PAN_5_1_SIDE][..]].concat(),
        other => {
            tracing::warn!(
                layout = other,
                stream = stream.index,
                "Unrecognised channel layout, letting ffmpeg downmix to stereo"
            );
            [&aac[..], &["-ac", "2"][..]].concat()
        }
    };
    args.into_iter().map(String::from).collect()
}

/// Video arguments; empty means passthrough.
pub fn video_args(stream: &StreamDescriptor, hints: &HintSet) -> Vec<String> {
    let playable_pixels = stream
        .pixel_format
        .as_deref()
        .map_or(true, |p| PLAYABLE_PIXEL_FORMATS.contains(&p));

    // avc1-tagged h264 (mp4 style) does not seek once segmented, so it is re-encoded.
    let passthrough = stream.codec_name == "h264"
        && stream.codec_tag_string != "avc1"
        && playable_pixels
        && !hints.forces_video_encode();
    if passthrough {
        return Vec::new();
    }

    if hints.recipes.len() > 1 {
        tracing::warn!(
            recipes = ?hints.recipes.iter().map(|r| r.token.as_str()).collect::<Vec<_>>(),
            "Several recipes in file name, only the first applies"
        );
    }

    let mut filters: Vec<&str> = Vec::new();
    if hints.deinterlace {
        filters.push("yadif");
    }
    if let Some(recipe) = hints.recipe() {
        filters.push(&recipe.filter);
    }
    if !playable_pixels {
        filters.push("format=yuv420p");
    }

    let mut args: Vec<String> = ["-c:v", "libx264", "-preset", "medium", "-crf", "20"]
        .into_iter()
        .map(String::from)
        .collect();
    if !filters.is_empty() {
        args.push("-vf".to_string());
        args.push(filters.join(","));
    }
    args
}

/// First text subtitle stream, if any.
fn select_subtitle(probe: &ProbeResult) -> Option<u32> {
    let mut selected = None;
    for stream in probe.subtitle_streams() {
        if TEXT_SUBTITLE_CODECS.contains(&stream.codec_name.as_str()) {
            selected = Some(stream.index);
            break;
        }
        tracing::info!(
            stream = stream.index,
            codec = %stream.codec_name,
            "Skipping bitmap subtitle stream"
        );
    }
    selected
}

/// Parse an ffprobe frame rate (`"24000/1001"` or `"25"`).
///
/// Anything unparsable, non-positive or with a zero denominator yields
/// [`DEFAULT_FRAME_RATE`].
pub fn parse_frame_rate(raw: &str) -> f64 {
    let raw = raw.trim();
    let rate = match raw.split_once('/') {
        Some((num, den)) => match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(num), Ok(den)) if den != 0.0 => num / den,
            _ => return DEFAULT_FRAME_RATE,
        },
        None => raw.parse::<f64>().unwrap_or(DEFAULT_FRAME_RATE),
    };

    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        DEFAULT_FRAME_RATE
    }
}

/// Where previews start for a source of the given duration.
pub fn preview_start_secs(duration_secs: f64) -> u32 {
    if duration_secs > PREVIEW_OFFSET_THRESHOLD_SECS {
        PREVIEW_OFFSET_SECS
    } else {
        0
    }
}

/// `<source>.AudioStream<N> preview.mp3`, next to the source.
pub fn preview_path(source: &Path, stream_index: u32) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(format!(".AudioStream{} preview.mp3", stream_index));
    PathBuf::from(name)
}
