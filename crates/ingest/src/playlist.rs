//! Playlist writers for the converted output.
//!
//! ffmpeg writes the media playlist (`stream.m3u8`) and its segments itself.
//! The master playlist that players open, and the single-entry subtitle
//! playlist, are generated here.

/// Master playlist, the entry point players open.
pub const MASTER_PLAYLIST: &str = "hls.m3u8";
/// Media playlist written by ffmpeg.
pub const STREAM_PLAYLIST: &str = "stream.m3u8";
/// Segment file pattern handed to ffmpeg.
pub const SEGMENT_PATTERN: &str = "segment%05d.ts";
pub const SUBTITLES_VTT: &str = "subtitles.vtt";
pub const SUBTITLES_PLAYLIST: &str = "subtitles.m3u8";

/// Advertised bandwidth. There is a single variant so players only use it
/// for their initial buffer estimate.
pub const NOMINAL_BANDWIDTH: u64 = 2_500_000;

const SUBTITLE_GROUP: &str = "subs";

/// Generate master playlist content.
///
/// Deterministic: the same frame rate and subtitle flag always give the
/// same bytes.
pub fn master_playlist(frame_rate: f64, with_subtitles: bool) -> String {
    let mut output = String::new();

    output.push_str("#EXTM3U\n");
    output.push_str("#EXT-X-VERSION:3\n");

    if with_subtitles {
        output.push_str(&format!(
            "#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"{}\",NAME=\"Subtitles\",LANGUAGE=\"und\",DEFAULT=NO,AUTOSELECT=YES,FORCED=NO,URI=\"{}\"\n",
            SUBTITLE_GROUP, SUBTITLES_PLAYLIST
        ));
    }

    output.push_str(&format!(
        "#EXT-X-STREAM-INF:BANDWIDTH={},FRAME-RATE={:.3}",
        NOMINAL_BANDWIDTH, frame_rate
    ));
    if with_subtitles {
        output.push_str(&format!(",SUBTITLES=\"{}\"", SUBTITLE_GROUP));
    }
    output.push('\n');
    output.push_str(STREAM_PLAYLIST);
    output.push('\n');

    output
}

/// A VOD playlist holding the whole WebVTT file as one segment.
pub fn subtitles_playlist(duration_secs: f64) -> String {
    let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
        duration_secs
    } else {
        0.0
    };

    let mut output = String::new();
    output.push_str("#EXTM3U\n");
    output.push_str("#EXT-X-VERSION:3\n");
    output.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", duration.ceil() as u64));
    output.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    output.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    output.push_str(&format!("#EXTINF:{:.3},\n", duration));
    output.push_str(SUBTITLES_VTT);
    output.push('\n');
    output.push_str("#EXT-X-ENDLIST\n");
    output
}
