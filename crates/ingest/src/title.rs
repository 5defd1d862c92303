//! Title parsing from file names.
//!
//! Movies are expected as `Big.Buck.Bunny.2008.whatever.mkv`; everything
//! before the first four-digit run is the title. Episodes are expected as
//! `Show.Name.S01E02.whatever.mkv`, or in the hand-made form
//! `!Series - S1 Season Name - E1 Episode Name.mkv` for material that has
//! no catalogue entry.

use crate::fsops::sanitise_for_filesystem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").expect("valid year pattern"));
static EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(.*)S(\d+)E(\d+)").expect("valid episode pattern"));
static CUSTOM_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)!(.*?) - S(\d+)(.*?) - E(\d+)(.*)").expect("valid custom episode pattern")
});

/// Which watched folder a file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Movie => write!(f, "movie"),
            MediaKind::Tv => write!(f, "tv"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TitleError {
    #[error("couldn't find SxxEyy in '{0}'")]
    NoEpisodeMarker(String),

    #[error("couldn't parse '{0}', expected something like '!My Series - S10 Season X - E01 My Episode.mp4'")]
    MalformedCustomEpisode(String),
}

/// What a file name says the file is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParsedTitle {
    Movie {
        title: String,
        year: Option<u32>,
    },
    Episode {
        show: String,
        season: u32,
        episode: u32,
        season_name: Option<String>,
        episode_name: Option<String>,
    },
}

impl ParsedTitle {
    pub fn kind(&self) -> MediaKind {
        match self {
            ParsedTitle::Movie { .. } => MediaKind::Movie,
            ParsedTitle::Episode { .. } => MediaKind::Tv,
        }
    }

    /// Short human-readable name, also used for the staging folder.
    pub fn display_name(&self) -> String {
        match self {
            ParsedTitle::Movie { title, .. } => title.clone(),
            ParsedTitle::Episode {
                show, season, episode, ..
            } => format!("{} {}", show, episode_code(*season, *episode)),
        }
    }

    /// Destination relative to the library root for this kind
    /// (`Movies/` or `TV/`).
    ///
    /// Movies land in `<title>`, episodes in
    /// `<show>/Season <n>/SxxEyy[ <episode name>]`. Every component is
    /// sanitised.
    pub fn library_relative_path(&self) -> PathBuf {
        match self {
            ParsedTitle::Movie { title, .. } => PathBuf::from(sanitise_for_filesystem(title)),
            ParsedTitle::Episode {
                show,
                season,
                episode,
                episode_name,
                ..
            } => {
                let mut folder = episode_code(*season, *episode);
                if let Some(name) = episode_name.as_deref().filter(|n| !n.is_empty()) {
                    folder.push(' ');
                    folder.push_str(name);
                }
                PathBuf::from(sanitise_for_filesystem(show))
                    .join(format!("Season {}", season))
                    .join(sanitise_for_filesystem(&folder))
            }
        }
    }
}

/// `S01E02`
pub fn episode_code(season: u32, episode: u32) -> String {
    format!("S{:02}E{:02}", season, episode)
}

/// Parse a file name according to the folder it was found in.
pub fn parse_title(file_name: &str, kind: MediaKind) -> Result<ParsedTitle, TitleError> {
    match kind {
        MediaKind::Movie => Ok(parse_movie(file_name)),
        MediaKind::Tv => parse_episode(file_name),
    }
}

/// Best case `Some.Movie.2016.blah.mkv` becomes ("Some Movie", 2016). Without
/// a year the whole stem is the title.
pub fn parse_movie(file_name: &str) -> ParsedTitle {
    let stem = strip_extension(file_name);

    if let Some(found) = YEAR.find(file_name) {
        let title = tidy(&file_name[..found.start()]);
        if !title.is_empty() {
            return ParsedTitle::Movie {
                title,
                year: found.as_str().parse().ok(),
            };
        }
    }

    ParsedTitle::Movie {
        title: tidy(stem),
        year: None,
    }
}

/// Parse `Show.S01E02.mkv` or `!Series - S1 Name - E1 Name.mkv`.
pub fn parse_episode(file_name: &str) -> Result<ParsedTitle, TitleError> {
    let stem = strip_extension(file_name);

    if stem.starts_with('!') {
        let caps = CUSTOM_EPISODE
            .captures(stem)
            .ok_or_else(|| TitleError::MalformedCustomEpisode(file_name.to_string()))?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let text = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let (Some(season), Some(episode), Some(show)) = (number(2), number(4), text(1)) else {
            return Err(TitleError::MalformedCustomEpisode(file_name.to_string()));
        };
        return Ok(ParsedTitle::Episode {
            show,
            season,
            episode,
            season_name: text(3),
            episode_name: text(5),
        });
    }

    let caps = EPISODE
        .captures(file_name)
        .ok_or_else(|| TitleError::NoEpisodeMarker(file_name.to_string()))?;
    let show = caps.get(1).map(|m| tidy(m.as_str())).unwrap_or_default();
    let season = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
    let episode = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());
    match (season, episode) {
        (Some(season), Some(episode)) if !show.is_empty() => Ok(ParsedTitle::Episode {
            show,
            season,
            episode,
            season_name: None,
            episode_name: None,
        }),
        _ => Err(TitleError::NoEpisodeMarker(file_name.to_string())),
    }
}

fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    }
}

/// Dots become spaces; separators left hanging at either end are dropped.
fn tidy(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '(' || c == '[')
        .to_string()
}
