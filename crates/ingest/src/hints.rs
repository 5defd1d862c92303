//! Filename hint tokens.
//!
//! Users steer the transcode decision by embedding marker words in the file
//! name, e.g. `Heat.1995.AudioStream2.Deinterlace.mkv`. The stem is split on
//! every non-alphanumeric character and each token is compared
//! case-insensitively.

use gondola_config::RecipeConfig;
use std::path::Path;

/// Token prefix selecting an audio stream by container index.
pub const AUDIO_STREAM_PREFIX: &str = "AudioStream";
/// Placeholder inserted when a file is renamed for disambiguation.
pub const AUDIO_STREAM_PLACEHOLDER: &str = "AudioStreamX";
pub const DEINTERLACE_TOKEN: &str = "Deinterlace";

/// Everything the filename says about how to encode it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintSet {
    /// `AudioStream<N>`; the first one wins.
    pub audio_stream: Option<u32>,
    /// `AudioStreamX` was present (the user has not chosen yet).
    pub audio_placeholder: bool,
    pub deinterlace: bool,
    /// Recipes whose token is present, in configured order.
    pub recipes: Vec<RecipeConfig>,
}

impl HintSet {
    /// Tokenize a file name (or stem) in a single pass.
    pub fn parse(name: &str, recipes: &[RecipeConfig]) -> Self {
        let mut hints = HintSet::default();
        let mut matched = vec![false; recipes.len()];

        for token in name.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }

            if token.eq_ignore_ascii_case(AUDIO_STREAM_PLACEHOLDER) {
                hints.audio_placeholder = true;
            } else if let Some(index) = audio_stream_index(token) {
                hints.audio_stream.get_or_insert(index);
            } else if token.eq_ignore_ascii_case(DEINTERLACE_TOKEN) {
                hints.deinterlace = true;
            }

            for (recipe, seen) in recipes.iter().zip(matched.iter_mut()) {
                if token.eq_ignore_ascii_case(&recipe.token) {
                    *seen = true;
                }
            }
        }

        hints.recipes = recipes
            .iter()
            .zip(matched)
            .filter(|(_, seen)| *seen)
            .map(|(recipe, _)| recipe.clone())
            .collect();
        hints
    }

    /// Tokenize the stem of a path.
    pub fn from_path(path: &Path, recipes: &[RecipeConfig]) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        Self::parse(&stem, recipes)
    }

    /// The recipe that applies: the first configured one present.
    pub fn recipe(&self) -> Option<&RecipeConfig> {
        self.recipes.first()
    }

    /// True when any hint forces the video to be re-encoded.
    pub fn forces_video_encode(&self) -> bool {
        self.deinterlace || !self.recipes.is_empty()
    }
}

/// `AudioStream<digits>` -> digits.
fn audio_stream_index(token: &str) -> Option<u32> {
    let prefix_len = AUDIO_STREAM_PREFIX.len();
    if token.len() <= prefix_len || !token.is_char_boundary(prefix_len) {
        return None;
    }
    let (prefix, digits) = token.split_at(prefix_len);
    if !prefix.eq_ignore_ascii_case(AUDIO_STREAM_PREFIX) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
