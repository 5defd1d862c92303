//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but is unusable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// External tool locations and invocation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_lsof")]
    pub lsof: String,
    /// Run lsof through `sudo -n` so handles owned by other users are visible
    #[serde(default)]
    pub lsof_via_sudo: bool,
    /// `nice` increment applied to encoder invocations (None disables the wrapper)
    #[serde(default = "default_niceness")]
    pub niceness: Option<i32>,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_lsof() -> String {
    "lsof".to_string()
}

fn default_niceness() -> Option<i32> {
    Some(10)
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            lsof: default_lsof(),
            lsof_via_sudo: false,
            niceness: default_niceness(),
        }
    }
}

/// Upper bounds for external process invocations, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_encode_secs")]
    pub encode_secs: u64,
    #[serde(default = "default_lsof_secs")]
    pub lsof_secs: u64,
}

fn default_probe_secs() -> u64 {
    120
}

fn default_encode_secs() -> u64 {
    6 * 60 * 60
}

fn default_lsof_secs() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            encode_secs: default_encode_secs(),
            lsof_secs: default_lsof_secs(),
        }
    }
}

/// Folder watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Delay after a change notification before the caller acts on it
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

fn default_settle_millis() -> u64 {
    1000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle_millis: default_settle_millis(),
        }
    }
}

/// How the exclusivity gate decides whether a file is still being written
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExclusivityMode {
    /// Ask lsof who has the file open
    #[default]
    Lsof,
    /// Always report available. For platforms where lsof cannot tell our
    /// own handle from someone else's.
    FailOpen,
}

impl std::str::FromStr for ExclusivityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lsof" => Ok(ExclusivityMode::Lsof),
            "fail_open" | "fail-open" => Ok(ExclusivityMode::FailOpen),
            other => Err(format!("unknown exclusivity mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExclusivityConfig {
    #[serde(default)]
    pub mode: ExclusivityMode,
}

/// A fixed crop/scale transformation selected by a filename token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeConfig {
    /// Marker token looked for in the source filename (case-insensitive)
    pub token: String,
    /// Literal ffmpeg filter-graph fragment
    pub filter: String,
}

impl RecipeConfig {
    pub fn new(token: &str, filter: &str) -> Self {
        Self {
            token: token.to_string(),
            filter: filter.to_string(),
        }
    }
}

/// The built-in recipe list, in priority order
pub fn default_recipes() -> Vec<RecipeConfig> {
    vec![
        // 16:9 picture letterboxed inside a 4:3 frame
        RecipeConfig::new("CropLetterbox", "crop=iw:iw*9/16"),
        // 4:3 picture pillarboxed inside a 16:9 frame
        RecipeConfig::new("Crop4x3", "crop=ih*4/3:ih"),
        // Anamorphic SD that should display as 16:9
        RecipeConfig::new("Widescreen", "scale=ih*16/9:ih,setsar=1"),
        RecipeConfig::new("Scale720", "scale=-2:720"),
    ]
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Root folder holding New/, Staging/, Movies/, TV/ and Failed/
    #[serde(default)]
    pub root: String,
    /// Skip the encoder entirely. Debugging aid.
    #[serde(default)]
    pub debug_skip_hls: bool,
    /// Append-only operational log
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub exclusivity: ExclusivityConfig,
    #[serde(default = "default_recipes")]
    pub recipes: Vec<RecipeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: String::new(),
            debug_skip_hls: false,
            log_file: None,
            tools: ToolsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            watch: WatchConfig::default(),
            exclusivity: ExclusivityConfig::default(),
            recipes: default_recipes(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - GONDOLA_ROOT -> root
    /// - GONDOLA_DEBUG_SKIP_HLS -> debug_skip_hls
    /// - GONDOLA_FFMPEG / GONDOLA_FFPROBE / GONDOLA_LSOF -> tools.*
    /// - GONDOLA_EXCLUSIVITY_MODE -> exclusivity.mode
    /// - GONDOLA_ENCODE_TIMEOUT_SECS -> timeouts.encode_secs
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("GONDOLA_ROOT") {
            self.root = val;
        }

        if let Ok(val) = env::var("GONDOLA_DEBUG_SKIP_HLS") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.debug_skip_hls = true,
                "false" | "0" | "no" => self.debug_skip_hls = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("GONDOLA_FFMPEG") {
            self.tools.ffmpeg = val;
        }

        if let Ok(val) = env::var("GONDOLA_FFPROBE") {
            self.tools.ffprobe = val;
        }

        if let Ok(val) = env::var("GONDOLA_LSOF") {
            self.tools.lsof = val;
        }

        if let Ok(val) = env::var("GONDOLA_EXCLUSIVITY_MODE") {
            if let Ok(mode) = val.parse::<ExclusivityMode>() {
                self.exclusivity.mode = mode;
            }
        }

        if let Ok(val) = env::var("GONDOLA_ENCODE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.timeouts.encode_secs = secs;
            }
        }
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "'root' is missing. It should point to the folder where your media is stored."
                    .to_string(),
            ));
        }
        if self.recipes.iter().any(|r| r.token.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "every recipe needs a non-empty token".to_string(),
            ));
        }
        Ok(())
    }

    /// The root folder with a leading `~` expanded to the home directory
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.root).into_owned())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("GONDOLA_ROOT");
        env::remove_var("GONDOLA_DEBUG_SKIP_HLS");
        env::remove_var("GONDOLA_FFMPEG");
        env::remove_var("GONDOLA_FFPROBE");
        env::remove_var("GONDOLA_LSOF");
        env::remove_var("GONDOLA_EXCLUSIVITY_MODE");
        env::remove_var("GONDOLA_ENCODE_TIMEOUT_SECS");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            root in "[a-zA-Z0-9_/]{1,30}",
            skip in proptest::bool::ANY,
            probe_secs in 1u64..10_000,
            encode_secs in 1u64..100_000,
            settle in 0u64..10_000,
            via_sudo in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
root = "{}"
debug_skip_hls = {}

[tools]
lsof_via_sudo = {}

[timeouts]
probe_secs = {}
encode_secs = {}

[watch]
settle_millis = {}

[exclusivity]
mode = "fail_open"
"#,
                root, skip, via_sudo, probe_secs, encode_secs, settle
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.root, &root);
            prop_assert_eq!(config.debug_skip_hls, skip);
            prop_assert_eq!(config.tools.lsof_via_sudo, via_sudo);
            prop_assert_eq!(config.timeouts.probe_secs, probe_secs);
            prop_assert_eq!(config.timeouts.encode_secs, encode_secs);
            prop_assert_eq!(config.timeouts.lsof_secs, 30);
            prop_assert_eq!(config.watch.settle_millis, settle);
            prop_assert_eq!(config.exclusivity.mode, ExclusivityMode::FailOpen);
            prop_assert_eq!(config.recipes, default_recipes());
        }

        #[test]
        fn prop_env_overrides_encode_timeout(
            initial in 1u64..10_000,
            override_secs in 1u64..100_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[timeouts]
encode_secs = {}
"#,
                initial
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("GONDOLA_ENCODE_TIMEOUT_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.timeouts.encode_secs, override_secs);
        }

        #[test]
        fn prop_env_overrides_debug_skip_hls(
            initial in proptest::bool::ANY,
            override_skip in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("debug_skip_hls = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("GONDOLA_DEBUG_SKIP_HLS", override_skip.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.debug_skip_hls, override_skip);
        }
    }

    #[test]
    fn test_env_overrides_tools_and_mode() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("root = \"/media\"").expect("Valid TOML");
        env::set_var("GONDOLA_ROOT", "/srv/media");
        env::set_var("GONDOLA_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");
        env::set_var("GONDOLA_EXCLUSIVITY_MODE", "fail_open");
        env::set_var("GONDOLA_DEBUG_SKIP_HLS", "maybe");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.root, "/srv/media");
        assert_eq!(config.tools.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.tools.ffprobe, "ffprobe");
        assert_eq!(config.exclusivity.mode, ExclusivityMode::FailOpen);
        assert!(!config.debug_skip_hls); // invalid value keeps existing
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.root, "");
        assert!(!config.debug_skip_hls);
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert_eq!(config.tools.niceness, Some(10));
        assert_eq!(config.timeouts.probe_secs, 120);
        assert_eq!(config.watch.settle_millis, 1000);
        assert_eq!(config.exclusivity.mode, ExclusivityMode::Lsof);
        assert_eq!(config.recipes.len(), 4);
    }

    #[test]
    fn test_custom_recipes_replace_defaults() {
        let toml_str = r#"
root = "/media"

[[recipes]]
token = "Crop235"
filter = "crop=iw:iw/2.35"
"#;
        let config = Config::parse_toml(toml_str).expect("Valid TOML");
        assert_eq!(config.recipes, vec![RecipeConfig::new("Crop235", "crop=iw:iw/2.35")]);
    }

    #[test]
    fn test_validate_requires_root() {
        let config = Config::parse_toml("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config::parse_toml("root = \"~/Media\"").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_root_path_expands_tilde() {
        let config = Config::parse_toml("root = \"/srv/Media\"").unwrap();
        assert_eq!(config.root_path(), PathBuf::from("/srv/Media"));

        let config = Config::parse_toml("root = \"~/Media\"").unwrap();
        assert!(config.root_path().ends_with("Media"));
    }

    #[test]
    fn test_exclusivity_mode_from_str() {
        assert_eq!("LSOF".parse::<ExclusivityMode>(), Ok(ExclusivityMode::Lsof));
        assert_eq!("fail-open".parse::<ExclusivityMode>(), Ok(ExclusivityMode::FailOpen));
        assert!("sometimes".parse::<ExclusivityMode>().is_err());
    }
}
