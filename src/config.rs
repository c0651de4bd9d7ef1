//! Configuration file handling.
//!
//! The active configuration lives at `~/Paint/Defaults/Paint.toml` unless
//! `--config` points elsewhere. A run loads it once into an immutable
//! snapshot; the only write path is [`Config::save_user_directories`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Processing settings shared by all levels.
    #[serde(default)]
    pub general: GeneralConfig,

    /// External programs.
    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Configuration swap file names used by sweeps.
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Defaults for squares generation parameters.
    #[serde(default)]
    pub generate_squares: GenerateSquaresConfig,

    /// Last used directories.
    #[serde(default)]
    pub user_directories: UserDirectories,

    /// Log file settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// General processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Extension of raw recording files, including the dot.
    #[serde(default = "default_image_extension")]
    pub image_extension: String,

    /// Pause after each successful detection so the recording can be reviewed.
    #[serde(default = "default_review_delay")]
    pub review_delay_seconds: f64,

    /// Recording manifest inside an experiment directory.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Consolidated per-recording output.
    #[serde(default = "default_recordings_file")]
    pub recordings_file: String,

    /// Consolidated track output.
    #[serde(default = "default_tracks_file")]
    pub tracks_file: String,

    /// Directory for detector images, reset at the start of each experiment.
    #[serde(default = "default_image_directory")]
    pub image_directory: String,

    /// Lower-case substrings a detail file name must all contain.
    #[serde(default = "default_track_keywords")]
    pub track_keywords: Vec<String>,

    /// Copy unselected manifest rows into the recordings output unchanged.
    #[serde(default)]
    pub write_unselected_rows: bool,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            image_extension: default_image_extension(),
            review_delay_seconds: default_review_delay(),
            manifest_file: default_manifest_file(),
            recordings_file: default_recordings_file(),
            tracks_file: default_tracks_file(),
            image_directory: default_image_directory(),
            track_keywords: default_track_keywords(),
            write_unselected_rows: false,
            verbose: false,
        }
    }
}

fn default_image_extension() -> String {
    ".nd2".to_string()
}

fn default_review_delay() -> f64 {
    3.0
}

fn default_manifest_file() -> String {
    "Experiment Info.csv".to_string()
}

fn default_recordings_file() -> String {
    "All Recordings.csv".to_string()
}

fn default_tracks_file() -> String {
    "All Tracks.csv".to_string()
}

fn default_image_directory() -> String {
    "TrackMate Images".to_string()
}

fn default_track_keywords() -> Vec<String> {
    vec!["threshold".to_string(), "track".to_string()]
}

/// External collaborator programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Spot and track detector, invoked once per recording.
    #[serde(default = "default_detector")]
    pub detector: String,

    /// Squares generation, invoked once per project.
    #[serde(default = "default_squares")]
    pub squares: String,

    /// Output compilation, invoked once per project.
    #[serde(default = "default_compiler")]
    pub compiler: String,

    /// Ask the detector to display recordings while it works.
    #[serde(default)]
    pub display: bool,

    /// Brightfield image conversion, invoked after a single experiment run.
    #[serde(default = "default_brightfield")]
    pub brightfield: String,

    /// Convert brightfield images after `run`. Sweeps never convert.
    #[serde(default = "default_true")]
    pub convert_brightfield: bool,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            detector: default_detector(),
            squares: default_squares(),
            compiler: default_compiler(),
            display: false,
            brightfield: default_brightfield(),
            convert_brightfield: true,
        }
    }
}

fn default_detector() -> String {
    "paint-detect".to_string()
}

fn default_squares() -> String {
    "paint-squares".to_string()
}

fn default_compiler() -> String {
    "paint-compile".to_string()
}

fn default_brightfield() -> String {
    "paint-convert-bf".to_string()
}

fn default_true() -> bool {
    true
}

/// Sweep configuration swap settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Per-experiment configuration file, looked up in the experiment directory.
    #[serde(default = "default_experiment_config")]
    pub experiment_config: String,

    /// Backup of the active configuration, next to it.
    #[serde(default = "default_backup_config")]
    pub backup_config: String,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            experiment_config: default_experiment_config(),
            backup_config: default_backup_config(),
        }
    }
}

fn default_experiment_config() -> String {
    "Paint.toml".to_string()
}

fn default_backup_config() -> String {
    "Paint-Keep.toml".to_string()
}

/// Squares generation defaults, used when a project entry omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSquaresConfig {
    #[serde(default)]
    pub min_track_duration: f64,

    #[serde(default = "default_max_track_duration")]
    pub max_track_duration: f64,

    #[serde(default = "default_r_squared")]
    pub min_required_r_squared: f64,

    #[serde(default = "default_neighbour_mode")]
    pub neighbour_mode: String,
}

impl Default for GenerateSquaresConfig {
    fn default() -> Self {
        Self {
            min_track_duration: 0.0,
            max_track_duration: default_max_track_duration(),
            min_required_r_squared: default_r_squared(),
            neighbour_mode: default_neighbour_mode(),
        }
    }
}

fn default_max_track_duration() -> f64 {
    100_000.0
}

fn default_r_squared() -> f64 {
    0.9
}

fn default_neighbour_mode() -> String {
    "Free".to_string()
}

/// Directories last used by the `run` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDirectories {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images_directory: Option<PathBuf>,
}

/// Log file settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for log files. Defaults to `~/Paint/Logger`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

/// Settings given on the command line. They win over every config file,
/// including the per-experiment files swapped in by a sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub image_extension: Option<String>,
    pub review_delay: Option<f64>,
    pub detector: Option<String>,
    pub verbose: bool,
}

impl ConfigOverrides {
    pub fn from_args(args: &crate::cli::Args) -> Self {
        Self {
            image_extension: args.image_extension.clone(),
            review_delay: args.review_delay,
            detector: args.detector.clone(),
            verbose: args.verbose,
        }
    }
}

/// Root of the per-user Paint directory (`$PAINT_HOME`, else `~/Paint`).
pub fn paint_home() -> PathBuf {
    if let Some(home) = std::env::var_os("PAINT_HOME") {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Paint"))
        .unwrap_or_else(|| PathBuf::from("Paint"))
}

impl Config {
    /// Location of the active configuration file.
    pub fn default_path() -> PathBuf {
        paint_home().join("Defaults").join("Paint.toml")
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the active configuration file, if there is one.
    pub fn load_default() -> Result<Option<Self>> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Load configuration from `path`, or defaults if the file doesn't exist.
    ///
    /// Returns `Err` if the file exists but can't be parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        self.apply_overrides(&ConfigOverrides::from_args(args));
    }

    /// Apply command-line overrides on top of file settings.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref ext) = overrides.image_extension {
            self.general.image_extension = if ext.starts_with('.') {
                ext.clone()
            } else {
                format!(".{}", ext)
            };
        }

        if let Some(delay) = overrides.review_delay {
            self.general.review_delay_seconds = delay;
        }

        if let Some(ref detector) = overrides.detector {
            self.collaborators.detector = detector.clone();
        }

        if overrides.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject values that would make a run misbehave.
    pub fn validate(&self) -> Result<()> {
        let delay = self.general.review_delay_seconds;
        if !delay.is_finite() || delay < 0.0 {
            bail!(
                "review_delay_seconds must be zero or more seconds, got {}",
                delay
            );
        }
        if self.general.image_extension.trim_start_matches('.').is_empty() {
            bail!("image_extension must not be empty");
        }
        Ok(())
    }

    /// Directory that receives log files.
    pub fn log_directory(&self) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(|| paint_home().join("Logger"))
    }

    /// Persist the last used directories into the file at `path`.
    ///
    /// Other settings in the file are preserved.
    pub fn save_user_directories(path: &Path, dirs: &UserDirectories) -> Result<()> {
        let mut config = Self::load_or_default(path)?;
        config.user_directories = dirs.clone();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
