//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// paint-batch - batch runner for single-particle tracking recordings
///
/// Runs the external detector over every selected recording of an
/// experiment, over a sweep of experiments, or stages and analyses a list
/// of projects.
///
/// Examples:
///   paint-batch run --experiment ./Project/240101 --images ./Images/240101
///   paint-batch sweep "./Sweep.csv"
///   paint-batch batch ./projects.json --summary run.md
///   paint-batch init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, uses ~/Paint/Defaults/Paint.toml (or $PAINT_HOME).
    #[arg(short, long, value_name = "FILE", global = true, env = "PAINT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output, no progress bar)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write a run summary to this file
    #[arg(long, value_name = "FILE", global = true)]
    pub summary: Option<PathBuf>,

    /// Summary format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,

    /// Extension of raw recording files (e.g. nd2, .tif)
    #[arg(long, value_name = "EXT", global = true)]
    pub image_extension: Option<String>,

    /// Seconds to pause after each successful detection
    #[arg(long, value_name = "SECS", global = true)]
    pub review_delay: Option<f64>,

    /// Detector program to invoke per recording
    #[arg(long, value_name = "PROGRAM", global = true, env = "PAINT_DETECTOR")]
    pub detector: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Process the selected recordings of one experiment
    Run {
        /// Experiment directory holding the recording manifest
        ///
        /// Defaults to the last used experiment directory.
        #[arg(short, long, value_name = "DIR")]
        experiment: Option<PathBuf>,

        /// Directory holding the raw recordings
        ///
        /// Defaults to the last used images directory.
        #[arg(short, long, value_name = "DIR")]
        images: Option<PathBuf>,

        /// Label written to the Case column of successful rows
        #[arg(long, default_value = "")]
        case: String,
    },

    /// Process every selected experiment of a sweep manifest
    Sweep {
        /// Sweep manifest (CSV)
        #[arg(value_name = "FILE")]
        sweep_file: PathBuf,
    },

    /// Stage and analyse the projects of a batch specification
    Batch {
        /// Batch specification (JSON)
        #[arg(value_name = "FILE")]
        spec_file: PathBuf,
    },

    /// Generate a default configuration file
    InitConfig {
        /// Where to write it (defaults to the active configuration path)
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Output format for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(delay) = self.review_delay {
            if !delay.is_finite() || delay < 0.0 {
                return Err("Review delay must be zero or more seconds".to_string());
            }
        }

        if let Some(ref ext) = self.image_extension {
            if ext.trim_start_matches('.').is_empty() {
                return Err("Image extension must not be empty".to_string());
            }
        }

        match &self.command {
            Command::Run {
                experiment, images, ..
            } => {
                for dir in [experiment, images].into_iter().flatten() {
                    if !dir.is_dir() {
                        return Err(format!("Directory does not exist: {}", dir.display()));
                    }
                }
            }
            Command::Sweep { sweep_file } => {
                if !sweep_file.is_file() {
                    return Err(format!(
                        "Sweep file does not exist: {}",
                        sweep_file.display()
                    ));
                }
            }
            Command::Batch { spec_file } => {
                if !spec_file.is_file() {
                    return Err(format!(
                        "Batch file does not exist: {}",
                        spec_file.display()
                    ));
                }
            }
            Command::InitConfig { .. } => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Name of the log file the command appends to.
    pub fn log_file_name(&self) -> Option<&'static str> {
        match self.command {
            Command::Run { .. } => Some("Run Trackmate.log"),
            Command::Sweep { .. } => Some("Run TrackMate Sweep.log"),
            Command::Batch { .. } => Some("Process All Projects.log"),
            Command::InitConfig { .. } => None,
        }
    }
}
