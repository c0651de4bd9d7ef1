//! Sweep orchestration.
//!
//! A sweep manifest lists experiments, each with its own configuration
//! file. Every selected entry is validated, its configuration swapped in
//! for the duration of the run, and its experiment processed. A bad
//! entry is logged and skipped; it never stops the sweep.

pub mod swap;

pub use swap::ConfigSwap;

use crate::analysis::{run_experiment, ExperimentRequest};
use crate::collaborators::Detector;
use crate::config::{Config, ConfigOverrides};
use crate::error::{BatchError, Result};
use crate::manifest::{Manifest, SWEEP_COLUMNS};
use crate::models::{format_time_nicely, ExperimentOutcome, SweepEntry, SweepSummary};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs the experiments listed in a sweep manifest.
pub struct SweepRunner<'a> {
    detector: &'a dyn Detector,
    config: &'a Config,
    /// Active configuration file swapped per entry.
    active_config: PathBuf,
    /// Re-applied on top of every swapped-in configuration.
    overrides: ConfigOverrides,
    show_progress: bool,
}

impl<'a> SweepRunner<'a> {
    pub fn new(detector: &'a dyn Detector, config: &'a Config, active_config: PathBuf) -> Self {
        Self {
            detector,
            config,
            active_config,
            overrides: ConfigOverrides::default(),
            show_progress: false,
        }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn backup_config(&self) -> PathBuf {
        self.active_config
            .with_file_name(&self.config.sweep.backup_config)
    }

    /// Process every selected entry of the sweep file in order.
    ///
    /// Only an unreadable or invalid sweep manifest is an error. Skipped
    /// entries and failed experiments set `had_error`; recordings that were
    /// not found or failed show up in the per-experiment totals instead.
    pub fn run(&self, sweep_file: &Path) -> Result<SweepSummary> {
        let started = Instant::now();
        let manifest = Manifest::open(sweep_file, SWEEP_COLUMNS)?;

        banner(&format!(
            "Processing TrackMate batchfile: '{}'",
            sweep_file.display()
        ));

        let mut summary = SweepSummary {
            selected: manifest.nr_to_process(),
            ..Default::default()
        };

        for row in manifest.selected() {
            let entry = match SweepEntry::from_row(row) {
                Ok(entry) => entry,
                Err(e) => {
                    error!("Error: malformed sweep entry: {}", e);
                    summary.had_error = true;
                    summary.skipped += 1;
                    continue;
                }
            };

            if let Err(e) = check_entry(&entry) {
                error!("Error: {}", e);
                summary.had_error = true;
                summary.skipped += 1;
                continue;
            }

            let entry_started = Instant::now();
            match self.run_entry(&entry) {
                Ok(ExperimentOutcome::Completed(experiment)) => {
                    summary.experiments.push(experiment);
                    summary.processed += 1;
                }
                Ok(ExperimentOutcome::NothingToProcess) => {
                    summary.processed += 1;
                }
                Err(e) => {
                    error!("Error: experiment '{}' failed: {}", entry.experiment, e);
                    summary.had_error = true;
                    summary.skipped += 1;
                    continue;
                }
            }

            info!(
                "Processing completed in {}",
                format_time_nicely(entry_started.elapsed().as_secs_f64())
            );
            info!("");
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();

        if summary.had_error {
            warn!("Errors occurred during processing. Refer to the log file for more information.");
        } else {
            info!(
                "Processing completed in {}",
                format_time_nicely(summary.duration_seconds)
            );
        }

        Ok(summary)
    }

    /// Swap in the entry's configuration and run its experiment.
    fn run_entry(&self, entry: &SweepEntry) -> Result<ExperimentOutcome> {
        let experiment_dir = entry.experiment_dir();

        let message = format!("Processing experiment '{}'", entry.experiment);
        info!("");
        info!("{}", "-".repeat(message.len()));
        info!("{}", message);
        info!("{}", "-".repeat(message.len()));
        info!("{}", experiment_dir.display());
        info!("{}", entry.recordings_dir().display());

        let swap = ConfigSwap::apply(
            &self.active_config,
            &self.backup_config(),
            &experiment_dir.join(&self.config.sweep.experiment_config),
        )?;
        debug!("Active configuration backed up: {}", swap.backed_up());

        let snapshot = match Config::load(&self.active_config) {
            Ok(mut config) => {
                config.apply_overrides(&self.overrides);
                config
            }
            Err(e) => {
                warn!("Using the sweep configuration for '{}': {:#}", entry.experiment, e);
                self.config.clone()
            }
        };

        let request = ExperimentRequest {
            experiment_dir,
            recordings_dir: entry.recordings_dir(),
            case_label: entry.experiment.clone(),
            show_progress: self.show_progress,
        };
        let outcome = run_experiment(&request, self.detector, &snapshot);

        swap.restore()?;
        outcome
    }
}

/// Check every path an entry depends on.
pub fn check_entry(entry: &SweepEntry) -> Result<()> {
    if !entry.project.exists() {
        return Err(BatchError::Precondition(format!(
            "The Project source '{}' does not exist.",
            entry.project.display()
        )));
    }
    if !entry.image_source.exists() {
        return Err(BatchError::Precondition(format!(
            "The Image source '{}' does not exist.",
            entry.image_source.display()
        )));
    }
    let images = entry.recordings_dir();
    if !images.exists() {
        return Err(BatchError::Precondition(format!(
            "The Image source '{}' does not exist.",
            images.display()
        )));
    }
    let experiment = entry.experiment_dir();
    if !experiment.exists() {
        return Err(BatchError::Precondition(format!(
            "The Experiment '{}' does not exist.",
            experiment.display()
        )));
    }
    Ok(())
}

fn banner(message: &str) {
    let rule = "-".repeat(message.len());
    info!("");
    info!("{}", rule);
    info!("{}", message);
    info!("{}", rule);
    info!("");
}
