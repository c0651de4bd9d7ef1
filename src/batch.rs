//! Project batch runner.
//!
//! Stages each flagged project of a batch specification into the versioned
//! data root, runs squares generation and output compilation over it, and
//! stamps the staged tree with a fixed time.

use crate::collaborators::{OutputCompiler, SquaresGenerator, Stager};
use crate::config::Config;
use crate::error::{BatchError, Result};
use crate::models::{format_time_nicely, BatchSpec, BatchSummary, ProjectEntry, SelectParameters};
use chrono::{Local, NaiveDateTime, TimeZone};
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Format of the batch time string.
pub const TIME_STRING_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read a batch specification from a JSON file.
pub fn load_batch_spec(path: &Path) -> Result<BatchSpec> {
    if !path.exists() {
        return Err(BatchError::ManifestNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Threshold parameters for one project, filling gaps from configuration.
///
/// The R² threshold in the parameter block always comes from
/// `[generate_squares]`; the entry's own value is handed to the squares
/// generator separately.
pub fn select_parameters(entry: &ProjectEntry, config: &Config) -> SelectParameters {
    let defaults = &config.generate_squares;
    SelectParameters {
        min_required_density_ratio: entry.min_required_density_ratio,
        max_allowable_variability: entry.max_allowable_variability,
        min_track_duration: entry.min_track_duration.unwrap_or(defaults.min_track_duration),
        max_track_duration: entry.max_track_duration.unwrap_or(defaults.max_track_duration),
        min_required_r_squared: defaults.min_required_r_squared,
        neighbour_mode: entry
            .neighbour_mode
            .clone()
            .unwrap_or_else(|| defaults.neighbour_mode.clone()),
    }
}

/// Parse a local `YYYY-MM-DD HH:MM:SS` string, falling back to now.
pub fn resolve_timestamp(time_string: &str) -> SystemTime {
    let trimmed = time_string.trim();
    if trimmed.is_empty() {
        return SystemTime::now();
    }

    match NaiveDateTime::parse_from_str(trimmed, TIME_STRING_FORMAT) {
        Ok(naive) => match Local.from_local_datetime(&naive).earliest() {
            Some(local) => local.into(),
            None => {
                error!("Time string '{}' does not exist in the local time zone", trimmed);
                SystemTime::now()
            }
        },
        Err(e) => {
            error!("Invalid time string '{}': {}", trimmed, e);
            SystemTime::now()
        }
    }
}

/// Set access and modification times of every entry under `root`,
/// including `root` itself. Returns the number of entries stamped.
pub fn set_directory_tree_timestamp(root: &Path, time: SystemTime) -> Result<usize> {
    let stamp = FileTime::from_system_time(time);
    let mut stamped = 0usize;

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        filetime::set_file_times(entry.path(), stamp, stamp)?;
        stamped += 1;
    }

    Ok(stamped)
}

/// Copy the log file next to itself as `<stem> - v<version>.log`.
pub fn archive_log(log_file: &Path, version: &str) -> Result<PathBuf> {
    let stem = log_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("paint-batch");
    let target = log_file.with_file_name(format!("{} - v{}.log", stem, version));
    fs::copy(log_file, &target)?;
    Ok(target)
}

/// Runs a batch specification against its collaborators.
pub struct BatchRunner<'a> {
    stager: &'a dyn Stager,
    squares: &'a dyn SquaresGenerator,
    compiler: &'a dyn OutputCompiler,
    config: &'a Config,
    log_file: Option<PathBuf>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        stager: &'a dyn Stager,
        squares: &'a dyn SquaresGenerator,
        compiler: &'a dyn OutputCompiler,
        config: &'a Config,
    ) -> Self {
        Self {
            stager,
            squares,
            compiler,
            config,
            log_file: None,
        }
    }

    /// Log file to archive at the end of the run.
    pub fn with_log_file(mut self, log_file: Option<PathBuf>) -> Self {
        self.log_file = log_file;
        self
    }

    pub fn run(&self, spec: &BatchSpec) -> Result<BatchSummary> {
        let started = Instant::now();
        let data_root = spec.data_root();
        let stamp = resolve_timestamp(&spec.time_string);

        let mut summary = BatchSummary {
            selected: spec.nr_to_process(),
            ..Default::default()
        };

        let flagged = spec.projects.iter().filter(|p| p.flag);
        for (i, entry) in flagged.enumerate() {
            info!("");
            info!(
                "Processing project {} of {}: {} ({})",
                i + 1,
                summary.selected,
                entry.project_name,
                entry.probe
            );

            match self.run_project(spec, entry, &data_root, stamp) {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    error!("Project '{}' failed: {}", entry.project_name, e);
                    summary.errors += 1;
                }
            }
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();
        info!("");
        info!(
            "Processed {} of {} projects in {}",
            summary.processed,
            summary.selected,
            format_time_nicely(summary.duration_seconds)
        );
        if summary.errors > 0 {
            error!("");
            error!("----------------------------------------------");
            error!("{} error(s) occurred; check the log for details", summary.errors);
            error!("----------------------------------------------");
        }

        if let Some(ref log_file) = self.log_file {
            match archive_log(log_file, &spec.version) {
                Ok(target) => summary.archived_log = Some(target),
                Err(e) => warn!("Could not archive {}: {}", log_file.display(), e),
            }
        }

        Ok(summary)
    }

    fn run_project(
        &self,
        spec: &BatchSpec,
        entry: &ProjectEntry,
        data_root: &Path,
        stamp: SystemTime,
    ) -> Result<()> {
        let source = spec.paint_source.join(&entry.probe);
        let dest = data_root.join(&entry.probe).join(&entry.project_name);

        if !source.exists() {
            return Err(BatchError::Precondition(format!(
                "Source directory '{}' does not exist",
                source.display()
            )));
        }
        fs::create_dir_all(&dest)?;

        let parameters = select_parameters(entry, self.config);
        log_parameters(entry, &parameters, &source, &dest);

        self.stager.stage(&source, &dest)?;

        let processed = self.squares.analyze(
            &dest,
            &parameters,
            entry.nr_of_squares,
            entry.min_required_r_squared,
            entry.min_tracks_for_tau,
            spec.force,
        )?;

        if processed > 0 {
            self.compiler.compile(&dest, true)?;
        } else {
            info!("No experiments processed, output not compiled");
        }

        let stamped = set_directory_tree_timestamp(&dest, stamp)?;
        info!("Set time stamp on {} entries under {}", stamped, dest.display());
        Ok(())
    }
}

fn log_parameters(entry: &ProjectEntry, params: &SelectParameters, source: &Path, dest: &Path) {
    info!("Source:                     {}", source.display());
    info!("Destination:                {}", dest.display());
    info!("Nr of squares:              {}", entry.nr_of_squares);
    info!("Min required density ratio: {}", params.min_required_density_ratio);
    info!("Max allowable variability:  {}", params.max_allowable_variability);
    info!("Min track duration:         {}", params.min_track_duration);
    info!("Max track duration:         {}", params.max_track_duration);
    info!("Min allowable R squared:    {}", entry.min_required_r_squared);
    info!("Select R squared:           {}", params.min_required_r_squared);
    info!("Min tracks for tau:         {}", entry.min_tracks_for_tau);
    info!("Neighbour mode:             {}", params.neighbour_mode);
}
