//! Data models for the batch engine.
//!
//! This module contains the rows, statuses, entries and summaries that
//! flow between the manifest reader, the processors and the reports.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome class of a single recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Detector ran and returned usable counts
    Success,
    /// Input recording file was absent
    NotFound,
    /// Detector failed, returned the sentinel, or the row was malformed
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Success => write!(f, "SUCCESS"),
            ProcessingStatus::NotFound => write!(f, "NOT_FOUND"),
            ProcessingStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One manifest row as an ordered column → value mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRow {
    fields: Vec<(String, String)>,
}

impl ManifestRow {
    /// Build a row from header names and values. Short rows leave the
    /// trailing columns absent.
    pub fn from_pairs<'a, H, V>(headers: H, values: V) -> Self
    where
        H: IntoIterator<Item = &'a str>,
        V: IntoIterator<Item = &'a str>,
    {
        let fields = headers
            .into_iter()
            .zip(values)
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        Self { fields }
    }

    /// Value of a column, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of a column, or a field error if absent.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| BatchError::missing_field(name))
    }

    /// Required column parsed as a float.
    pub fn require_f64(&self, name: &str) -> Result<f64> {
        let raw = self.require(name)?;
        raw.trim().parse::<f64>().map_err(|_| BatchError::Field {
            field: name.to_string(),
            reason: format!("'{}' is not a number", raw),
        })
    }

    /// Set a column value, appending the column if it is new.
    pub fn set(&mut self, name: &str, value: impl ToString) {
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Values laid out in the given column order; absent columns are blank.
    pub fn values_for<'a>(&'a self, columns: &[String]) -> Vec<&'a str> {
        columns
            .iter()
            .map(|c| self.get(c).unwrap_or(""))
            .collect()
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

/// Values returned by the external detector for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub spot_count: i64,
    pub total_tracks: i64,
    pub filtered_tracks: i64,
    pub max_frame_gap: i64,
    pub linking_max_distance: f64,
    pub gap_closing_max_distance: f64,
    pub spots_in_filtered_tracks: i64,
    pub median_filtering: bool,
    pub min_spots_per_track: i64,
}

impl DetectionResult {
    /// The detector signals failure with `-1` in the spot or track count.
    pub fn is_failure(&self) -> bool {
        self.spot_count == -1 || self.total_tracks == -1
    }

    /// Result carrying the failure sentinel.
    #[cfg(test)]
    pub fn failed() -> Self {
        Self {
            spot_count: -1,
            total_tracks: -1,
            filtered_tracks: -1,
            max_frame_gap: 0,
            linking_max_distance: 0.0,
            gap_closing_max_distance: 0.0,
            spots_in_filtered_tracks: 0,
            median_filtering: false,
            min_spots_per_track: 0,
        }
    }
}

/// Result of processing one manifest row.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub status: ProcessingStatus,
    pub row: ManifestRow,
    /// Why an item was downgraded to `Failed`, if a specific error occurred.
    pub error: Option<String>,
}

/// Totals for one experiment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub experiment_dir: PathBuf,
    pub case_label: String,
    pub selected: usize,
    pub processed: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Detail rows merged into the tracks file.
    pub tracks_rows: usize,
    pub duration_seconds: f64,
    /// Brightfield images converted after the run; `None` when conversion
    /// did not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightfield_images: Option<usize>,
}

impl ExperimentSummary {
    /// Record one item status in the totals.
    pub fn record(&mut self, status: ProcessingStatus) {
        match status {
            ProcessingStatus::Success => self.processed += 1,
            ProcessingStatus::NotFound => self.not_found += 1,
            ProcessingStatus::Failed => self.failed += 1,
        }
    }

    pub fn has_non_success(&self) -> bool {
        self.not_found > 0 || self.failed > 0
    }

    /// Warning to surface once at the end of a run, pointing at the log.
    pub fn notice(&self) -> Option<&'static str> {
        if self.processed == 0 {
            Some("No recordings processed successfully. Refer to Paint log for details.")
        } else if self.not_found > 0 {
            Some("Some recordings were not found. Refer to Paint log for details.")
        } else if self.failed > 0 {
            Some("Some recordings were not processed. Refer to Paint log for details.")
        } else {
            None
        }
    }
}

/// Result of an experiment run request.
#[derive(Debug, Clone, PartialEq)]
pub enum ExperimentOutcome {
    /// No manifest row was selected; nothing was written.
    NothingToProcess,
    Completed(ExperimentSummary),
}

/// One row of a sweep manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepEntry {
    pub project: PathBuf,
    pub image_source: PathBuf,
    pub image: String,
    pub experiment: String,
    pub process: String,
}

impl SweepEntry {
    pub fn from_row(row: &ManifestRow) -> Result<Self> {
        Ok(Self {
            project: PathBuf::from(row.require("Project")?),
            image_source: PathBuf::from(row.require("Image Source")?),
            image: row.require("Image")?.to_string(),
            experiment: row.require("Experiment")?.to_string(),
            process: row.require("Process")?.to_string(),
        })
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.project.join(&self.experiment)
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.image_source.join(&self.image)
    }
}

/// Totals for a sweep run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepSummary {
    pub selected: usize,
    pub processed: usize,
    pub skipped: usize,
    /// An entry was skipped or its experiment could not run.
    pub had_error: bool,
    pub experiments: Vec<ExperimentSummary>,
    pub duration_seconds: f64,
}

impl SweepSummary {
    /// True on an entry error or when any experiment has non-success items.
    pub fn needs_attention(&self) -> bool {
        self.had_error || self.experiments.iter().any(|e| e.has_non_success())
    }
}

/// Top-level block of a project batch specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSpec {
    pub paint_source: PathBuf,
    pub paint_data: PathBuf,
    pub version: String,
    #[serde(default)]
    pub time_string: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub projects: Vec<ProjectEntry>,
}

impl BatchSpec {
    /// Destination root, suffixed with the data version.
    pub fn data_root(&self) -> PathBuf {
        let mut root = self.paint_data.clone().into_os_string();
        root.push(format!(" - v{}", self.version));
        PathBuf::from(root)
    }

    pub fn nr_to_process(&self) -> usize {
        self.projects.iter().filter(|p| p.flag).count()
    }
}

/// One project in a batch specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub flag: bool,
    pub probe: String,
    pub project_name: String,
    pub nr_of_squares: u32,
    pub min_required_density_ratio: f64,
    pub max_allowable_variability: f64,
    pub min_required_r_squared: f64,
    pub min_tracks_for_tau: u32,
    #[serde(default)]
    pub min_track_duration: Option<f64>,
    #[serde(default)]
    pub max_track_duration: Option<f64>,
    #[serde(default)]
    pub neighbour_mode: Option<String>,
}

/// Threshold parameters handed to the squares generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectParameters {
    pub min_required_density_ratio: f64,
    pub max_allowable_variability: f64,
    pub min_track_duration: f64,
    pub max_track_duration: f64,
    pub min_required_r_squared: f64,
    pub neighbour_mode: String,
}

/// Totals for a project batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub selected: usize,
    pub processed: usize,
    pub errors: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_log: Option<PathBuf>,
}

/// Render a duration in seconds for log lines.
pub fn format_time_nicely(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0).floor() as u64;
    let minutes = ((seconds % 3600.0) / 60.0).floor() as u64;
    let secs = seconds % 60.0;

    if hours > 0 {
        format!("{} hours {} minutes {:.0} seconds", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{} minutes {:.0} seconds", minutes, secs)
    } else {
        format!("{:.1} seconds", secs)
    }
}
