//! Manifest reading and validation.
//!
//! A manifest is a CSV file with a header row describing pending work
//! items. Two shapes exist: the recording manifest of an experiment and
//! the sweep manifest listing experiments.

use crate::error::{BatchError, Result};
use crate::models::ManifestRow;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column holding the free-text selection flag.
pub const PROCESS_COLUMN: &str = "Process";

/// Columns every recording manifest must carry.
pub const RECORDING_COLUMNS: &[&str] = &[
    "Recording Sequence Nr",
    "Recording Name",
    "Experiment Date",
    "Experiment Name",
    "Condition Nr",
    "Replicate Nr",
    "Probe",
    "Probe Type",
    "Cell Type",
    "Adjuvant",
    "Concentration",
    "Threshold",
    PROCESS_COLUMN,
];

/// Columns every sweep manifest must carry.
pub const SWEEP_COLUMNS: &[&str] = &["Project", "Image Source", "Image", "Experiment", PROCESS_COLUMN];

/// Result columns appended to the recordings output, in this order.
pub const RESULT_COLUMNS: &[&str] = &[
    "Nr Spots",
    "Nr Tracks",
    "Run Time",
    "Ext Recording Name",
    "Recording Size",
    "Time Stamp",
    "Max Frame Gap",
    "Gap Closing Max Distance",
    "Linking Max Distance",
    "Median Filtering",
    "Nr Spots in All Tracks",
    "Min Spots in Track",
    "Case",
];

/// A parsed and validated manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<ManifestRow>,
}

impl Manifest {
    /// Read a manifest and check its header is a superset of `required`.
    pub fn open(path: &Path, required: &[&str]) -> Result<Self> {
        if !path.is_file() {
            return Err(BatchError::ManifestNotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

        let missing: Vec<String> = required
            .iter()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .map(|col| col.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(BatchError::Validation {
                path: path.to_path_buf(),
                missing,
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = ManifestRow::from_pairs(headers.iter().map(String::as_str), record.iter());
            if row.len() < headers.len() {
                debug!(
                    "Row {} of {} has {} of {} columns",
                    rows.len() + 1,
                    path.display(),
                    row.len(),
                    headers.len()
                );
            }
            rows.push(row);
        }

        debug!("Read {} rows from {}", rows.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    /// Rows selected for processing, in manifest order.
    pub fn selected(&self) -> impl Iterator<Item = &ManifestRow> {
        self.rows.iter().filter(|row| is_selected(row))
    }

    /// Number of rows selected for processing.
    pub fn nr_to_process(&self) -> usize {
        self.selected().count()
    }

    /// Manifest columns followed by the result columns not already present.
    pub fn output_columns(&self) -> Vec<String> {
        output_columns(&self.headers, RESULT_COLUMNS)
    }
}

/// A row is selected when its process flag contains a `y`, case-insensitively.
///
/// This is a substring test: `Yes`, `y`, `YY` and `maybe` all select.
pub fn is_selected(row: &ManifestRow) -> bool {
    row.get(PROCESS_COLUMN)
        .map(|flag| flag.to_lowercase().contains('y'))
        .unwrap_or(false)
}

/// Append `extra` columns to `headers`, skipping ones already present.
pub fn output_columns(headers: &[String], extra: &[&str]) -> Vec<String> {
    let mut columns = headers.to_vec();
    for col in extra {
        if !columns.iter().any(|c| c == col) {
            columns.push(col.to_string());
        }
    }
    columns
}
