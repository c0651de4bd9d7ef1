//! Result aggregation.
//!
//! This module builds the per-experiment recordings file one row at a
//! time and compacts the per-recording track files into a single tracks
//! file.

use crate::error::{BatchError, Result};
use crate::models::ManifestRow;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Append-only writer for the recordings output.
///
/// Each append opens the file, writes one record and closes it again, so
/// rows already written survive a later failure.
#[derive(Debug)]
pub struct RecordingsWriter {
    path: PathBuf,
    columns: Vec<String>,
    rows_written: usize,
}

impl RecordingsWriter {
    /// Create the file with its header, replacing any previous file.
    pub fn create(path: &Path, columns: Vec<String>) -> Result<Self> {
        if path.exists() {
            fs::remove_file(path)?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&columns)?;
        writer.flush()?;

        debug!("Initialised {} with {} columns", path.display(), columns.len());

        Ok(Self {
            path: path.to_path_buf(),
            columns,
            rows_written: 0,
        })
    }

    /// Append one row in header order. Columns the row lacks are blank.
    pub fn append(&mut self, row: &ManifestRow) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(row.values_for(&self.columns))?;
        writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

/// What a consolidation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Source files merged (and deleted), in merge order.
    pub sources: Vec<PathBuf>,
    /// Data rows in the consolidated file.
    pub rows: usize,
    /// The consolidated file, if any source matched.
    pub output: Option<PathBuf>,
}

/// Files in `dir` whose lower-cased name contains every keyword and ends
/// with `extension`, sorted by file name.
pub fn find_detail_files(dir: &Path, keywords: &[String], extension: &str) -> Result<Vec<PathBuf>> {
    let extension = extension.to_lowercase();
    let mut matches = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = name.to_lowercase();
        if lower.ends_with(&extension) && keywords.iter().all(|k| lower.contains(k.as_str())) {
            matches.push(path);
        }
    }

    matches.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(matches)
}

/// Merge matching detail files into `output`, then delete them.
///
/// The header comes from the first file in name order that has one; empty
/// files are skipped with a warning. Data rows follow in name order. The merge is written to a temporary file in `dir`,
/// its row count checked against the inputs, and only then moved over
/// `output`. Sources are deleted last.
pub fn consolidate(
    dir: &Path,
    keywords: &[String],
    extension: &str,
    output: &Path,
) -> Result<ConsolidationReport> {
    let sources = find_detail_files(dir, keywords, extension)?;
    if sources.is_empty() {
        debug!("No detail files to consolidate in {}", dir.display());
        return Ok(ConsolidationReport::default());
    }

    let mut temp = tempfile::Builder::new()
        .prefix(".consolidate-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let mut expected = 0usize;
    let mut has_header = false;
    {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(temp.as_file_mut());

        for source in &sources {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .from_path(source)?;

            let headers = reader.headers()?.clone();
            if headers.is_empty() {
                warn!("Skipping empty detail file {}", source.display());
                continue;
            }
            if !has_header {
                writer.write_record(&headers)?;
                has_header = true;
            }

            for record in reader.records() {
                writer.write_record(&record?)?;
                expected += 1;
            }
        }
        writer.flush()?;
    }

    if !has_header {
        warn!("All detail files in {} are empty", dir.display());
        for source in &sources {
            fs::remove_file(source)?;
        }
        return Ok(ConsolidationReport {
            sources,
            ..Default::default()
        });
    }

    let written = count_data_rows(temp.path())?;
    if written != expected {
        return Err(BatchError::RowCountMismatch { expected, written });
    }

    temp.persist(output).map_err(|e| e.error)?;

    for source in &sources {
        fs::remove_file(source)?;
    }

    info!(
        "Consolidated {} files ({} rows) into {}",
        sources.len(),
        written,
        output.display()
    );

    Ok(ConsolidationReport {
        sources,
        rows: written,
        output: Some(output.to_path_buf()),
    })
}

/// Number of data rows (header excluded) in a CSV file.
pub fn count_data_rows(path: &Path) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut count = 0;
    for record in reader.records() {
        record?;
        count += 1;
    }
    Ok(count)
}
