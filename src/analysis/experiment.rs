//! Experiment-level processing loop.
//!
//! Validates the recording manifest of one experiment directory, runs
//! every selected recording through the [`UnitProcessor`], appends each
//! outcome to the recordings file and finally compacts the track files.

use super::aggregator::{consolidate, RecordingsWriter};
use super::processor::{reset_image_directory, ItemContext, UnitProcessor};
use crate::collaborators::{BrightfieldConverter, Detector};
use crate::config::Config;
use crate::error::Result;
use crate::manifest::{is_selected, Manifest, RECORDING_COLUMNS};
use crate::models::{format_time_nicely, ExperimentOutcome, ExperimentSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What to process and where.
#[derive(Debug, Clone)]
pub struct ExperimentRequest {
    pub experiment_dir: PathBuf,
    /// Directory holding the raw recordings.
    pub recordings_dir: PathBuf,
    /// Free text copied into the `Case` column of successful rows.
    pub case_label: String,
    pub show_progress: bool,
}

/// Run every selected recording of one experiment.
///
/// Returns `NothingToProcess` without touching any output when no row is
/// selected. Manifest validation failures abort with an error before any
/// output is written.
pub fn run_experiment(
    request: &ExperimentRequest,
    detector: &dyn Detector,
    config: &Config,
) -> Result<ExperimentOutcome> {
    let started = Instant::now();
    let general = &config.general;
    let experiment_dir = &request.experiment_dir;

    let manifest = Manifest::open(&experiment_dir.join(&general.manifest_file), RECORDING_COLUMNS)
        .map_err(|e| {
            error!("{}", e);
            e
        })?;

    let nr_to_process = manifest.nr_to_process();
    if nr_to_process == 0 {
        info!("No recordings selected for processing");
        return Ok(ExperimentOutcome::NothingToProcess);
    }

    info!(
        "Processing {} recordings in directory {}",
        nr_to_process,
        request.recordings_dir.display()
    );

    reset_image_directory(&experiment_dir.join(&general.image_directory))?;

    let tracks_path = experiment_dir.join(&general.tracks_file);
    if tracks_path.exists() {
        fs::remove_file(&tracks_path)?;
    }

    let mut recordings = RecordingsWriter::create(
        &experiment_dir.join(&general.recordings_file),
        manifest.output_columns(),
    )?;

    let processor = UnitProcessor::new(detector, config);
    let progress = progress_bar(nr_to_process as u64, request.show_progress);

    let mut summary = ExperimentSummary {
        experiment_dir: experiment_dir.clone(),
        case_label: request.case_label.clone(),
        selected: nr_to_process,
        ..Default::default()
    };

    let mut file_count = 0usize;
    for row in manifest.rows() {
        if !is_selected(row) {
            if general.write_unselected_rows {
                recordings.append(row)?;
            }
            continue;
        }

        file_count += 1;
        let item_started = Instant::now();
        let ctx = ItemContext {
            source_dir: &request.recordings_dir,
            experiment_dir,
            is_first_item: file_count == 1,
            case_label: &request.case_label,
        };

        let outcome = processor.process(row.clone(), &ctx);
        summary.record(outcome.status);

        info!(
            "Processed file nr {:>2} of {:>2}: {} in {}",
            file_count,
            nr_to_process,
            outcome.row.get("Recording Name").unwrap_or("?"),
            format_time_nicely(item_started.elapsed().as_secs_f64())
        );

        recordings.append(&outcome.row)?;
        progress.inc(1);
    }
    progress.finish_and_clear();
    debug!(
        "Wrote {} rows from {} to {}",
        recordings.rows_written(),
        manifest.path().display(),
        recordings.path().display()
    );

    info!("");
    info!("Number of recordings processed successfully:      {}", summary.processed);
    info!("Number of recordings not found:                   {}", summary.not_found);
    info!("Number of recordings not  successfully processed: {}", summary.failed);

    if let Some(notice) = summary.notice() {
        warn!("{}", notice);
    }

    let report = consolidate(
        experiment_dir,
        &general.track_keywords,
        ".csv",
        &tracks_path,
    )?;
    summary.tracks_rows = report.rows;
    summary.duration_seconds = started.elapsed().as_secs_f64();

    Ok(ExperimentOutcome::Completed(summary))
}

/// Run one experiment on its own, then convert its brightfield images.
///
/// Conversion is forced and only follows a completed run; sweeps call
/// [`run_experiment`] directly and never convert.
pub fn run_single_experiment(
    request: &ExperimentRequest,
    detector: &dyn Detector,
    converter: &dyn BrightfieldConverter,
    config: &Config,
) -> Result<ExperimentOutcome> {
    let mut summary = match run_experiment(request, detector, config)? {
        ExperimentOutcome::Completed(summary) => summary,
        ExperimentOutcome::NothingToProcess => return Ok(ExperimentOutcome::NothingToProcess),
    };

    if config.collaborators.convert_brightfield {
        info!(
            "Converting brightfield images from {}",
            request.recordings_dir.display()
        );
        let converted = converter
            .convert(&request.recordings_dir, &request.experiment_dir, true)
            .map_err(|e| {
                error!("Brightfield conversion failed: {}", e);
                e
            })?;
        debug!("Converted {} brightfield images", converted);
        summary.brightfield_images = Some(converted);
    }

    Ok(ExperimentOutcome::Completed(summary))
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} recordings")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::processor::tests::{ok_result, quick_config, ScriptedDetector};
    use crate::error::BatchError;
    use crate::manifest::RESULT_COLUMNS;
    use crate::models::DetectionResult;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every conversion request and reports a fixed image count.
    #[derive(Default)]
    struct RecordingConverter {
        calls: Mutex<Vec<(PathBuf, PathBuf, bool)>>,
        fail: bool,
    }

    impl BrightfieldConverter for RecordingConverter {
        fn convert(&self, source: &Path, dest: &Path, force: bool) -> Result<usize> {
            self.calls
                .lock()
                .unwrap()
                .push((source.to_path_buf(), dest.to_path_buf(), force));
            if self.fail {
                return Err(BatchError::collaborator("convert", "exit status 1"));
            }
            Ok(3)
        }
    }

    const HEADER: &str = "Recording Sequence Nr,Recording Name,Experiment Date,Experiment Name,Condition Nr,Replicate Nr,Probe,Probe Type,Cell Type,Adjuvant,Concentration,Threshold,Process";

    struct Fixture {
        root: TempDir,
    }

    impl Fixture {
        fn new(rows: &[(&str, &str)]) -> Self {
            let root = TempDir::new().unwrap();
            fs::create_dir_all(root.path().join("experiment")).unwrap();
            fs::create_dir_all(root.path().join("images")).unwrap();

            let mut content = format!("{}\n", HEADER);
            for (i, (name, flag)) in rows.iter().enumerate() {
                content.push_str(&format!(
                    "{},{},240101,E1,1,1,P1,Simple,BMDC,None,10,5,{}\n",
                    i + 1,
                    name,
                    flag
                ));
            }
            fs::write(root.path().join("experiment/Experiment Info.csv"), content).unwrap();
            Self { root }
        }

        fn add_recording(&self, name: &str) {
            fs::write(self.root.path().join(format!("images/{}.nd2", name)), b"raw").unwrap();
        }

        fn experiment(&self) -> PathBuf {
            self.root.path().join("experiment")
        }

        fn request(&self) -> ExperimentRequest {
            ExperimentRequest {
                experiment_dir: self.experiment(),
                recordings_dir: self.root.path().join("images"),
                case_label: "case-1".to_string(),
                show_progress: false,
            }
        }
    }

    fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect();
        (headers, rows)
    }

    fn completed(outcome: ExperimentOutcome) -> ExperimentSummary {
        match outcome {
            ExperimentOutcome::Completed(summary) => summary,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_selected_rows_drive_detector_calls() {
        let fixture = Fixture::new(&[("rec-1", "y"), ("rec-2", "n"), ("rec-3", "y")]);
        fixture.add_recording("rec-1");
        fixture.add_recording("rec-3");
        let detector = ScriptedDetector::succeeding();

        let summary = completed(
            run_experiment(&fixture.request(), &detector, &quick_config()).unwrap(),
        );

        assert_eq!(summary.selected, 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(detector.calls(), 2);

        let requests = detector.requests.lock().unwrap();
        assert!(requests[0].is_first_item);
        assert!(!requests[1].is_first_item);
        assert_eq!(requests[1].ext_recording_name, "rec-3-threshold-5");
    }

    #[test]
    fn test_recordings_file_has_one_row_per_selected_item() {
        let fixture = Fixture::new(&[("rec-1", "y"), ("rec-2", "Yes"), ("rec-3", "no"), ("rec-4", "y")]);
        fixture.add_recording("rec-1");
        fixture.add_recording("rec-4");
        let detector = ScriptedDetector::new(vec![Ok(ok_result(10)), Ok(DetectionResult::failed())]);

        let summary = completed(
            run_experiment(&fixture.request(), &detector, &quick_config()).unwrap(),
        );
        assert_eq!((summary.processed, summary.not_found, summary.failed), (1, 1, 1));

        let (headers, rows) = read_rows(&fixture.experiment().join("All Recordings.csv"));
        assert_eq!(headers.len(), 13 + RESULT_COLUMNS.len());
        assert_eq!(&headers[13..], RESULT_COLUMNS);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == headers.len()));

        let size_col = headers.iter().position(|h| h == "Recording Size").unwrap();
        let spots_col = headers.iter().position(|h| h == "Nr Spots").unwrap();
        assert_eq!(rows[0][1], "rec-1");
        assert_eq!(rows[0][spots_col], "10");
        assert_eq!(rows[1][1], "rec-2");
        assert_eq!(rows[1][size_col], "0");
        assert_eq!(rows[1][spots_col], "");
        assert_eq!(rows[2][1], "rec-4");
        assert_eq!(rows[2][spots_col], "");
    }

    #[test]
    fn test_track_files_are_consolidated() {
        let fixture = Fixture::new(&[("B", "y"), ("A", "y")]);
        fixture.add_recording("A");
        fixture.add_recording("B");
        let detector = ScriptedDetector::succeeding();

        let summary = completed(
            run_experiment(&fixture.request(), &detector, &quick_config()).unwrap(),
        );

        assert_eq!(summary.tracks_rows, 4);
        let (headers, rows) = read_rows(&fixture.experiment().join("All Tracks.csv"));
        assert_eq!(headers, vec!["Track Label", "Nr Spots"]);
        let labels: Vec<_> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(
            labels,
            vec!["A-threshold-5-a", "A-threshold-5-b", "B-threshold-5-a", "B-threshold-5-b"]
        );
        assert!(!fixture.experiment().join("A-threshold-5-tracks.csv").exists());
        assert!(!fixture.experiment().join("B-threshold-5-tracks.csv").exists());
    }

    #[test]
    fn test_nothing_selected_writes_nothing() {
        let fixture = Fixture::new(&[("rec-1", "n"), ("rec-2", "")]);
        let detector = ScriptedDetector::succeeding();

        let outcome = run_experiment(&fixture.request(), &detector, &quick_config()).unwrap();

        assert_eq!(outcome, ExperimentOutcome::NothingToProcess);
        assert!(!fixture.experiment().join("All Recordings.csv").exists());
        assert_eq!(detector.calls(), 0);
    }

    #[test]
    fn test_validation_error_aborts_before_output() {
        let fixture = Fixture::new(&[]);
        fs::write(
            fixture.experiment().join("Experiment Info.csv"),
            "Recording Name,Process\nrec-1,y\n",
        )
        .unwrap();
        let detector = ScriptedDetector::succeeding();

        let err = run_experiment(&fixture.request(), &detector, &quick_config()).unwrap_err();

        assert!(matches!(err, BatchError::Validation { .. }));
        assert!(!fixture.experiment().join("All Recordings.csv").exists());
        assert_eq!(detector.calls(), 0);
    }

    #[test]
    fn test_bad_row_does_not_abort_remaining_items() {
        let fixture = Fixture::new(&[("rec-1", "y"), ("rec-2", "y")]);
        let manifest = fixture.experiment().join("Experiment Info.csv");
        let content = fs::read_to_string(&manifest)
            .unwrap()
            .replacen("BMDC,None,10,5,y", "BMDC,None,10,abc,y", 1);
        fs::write(&manifest, content).unwrap();
        fixture.add_recording("rec-1");
        fixture.add_recording("rec-2");
        let detector = ScriptedDetector::succeeding();

        let summary = completed(
            run_experiment(&fixture.request(), &detector, &quick_config()).unwrap(),
        );

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(detector.calls(), 1);
        let (_, rows) = read_rows(&fixture.experiment().join("All Recordings.csv"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_unselected_rows_copied_when_configured() {
        let fixture = Fixture::new(&[("rec-1", "n"), ("rec-2", "y")]);
        fixture.add_recording("rec-2");
        let detector = ScriptedDetector::succeeding();
        let mut config = quick_config();
        config.general.write_unselected_rows = true;

        run_experiment(&fixture.request(), &detector, &config).unwrap();

        let (_, rows) = read_rows(&fixture.experiment().join("All Recordings.csv"));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "rec-1");
        assert_eq!(rows[1][1], "rec-2");
    }

    #[test]
    fn test_single_run_converts_brightfield_images() {
        let fixture = Fixture::new(&[("rec-1", "y")]);
        fixture.add_recording("rec-1");
        let converter = RecordingConverter::default();

        let summary = completed(
            run_single_experiment(
                &fixture.request(),
                &ScriptedDetector::succeeding(),
                &converter,
                &quick_config(),
            )
            .unwrap(),
        );

        assert_eq!(summary.brightfield_images, Some(3));
        let calls = converter.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(fixture.root.path().join("images"), fixture.experiment(), true)]
        );
    }

    #[test]
    fn test_nothing_selected_skips_conversion() {
        let fixture = Fixture::new(&[("rec-1", "n")]);
        let converter = RecordingConverter::default();

        let outcome = run_single_experiment(
            &fixture.request(),
            &ScriptedDetector::succeeding(),
            &converter,
            &quick_config(),
        )
        .unwrap();

        assert_eq!(outcome, ExperimentOutcome::NothingToProcess);
        assert!(converter.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_conversion_disabled_in_config() {
        let fixture = Fixture::new(&[("rec-1", "y")]);
        fixture.add_recording("rec-1");
        let converter = RecordingConverter::default();
        let mut config = quick_config();
        config.collaborators.convert_brightfield = false;

        let summary = completed(
            run_single_experiment(
                &fixture.request(),
                &ScriptedDetector::succeeding(),
                &converter,
                &config,
            )
            .unwrap(),
        );

        assert_eq!(summary.brightfield_images, None);
        assert!(converter.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_conversion_failure_fails_the_run() {
        let fixture = Fixture::new(&[("rec-1", "y")]);
        fixture.add_recording("rec-1");
        let converter = RecordingConverter {
            fail: true,
            ..Default::default()
        };

        let result = run_single_experiment(
            &fixture.request(),
            &ScriptedDetector::succeeding(),
            &converter,
            &quick_config(),
        );

        assert!(matches!(result, Err(BatchError::Collaborator { .. })));
        assert!(fixture.experiment().join("All Recordings.csv").exists());
    }
}
