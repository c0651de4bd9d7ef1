//! Processing of a single recording.
//!
//! The processor resolves the raw recording, calls the detector and
//! classifies the outcome. Every error raised while handling one row is
//! captured as a `Failed` outcome so the surrounding loop keeps going.

use crate::collaborators::{DetectionRequest, Detector};
use crate::config::Config;
use crate::error::Result;
use crate::models::{DetectionResult, ItemOutcome, ManifestRow, ProcessingStatus};
use chrono::Local;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Per-item context supplied by the experiment loop.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    /// Directory holding the raw recordings.
    pub source_dir: &'a Path,
    /// Experiment directory receiving the outputs.
    pub experiment_dir: &'a Path,
    pub is_first_item: bool,
    pub case_label: &'a str,
}

/// Runs one manifest row against the detector.
pub struct UnitProcessor<'a> {
    detector: &'a dyn Detector,
    config: &'a Config,
}

impl<'a> UnitProcessor<'a> {
    pub fn new(detector: &'a dyn Detector, config: &'a Config) -> Self {
        Self { detector, config }
    }

    /// Process a row, never failing: errors become a `Failed` outcome with
    /// the error attached.
    pub fn process(&self, mut row: ManifestRow, ctx: &ItemContext<'_>) -> ItemOutcome {
        match self.try_process(&mut row, ctx) {
            Ok(status) => ItemOutcome {
                status,
                row,
                error: None,
            },
            Err(e) => {
                error!("Could not process recording: {}", e);
                ItemOutcome {
                    status: ProcessingStatus::Failed,
                    row,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn try_process(&self, row: &mut ManifestRow, ctx: &ItemContext<'_>) -> Result<ProcessingStatus> {
        let recording_name = row.require("Recording Name")?.to_string();
        let threshold = row.require_f64("Threshold")?;

        if row.get("Adjuvant") == Some("None") {
            row.set("Adjuvant", "No");
        }

        let recording_path = ctx.source_dir.join(format!(
            "{}{}",
            recording_name, self.config.general.image_extension
        ));

        if !recording_path.is_file() {
            warn!(
                "Processing: Failed to open recording: {}",
                recording_path.display()
            );
            row.set("Recording Size", 0);
            return Ok(ProcessingStatus::NotFound);
        }

        row.set("Recording Size", fs::metadata(&recording_path)?.len());

        let ext_recording_name = extended_name(&recording_name, threshold);
        let request = DetectionRequest {
            tracks_path: ctx
                .experiment_dir
                .join(format!("{}-tracks.csv", ext_recording_name)),
            image_path: ctx
                .experiment_dir
                .join(&self.config.general.image_directory)
                .join(format!("{}.jpg", ext_recording_name)),
            ext_recording_name,
            recording_path,
            threshold,
            is_first_item: ctx.is_first_item,
            display: self.config.collaborators.display,
        };

        let started = Instant::now();
        let result = self.detector.detect(&request)?;

        if result.is_failure() {
            error!(
                "Detector did not complete for recording {}",
                request.ext_recording_name
            );
            return Ok(ProcessingStatus::Failed);
        }

        // Leave the recording on screen for review before moving on.
        let delay = self.config.general.review_delay_seconds;
        match Duration::try_from_secs_f64(delay) {
            Ok(pause) if !pause.is_zero() => thread::sleep(pause),
            Ok(_) => {}
            Err(_) => warn!("Ignoring invalid review delay of {} seconds", delay),
        }

        let run_time = (started.elapsed().as_secs_f64() * 10.0).round() / 10.0;
        debug!(
            "Nr of spots: {} processed in {:.1} seconds",
            result.spot_count, run_time
        );

        fill_result_fields(row, &result, &request.ext_recording_name, run_time, ctx.case_label);
        Ok(ProcessingStatus::Success)
    }
}

/// `<name>-threshold-<floor(threshold)>`.
pub fn extended_name(recording_name: &str, threshold: f64) -> String {
    format!("{}-threshold-{}", recording_name, threshold.floor() as i64)
}

fn fill_result_fields(
    row: &mut ManifestRow,
    result: &DetectionResult,
    ext_recording_name: &str,
    run_time: f64,
    case_label: &str,
) {
    row.set("Nr Spots", result.spot_count);
    row.set("Nr Tracks", result.filtered_tracks);
    row.set("Run Time", format!("{:.1}", run_time));
    row.set("Ext Recording Name", ext_recording_name);
    row.set(
        "Time Stamp",
        Local::now().format("%a %b %e %H:%M:%S %Y"),
    );
    row.set("Max Frame Gap", result.max_frame_gap);
    row.set("Linking Max Distance", result.linking_max_distance);
    row.set("Gap Closing Max Distance", result.gap_closing_max_distance);
    row.set("Median Filtering", result.median_filtering);
    row.set("Nr Spots in All Tracks", result.spots_in_filtered_tracks);
    row.set("Min Spots in Track", result.min_spots_per_track);
    row.set("Case", case_label);
}

/// Create the image directory, or delete the files in it.
///
/// Subdirectories are left alone. Returns the number of files removed.
pub fn reset_image_directory(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    debug!("Removed {} files from {}", removed, dir.display());
    Ok(removed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BatchError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Detector fake: records requests, replays scripted results, and
    /// writes a small track file like the real detector does.
    pub(crate) struct ScriptedDetector {
        pub requests: Mutex<Vec<DetectionRequest>>,
        script: Mutex<VecDeque<Result<DetectionResult>>>,
    }

    impl ScriptedDetector {
        pub fn new(script: Vec<Result<DetectionResult>>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(Vec::new())
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    pub(crate) fn ok_result(spots: i64) -> DetectionResult {
        DetectionResult {
            spot_count: spots,
            total_tracks: 7,
            filtered_tracks: 5,
            max_frame_gap: 3,
            linking_max_distance: 0.6,
            gap_closing_max_distance: 1.2,
            spots_in_filtered_tracks: 40,
            median_filtering: false,
            min_spots_per_track: 3,
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_result(100)));
            if let Ok(ref result) = next {
                if !result.is_failure() {
                    fs::write(
                        &request.tracks_path,
                        format!("Track Label,Nr Spots\n{}-a,4\n{}-b,6\n", request.ext_recording_name, request.ext_recording_name),
                    )?;
                }
            }
            next
        }
    }

    pub(crate) fn quick_config() -> Config {
        let mut config = Config::default();
        config.general.review_delay_seconds = 0.0;
        config
    }

    fn row(name: &str, threshold: &str) -> ManifestRow {
        ManifestRow::from_pairs(
            ["Recording Name", "Threshold", "Adjuvant", "Process"],
            [name, threshold, "None", "y"],
        )
    }

    struct Fixture {
        images: TempDir,
        experiment: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                images: TempDir::new().unwrap(),
                experiment: TempDir::new().unwrap(),
            };
            fs::create_dir_all(fixture.experiment.path().join("TrackMate Images")).unwrap();
            fixture
        }

        fn add_recording(&self, name: &str, bytes: usize) {
            fs::write(self.images.path().join(format!("{}.nd2", name)), vec![0u8; bytes]).unwrap();
        }

        fn ctx(&self, first: bool) -> ItemContext<'_> {
            ItemContext {
                source_dir: self.images.path(),
                experiment_dir: self.experiment.path(),
                is_first_item: first,
                case_label: "sweep-A",
            }
        }
    }

    #[test]
    fn test_missing_recording_is_not_found() {
        let fixture = Fixture::new();
        let detector = ScriptedDetector::succeeding();
        let config = quick_config();
        let processor = UnitProcessor::new(&detector, &config);

        let outcome = processor.process(row("absent", "5"), &fixture.ctx(true));

        assert_eq!(outcome.status, ProcessingStatus::NotFound);
        assert_eq!(outcome.row.get("Recording Size"), Some("0"));
        assert!(outcome.row.get("Nr Spots").is_none());
        assert_eq!(detector.calls(), 0);
    }

    #[test]
    fn test_success_fills_result_fields() {
        let fixture = Fixture::new();
        fixture.add_recording("rec-1", 128);
        let detector = ScriptedDetector::succeeding();
        let config = quick_config();
        let processor = UnitProcessor::new(&detector, &config);

        let outcome = processor.process(row("rec-1", "5.9"), &fixture.ctx(true));

        assert_eq!(outcome.status, ProcessingStatus::Success);
        let r = &outcome.row;
        assert_eq!(r.get("Recording Size"), Some("128"));
        assert_eq!(r.get("Ext Recording Name"), Some("rec-1-threshold-5"));
        assert_eq!(r.get("Nr Spots"), Some("100"));
        assert_eq!(r.get("Nr Tracks"), Some("5"));
        assert_eq!(r.get("Case"), Some("sweep-A"));
        assert_eq!(r.get("Adjuvant"), Some("No"));
        assert!(r.get("Time Stamp").is_some());
        assert!(r.get("Run Time").is_some());

        let requests = detector.requests.lock().unwrap();
        assert!(requests[0].is_first_item);
        assert_eq!(
            requests[0].tracks_path,
            fixture.experiment.path().join("rec-1-threshold-5-tracks.csv")
        );
        assert_eq!(
            requests[0].image_path,
            fixture
                .experiment
                .path()
                .join("TrackMate Images")
                .join("rec-1-threshold-5.jpg")
        );
    }

    #[test]
    fn test_sentinel_is_failed() {
        let fixture = Fixture::new();
        fixture.add_recording("rec-1", 10);
        let detector = ScriptedDetector::new(vec![Ok(DetectionResult::failed())]);
        let config = quick_config();
        let processor = UnitProcessor::new(&detector, &config);

        let outcome = processor.process(row("rec-1", "5"), &fixture.ctx(false));

        assert_eq!(outcome.status, ProcessingStatus::Failed);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.row.get("Recording Size"), Some("10"));
        assert!(outcome.row.get("Nr Spots").is_none());
    }

    #[test]
    fn test_detector_error_is_failed_with_detail() {
        let fixture = Fixture::new();
        fixture.add_recording("rec-1", 10);
        let detector = ScriptedDetector::new(vec![Err(BatchError::collaborator(
            "paint-detect",
            "crashed",
        ))]);
        let config = quick_config();
        let processor = UnitProcessor::new(&detector, &config);

        let outcome = processor.process(row("rec-1", "5"), &fixture.ctx(false));

        assert_eq!(outcome.status, ProcessingStatus::Failed);
        assert!(outcome.error.unwrap().contains("crashed"));
    }

    #[test]
    fn test_malformed_threshold_is_failed_not_fatal() {
        let fixture = Fixture::new();
        fixture.add_recording("rec-1", 10);
        let detector = ScriptedDetector::succeeding();
        let config = quick_config();
        let processor = UnitProcessor::new(&detector, &config);

        let outcome = processor.process(row("rec-1", "high"), &fixture.ctx(false));

        assert_eq!(outcome.status, ProcessingStatus::Failed);
        assert!(outcome.error.unwrap().contains("Threshold"));
        assert_eq!(detector.calls(), 0);
    }

    #[test]
    fn test_invalid_review_delay_does_not_panic() {
        let fixture = Fixture::new();
        fixture.add_recording("rec-1", 10);
        let detector = ScriptedDetector::succeeding();
        let mut config = quick_config();
        config.general.review_delay_seconds = f64::INFINITY;
        let processor = UnitProcessor::new(&detector, &config);

        let outcome = processor.process(row("rec-1", "5"), &fixture.ctx(true));

        assert_eq!(outcome.status, ProcessingStatus::Success);
    }

    #[test]
    fn test_extended_name_floors_threshold() {
        assert_eq!(extended_name("r", 5.0), "r-threshold-5");
        assert_eq!(extended_name("r", 12.99), "r-threshold-12");
    }

    #[test]
    fn test_reset_image_directory_twice() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("TrackMate Images");

        assert_eq!(reset_image_directory(&dir).unwrap(), 0);
        assert!(dir.is_dir());

        fs::write(dir.join("a.jpg"), "a").unwrap();
        fs::write(dir.join("b.jpg"), "b").unwrap();
        fs::create_dir(dir.join("keep")).unwrap();
        fs::write(dir.join("keep").join("c.jpg"), "c").unwrap();

        assert_eq!(reset_image_directory(&dir).unwrap(), 2);
        assert_eq!(reset_image_directory(&dir).unwrap(), 0);

        let remaining: Vec<_> = fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(remaining.len(), 1);
        assert!(dir.join("keep").join("c.jpg").exists());
    }
}
