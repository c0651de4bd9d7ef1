//! Collaborators backed by external programs.
//!
//! Each program is invoked synchronously with no timeout. A hung program
//! stalls the batch.

use super::{BrightfieldConverter, DetectionRequest, Detector, OutputCompiler, SquaresGenerator};
use crate::error::{BatchError, Result};
use crate::models::{DetectionResult, SelectParameters};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Run `program` with `args`, returning stdout on a zero exit status.
fn run_program(program: &str, args: &[OsString]) -> Result<String> {
    debug!("Running {} {:?}", program, args);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| BatchError::collaborator(program, format!("could not start: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BatchError::collaborator(
            program,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs the detector program and parses its JSON result from stdout.
///
/// Invocation: `<program> --recording P --name N --threshold T --tracks P --image P [--first] [--display]`.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn arguments(request: &DetectionRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--recording".into(),
            request.recording_path.clone().into(),
            "--name".into(),
            request.ext_recording_name.clone().into(),
            "--threshold".into(),
            request.threshold.to_string().into(),
            "--tracks".into(),
            request.tracks_path.clone().into(),
            "--image".into(),
            request.image_path.clone().into(),
        ];
        if request.is_first_item {
            args.push("--first".into());
        }
        if request.display {
            args.push("--display".into());
        }
        args
    }
}

impl Detector for CommandDetector {
    fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult> {
        let stdout = run_program(&self.program, &Self::arguments(request))?;
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| BatchError::collaborator(&self.program, "produced no output"))?;
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Runs the squares generator program; it prints the number of processed
/// experiments as its last line.
#[derive(Debug, Clone)]
pub struct CommandSquaresGenerator {
    program: String,
}

impl CommandSquaresGenerator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SquaresGenerator for CommandSquaresGenerator {
    fn analyze(
        &self,
        project: &Path,
        parameters: &SelectParameters,
        nr_of_squares: u32,
        min_required_r_squared: f64,
        min_tracks_for_tau: u32,
        force: bool,
    ) -> Result<usize> {
        let mut args: Vec<OsString> = vec![
            "--project".into(),
            project.into(),
            "--parameters".into(),
            serde_json::to_string(parameters)?.into(),
            "--nr-of-squares".into(),
            nr_of_squares.to_string().into(),
            "--min-r-squared".into(),
            min_required_r_squared.to_string().into(),
            "--min-tracks-for-tau".into(),
            min_tracks_for_tau.to_string().into(),
        ];
        if force {
            args.push("--force".into());
        }

        let stdout = run_program(&self.program, &args)?;
        parse_count(&self.program, &stdout, "an experiment count")
    }
}

/// Parse the count a program prints as its last non-empty line.
fn parse_count(program: &str, stdout: &str, what: &str) -> Result<usize> {
    let last = stdout.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    last.trim().parse::<usize>().map_err(|_| {
        BatchError::collaborator(program, format!("expected {}, got '{}'", what, last.trim()))
    })
}

/// Runs the brightfield conversion program; it prints the number of
/// converted images as its last line.
///
/// Invocation: `<program> --source DIR --dest DIR [--force]`.
#[derive(Debug, Clone)]
pub struct CommandBrightfieldConverter {
    program: String,
}

impl CommandBrightfieldConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl BrightfieldConverter for CommandBrightfieldConverter {
    fn convert(&self, source: &Path, dest: &Path, force: bool) -> Result<usize> {
        let mut args: Vec<OsString> = vec![
            "--source".into(),
            source.into(),
            "--dest".into(),
            dest.into(),
        ];
        if force {
            args.push("--force".into());
        }

        let stdout = run_program(&self.program, &args)?;
        parse_count(&self.program, &stdout, "an image count")
    }
}

/// Runs the output compilation program.
#[derive(Debug, Clone)]
pub struct CommandOutputCompiler {
    program: String,
}

impl CommandOutputCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl OutputCompiler for CommandOutputCompiler {
    fn compile(&self, project: &Path, verbose: bool) -> Result<()> {
        let mut args: Vec<OsString> = vec!["--project".into(), project.into()];
        if verbose {
            args.push("--verbose".into());
        }
        run_program(&self.program, &args).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(first: bool) -> DetectionRequest {
        DetectionRequest {
            ext_recording_name: "rec-1-threshold-5".to_string(),
            recording_path: PathBuf::from("/img/rec-1.nd2"),
            threshold: 5.5,
            tracks_path: PathBuf::from("/exp/rec-1-threshold-5-tracks.csv"),
            image_path: PathBuf::from("/exp/TrackMate Images/rec-1-threshold-5.jpg"),
            is_first_item: first,
            display: false,
        }
    }

    #[test]
    fn test_detector_arguments() {
        let args = CommandDetector::arguments(&request(true));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "--recording");
        assert!(args.contains(&"rec-1-threshold-5".to_string()));
        assert!(args.contains(&"5.5".to_string()));
        assert!(args.contains(&"--first".to_string()));
        assert!(!args.contains(&"--display".to_string()));

        let later = CommandDetector::arguments(&request(false));
        assert!(!later.iter().any(|a| a == "--first"));
    }

    #[test]
    fn test_missing_program_is_collaborator_error() {
        let detector = CommandDetector::new("paint-batch-no-such-program");
        let err = detector.detect(&request(false)).unwrap_err();
        assert!(matches!(err, BatchError::Collaborator { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_squares_generator_parses_last_line() {
        // `echo` prints its arguments; the trailing line is not a count.
        let generator = CommandSquaresGenerator::new("echo");
        let params = SelectParameters {
            min_required_density_ratio: 2.0,
            max_allowable_variability: 10.0,
            min_track_duration: 0.0,
            max_track_duration: 100.0,
            min_required_r_squared: 0.9,
            neighbour_mode: "Free".to_string(),
        };
        let err = generator
            .analyze(Path::new("/p"), &params, 20, 0.9, 20, false)
            .unwrap_err();
        assert!(err.to_string().contains("expected an experiment count"));
    }

    #[test]
    fn test_parse_count_uses_last_line() {
        assert_eq!(parse_count("p", "converting\n12\n\n", "a count").unwrap(), 12);
        let err = parse_count("p", "done\n", "an image count").unwrap_err();
        assert!(err.to_string().contains("expected an image count, got 'done'"));
    }

    #[cfg(unix)]
    #[test]
    fn test_brightfield_converter_passes_paths() {
        // `echo` prints its arguments, so the last line is not a count.
        let converter = CommandBrightfieldConverter::new("echo");
        let err = converter
            .convert(Path::new("/img"), Path::new("/exp"), true)
            .unwrap_err();
        assert!(err.to_string().contains("--source /img --dest /exp --force"));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_compiler_runs_program() {
        let compiler = CommandOutputCompiler::new("true");
        assert!(compiler.compile(Path::new("/p"), true).is_ok());

        let failing = CommandOutputCompiler::new("false");
        assert!(failing.compile(Path::new("/p"), true).is_err());
    }
}
