//! External collaborators.
//!
//! The engine talks to detection, brightfield conversion, staging, squares
//! generation and output compilation through these traits only.
//! Process-backed implementations live in [`command`]; the native directory
//! stager lives in [`stager`].

pub mod command;
pub mod stager;

pub use command::{
    CommandBrightfieldConverter, CommandDetector, CommandOutputCompiler, CommandSquaresGenerator,
};
pub use stager::DirectoryStager;

use crate::error::Result;
use crate::models::{DetectionResult, SelectParameters};
use std::path::{Path, PathBuf};

/// Inputs for one detector invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    /// Extended recording name, `<name>-threshold-<n>`.
    pub ext_recording_name: String,
    /// Path of the raw recording.
    pub recording_path: PathBuf,
    pub threshold: f64,
    /// Where the detector writes its per-recording track file.
    pub tracks_path: PathBuf,
    /// Where the detector writes its rendered image.
    pub image_path: PathBuf,
    /// True for the first selected recording of an experiment.
    pub is_first_item: bool,
    pub display: bool,
}

/// Extracts spot and track statistics from one recording.
///
/// A `-1` spot or track count in the returned result signals failure;
/// `Err` is reserved for the detector not running at all.
pub trait Detector: Send + Sync {
    fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult>;
}

/// Converts the brightfield images of a recording directory for review.
pub trait BrightfieldConverter: Send + Sync {
    /// Returns the number of images converted into `dest`.
    fn convert(&self, source: &Path, dest: &Path, force: bool) -> Result<usize>;
}

/// Copies raw project data from a source tree into a destination tree.
pub trait Stager: Send + Sync {
    fn stage(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// Runs squares analysis over a staged project.
pub trait SquaresGenerator: Send + Sync {
    /// Returns the number of experiments actually processed.
    fn analyze(
        &self,
        project: &Path,
        parameters: &SelectParameters,
        nr_of_squares: u32,
        min_required_r_squared: f64,
        min_tracks_for_tau: u32,
        force: bool,
    ) -> Result<usize>;
}

/// Compiles project-level output files.
pub trait OutputCompiler: Send + Sync {
    fn compile(&self, project: &Path, verbose: bool) -> Result<()>;
}
