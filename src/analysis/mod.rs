//! Recording analysis.
//!
//! Per-recording processing, result aggregation and the experiment loop
//! that combines them.

pub mod aggregator;
pub mod experiment;
pub mod processor;

pub use experiment::{run_experiment, run_single_experiment, ExperimentRequest};
