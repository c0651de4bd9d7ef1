//! Run summaries written after a command finishes.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, write_report};

use crate::models::{BatchSummary, ExperimentSummary, SweepSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub version: String,
    pub outcome: RunOutcome,
}

/// Per-command totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RunOutcome {
    /// `None` when nothing was selected.
    Experiment { summary: Option<ExperimentSummary> },
    Sweep(SweepSummary),
    Batch(BatchSummary),
}

impl RunReport {
    pub fn new(outcome: RunOutcome) -> Self {
        Self {
            generated_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            outcome,
        }
    }

    /// True when the run finished but some items did not succeed.
    pub fn needs_attention(&self) -> bool {
        match &self.outcome {
            RunOutcome::Experiment { summary } => {
                summary.as_ref().is_some_and(|s| s.has_non_success())
            }
            RunOutcome::Sweep(summary) => summary.needs_attention(),
            RunOutcome::Batch(summary) => summary.errors > 0,
        }
    }
}
