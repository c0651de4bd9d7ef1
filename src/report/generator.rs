//! Markdown and JSON rendering of run reports.

use super::{RunOutcome, RunReport};
use crate::models::{format_time_nicely, BatchSummary, ExperimentSummary, SweepSummary};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str("# Paint Batch Report\n\n");
    output.push_str(&generate_metadata_section(report));

    match &report.outcome {
        RunOutcome::Experiment { summary: None } => {
            output.push_str("## Experiment\n\nNo recordings were selected for processing.\n\n");
        }
        RunOutcome::Experiment {
            summary: Some(summary),
        } => {
            output.push_str("## Experiment\n\n");
            output.push_str(&generate_experiment_table(std::slice::from_ref(summary)));
        }
        RunOutcome::Sweep(summary) => output.push_str(&generate_sweep_section(summary)),
        RunOutcome::Batch(summary) => output.push_str(&generate_batch_section(summary)),
    }

    if report.needs_attention() {
        output.push_str("> **Attention:** some items did not complete successfully. ");
        output.push_str("Refer to the Paint log for details.\n\n");
    }

    output
}

fn generate_metadata_section(report: &RunReport) -> String {
    let mut section = String::new();

    let command = match report.outcome {
        RunOutcome::Experiment { .. } => "run",
        RunOutcome::Sweep(_) => "sweep",
        RunOutcome::Batch(_) => "batch",
    };

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Command:** `{}`\n", command));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Version:** {}\n\n", report.version));

    section
}

fn generate_experiment_table(experiments: &[ExperimentSummary]) -> String {
    let mut table = String::new();

    table.push_str("| Experiment | Case | Selected | Processed | Not Found | Failed | Track Rows | Duration |\n");
    table.push_str("|:---|:---|:---:|:---:|:---:|:---:|:---:|:---|\n");

    for e in experiments {
        table.push_str(&format!(
            "| `{}` | {} | {} | {} | {} | {} | {} | {} |\n",
            e.experiment_dir.display(),
            e.case_label,
            e.selected,
            e.processed,
            e.not_found,
            e.failed,
            e.tracks_rows,
            format_time_nicely(e.duration_seconds)
        ));
    }
    table.push('\n');

    table
}

fn generate_sweep_section(summary: &SweepSummary) -> String {
    let mut section = String::new();

    section.push_str("## Sweep\n\n");
    section.push_str(&format!("- **Selected:** {}\n", summary.selected));
    section.push_str(&format!("- **Processed:** {}\n", summary.processed));
    section.push_str(&format!("- **Skipped:** {}\n", summary.skipped));
    section.push_str(&format!(
        "- **Duration:** {}\n\n",
        format_time_nicely(summary.duration_seconds)
    ));

    if !summary.experiments.is_empty() {
        section.push_str("### Experiments\n\n");
        section.push_str(&generate_experiment_table(&summary.experiments));
    }

    section
}

fn generate_batch_section(summary: &BatchSummary) -> String {
    let mut section = String::new();

    section.push_str("## Projects\n\n");
    section.push_str(&format!("- **Selected:** {}\n", summary.selected));
    section.push_str(&format!("- **Processed:** {}\n", summary.processed));
    section.push_str(&format!("- **Errors:** {}\n", summary.errors));
    section.push_str(&format!(
        "- **Duration:** {}\n",
        format_time_nicely(summary.duration_seconds)
    ));
    if let Some(ref log) = summary.archived_log {
        section.push_str(&format!("- **Archived log:** `{}`\n", log.display()));
    }
    section.push('\n');

    section
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write already rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
