//! paint-batch - batch orchestration for single-particle tracking recordings
//!
//! Runs the external detector over the selected recordings of an
//! experiment, a sweep of experiments, or a list of projects, and
//! aggregates the results into consolidated CSV files.
//!
//! Exit codes:
//!   0 - Success (every selected item processed)
//!   1 - Runtime error (invalid manifest, config, I/O, etc.)
//!   2 - Run finished but some items were not found or failed

mod analysis;
mod batch;
mod cli;
mod collaborators;
mod config;
mod error;
mod manifest;
mod models;
mod queue;
mod report;
mod sweep;

use analysis::{run_single_experiment, ExperimentRequest};
use anyhow::{anyhow, Context, Result};
use batch::{load_batch_spec, BatchRunner};
use cli::{Args, Command, OutputFormat};
use collaborators::{
    CommandBrightfieldConverter, CommandDetector, CommandOutputCompiler, CommandSquaresGenerator,
    DirectoryStager,
};
use config::{Config, ConfigOverrides, UserDirectories};
use models::ExperimentOutcome;
use queue::RunQueue;
use report::{RunOutcome, RunReport};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sweep::SweepRunner;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// What a queued run hands back to the CLI.
struct RunOutput {
    report: RunReport,
    /// Directories to remember for the next `run`.
    user_directories: Option<UserDirectories>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig { ref path, force } = args.command {
        let path = path.clone().unwrap_or_else(Config::default_path);
        return handle_init_config(&path, force);
    }

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    let log_file = match init_logging(&args, &config) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("paint-batch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_command(args, config, config_path, log_file).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: write a default configuration file.
fn handle_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        eprintln!(
            "⚠️  {} already exists. Use --force to overwrite it.",
            path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("✅ Created {} with default settings.", path.display());
    Ok(())
}

/// Initialize console and log file output.
///
/// Returns the log file the command appends to, if any.
fn init_logging(args: &Args, config: &Config) -> Result<Option<PathBuf>> {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let console_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();
    let console = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(console_filter);

    let (file_layer, log_path) = match args.log_file_name() {
        Some(name) => {
            let dir = config.log_directory();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let path = dir.join(name);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            let file_level = if config.general.verbose {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .with_filter(file_level);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to set tracing subscriber")?;

    Ok(log_path)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        if !config_path.exists() {
            eprintln!(
                "⚠️  Config file {} not found, using defaults",
                config_path.display()
            );
        }
        return Config::load_or_default(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

/// Hand the command to the run queue and wait for it. Returns exit code (0 or 2).
async fn run_command(
    args: Args,
    config: Config,
    config_path: PathBuf,
    log_file: Option<PathBuf>,
) -> Result<i32> {
    let show_progress = !args.quiet;
    let command = args.command.clone();
    let overrides = ConfigOverrides::from_args(&args);
    let job_config_path = config_path.clone();

    let mut queue = RunQueue::start();
    let id = queue.enqueue(move || {
        let job = Job {
            config: &config,
            config_path: &job_config_path,
            overrides,
            log_file,
            show_progress,
        };
        execute(command, job)
    })?;
    debug!("Queued run {}", id);

    let mut results = queue.shutdown().await?;
    let job = results.pop().context("Run queue returned no result")?;
    let output = job
        .result
        .map_err(|e| anyhow!("Run {} aborted: {}", job.id, e))??;

    if let Some(ref dirs) = output.user_directories {
        if let Err(e) = Config::save_user_directories(&config_path, dirs) {
            warn!("Could not save last used directories: {:#}", e);
        }
    }

    if let Some(ref path) = args.summary {
        let content = match args.format {
            OutputFormat::Json => report::generate_json_report(&output.report)?,
            OutputFormat::Markdown => report::generate_markdown_report(&output.report),
        };
        report::write_report(&content, path)?;
        info!("Summary written to {}", path.display());
    }

    if !args.quiet {
        print_summary(&output.report);
    }

    if output.report.needs_attention() {
        return Ok(2);
    }
    Ok(0)
}

/// Settings shared by every command run on the queue.
struct Job<'a> {
    config: &'a Config,
    config_path: &'a Path,
    overrides: ConfigOverrides,
    log_file: Option<PathBuf>,
    show_progress: bool,
}

/// Run one command to completion on the current thread.
fn execute(command: Command, job: Job<'_>) -> Result<RunOutput> {
    let config = job.config;
    let show_progress = job.show_progress;

    match command {
        Command::Run {
            experiment,
            images,
            case,
        } => {
            let experiment_dir = experiment
                .or_else(|| config.user_directories.experiment_directory.clone())
                .context("No experiment directory given and none remembered")?;
            let recordings_dir = images
                .or_else(|| config.user_directories.images_directory.clone())
                .context("No images directory given and none remembered")?;

            let detector = CommandDetector::new(config.collaborators.detector.clone());
            let request = ExperimentRequest {
                experiment_dir: experiment_dir.clone(),
                recordings_dir: recordings_dir.clone(),
                case_label: case,
                show_progress,
            };
            let converter = CommandBrightfieldConverter::new(config.collaborators.brightfield.clone());
            let outcome = run_single_experiment(&request, &detector, &converter, config)
                .with_context(|| format!("Experiment {} failed", experiment_dir.display()))?;

            let summary = match outcome {
                ExperimentOutcome::NothingToProcess => None,
                ExperimentOutcome::Completed(summary) => Some(summary),
            };

            Ok(RunOutput {
                report: RunReport::new(RunOutcome::Experiment { summary }),
                user_directories: Some(UserDirectories {
                    experiment_directory: Some(experiment_dir),
                    images_directory: Some(recordings_dir),
                }),
            })
        }

        Command::Sweep { sweep_file } => {
            let detector = CommandDetector::new(config.collaborators.detector.clone());
            let summary = SweepRunner::new(&detector, config, job.config_path.to_path_buf())
                .with_overrides(job.overrides)
                .with_progress(show_progress)
                .run(&sweep_file)
                .with_context(|| format!("Sweep {} failed", sweep_file.display()))?;

            Ok(RunOutput {
                report: RunReport::new(RunOutcome::Sweep(summary)),
                user_directories: None,
            })
        }

        Command::Batch { spec_file } => {
            let spec = load_batch_spec(&spec_file)
                .with_context(|| format!("Failed to load {}", spec_file.display()))?;

            let stager = DirectoryStager::new();
            let squares = CommandSquaresGenerator::new(config.collaborators.squares.clone());
            let compiler = CommandOutputCompiler::new(config.collaborators.compiler.clone());
            let summary = BatchRunner::new(&stager, &squares, &compiler, config)
                .with_log_file(job.log_file)
                .run(&spec)?;

            Ok(RunOutput {
                report: RunReport::new(RunOutcome::Batch(summary)),
                user_directories: None,
            })
        }

        Command::InitConfig { .. } => Err(anyhow!("init-config does not run through the queue")),
    }
}

/// Print a short summary to stdout.
fn print_summary(report: &RunReport) {
    println!("\n📊 Run Summary:");
    match &report.outcome {
        RunOutcome::Experiment { summary: None } => {
            println!("   No recordings selected for processing");
        }
        RunOutcome::Experiment {
            summary: Some(summary),
        } => {
            println!("   Selected: {}", summary.selected);
            println!(
                "   Processed: {} | Not found: {} | Failed: {}",
                summary.processed, summary.not_found, summary.failed
            );
            println!("   Track rows: {}", summary.tracks_rows);
            if let Some(images) = summary.brightfield_images {
                println!("   Brightfield images converted: {}", images);
            }
        }
        RunOutcome::Sweep(summary) => {
            println!(
                "   Experiments: {} selected, {} processed, {} skipped",
                summary.selected, summary.processed, summary.skipped
            );
        }
        RunOutcome::Batch(summary) => {
            println!(
                "   Projects: {} selected, {} processed, {} errors",
                summary.selected, summary.processed, summary.errors
            );
        }
    }

    if report.needs_attention() {
        println!("\n⚠️  Some items did not complete. Refer to the Paint log for details.");
    } else {
        println!("\n✅ Run complete.");
    }
}
