//! Colocation Features CLI
//!
//! Pairwise feature extraction from distributed sensor logs.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colocation_features::{
    config::Config,
    orchestrator::{self, parse_pair, WorkerPool},
    ParsePolicy, VERSION,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Grace period for timed-out computations still running at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "colocation-features")]
#[command(version = VERSION)]
#[command(about = "Pairwise feature extraction from distributed sensor logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute features for all planned sensor pairs
    Run {
        #[command(flatten)]
        options: RunOptions,

        /// Write the batch report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the tasks a run would execute
    Plan {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Show the effective configuration
    Config {
        #[command(flatten)]
        options: RunOptions,

        /// Store the effective configuration as the default
        #[arg(long)]
        save: bool,
    },
}

/// Options overriding the configuration file.
#[derive(Args)]
struct RunOptions {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the Sensor-* directories
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Directory receiving the artifacts
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Number of parallel workers (0 = number of CPUs)
    #[arg(long, short)]
    workers: Option<usize>,

    /// Modalities to compute (wifi, ble, temp, hum, press, lux, or all)
    #[arg(long)]
    modalities: Option<String>,

    /// Sensor pair to evaluate, e.g. 01,02 (repeatable)
    #[arg(long = "pair", value_parser = parse_pair)]
    pairs: Vec<(String, String)>,

    /// Time limit per task in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Abort a log on its first malformed line
    #[arg(long)]
    fail_fast: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { options, report } => cmd_run(options, report),
        Commands::Plan { options } => cmd_plan(options),
        Commands::Config { options, save } => cmd_config(options, save),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("colocation_features=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("colocation_features=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the configuration and apply command line overrides.
fn effective_config(options: RunOptions) -> Result<Config> {
    let mut config = match &options.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Could not load configuration from {path:?}"))?,
        None => Config::load().context("Could not load configuration")?,
    };

    if let Some(input) = options.input {
        config.input_root = input;
    }
    if let Some(output) = options.output {
        config.output_root = output;
    }
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    if let Some(modalities) = &options.modalities {
        config.modalities.select_csv(modalities)?;
    }
    if !options.pairs.is_empty() {
        config.pairs = options.pairs;
    }
    if let Some(secs) = options.timeout {
        config.task_timeout = Some(Duration::from_secs(secs));
    }
    if options.fail_fast {
        config.parse_policy = ParsePolicy::FailFast;
    }

    Ok(config)
}

fn cmd_run(options: RunOptions, report_path: Option<PathBuf>) -> Result<ExitCode> {
    let config = effective_config(options)?;
    config.validate()?;
    if !config.modalities.any_enabled() {
        anyhow::bail!("At least one modality must be enabled");
    }

    println!("Colocation Features v{VERSION}");
    println!("  Input: {}", config.input_root.display());
    println!("  Output: {}", config.output_root.display());

    let tasks = orchestrator::plan(&config)?;
    let config = Arc::new(config);
    let pool = WorkerPool::new(config.clone());
    println!("  Tasks: {} on {} workers", tasks.len(), pool.workers());
    println!();

    ctrlc_handler(pool.cancel_flag());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;
    let report = runtime.block_on(pool.run(tasks));
    // Timed-out computations may still be running; do not wait for them.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    println!("{}", report.summary());
    for failure in &report.failures {
        println!("  {}: {:?}", failure.task, failure.outcome);
    }

    if let Some(path) = report_path {
        report
            .save(&path)
            .with_context(|| format!("Could not write report to {path:?}"))?;
        println!("Report written to {path:?}");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_plan(options: RunOptions) -> Result<ExitCode> {
    let config = effective_config(options)?;
    config.validate()?;

    let tasks = orchestrator::plan(&config)?;
    for task in &tasks {
        println!("{:<40} {}", task.label(), task.output_path(&config).display());
    }
    println!();
    println!("{} task(s)", tasks.len());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config(options: RunOptions, save: bool) -> Result<ExitCode> {
    let config = effective_config(options)?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Workers: {}", config.worker_count());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);

    if let Err(e) = config.validate() {
        eprintln!();
        eprintln!("Warning: {e}");
    }

    if save {
        config.save().context("Could not save configuration")?;
        println!();
        println!("Saved to {:?}", Config::config_path());
    }
    Ok(ExitCode::SUCCESS)
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancelled: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        eprintln!("Interrupted, finishing running tasks...");
        cancelled.store(true, Ordering::SeqCst);
    });
    if let Err(e) = result {
        tracing::warn!("Could not install Ctrl+C handler: {}", e);
    }
}
