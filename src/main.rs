//! legisml command line
//!
//! - `run`: build matrices and train the model grid for one experiment
//! - `reconcile`: mark runs left `started` by a crash as failed
//! - `hash`: print the experiment and feature group hashes of a config

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
#[cfg(feature = "compression")]
use legisml::blob::Compression;
use legisml::blob::ProjectStorage;
use legisml::config::ExperimentConfig;
use legisml::orchestrator::{DataSources, ExperimentOrchestrator};
use legisml::registry::{Registry, RunStatus};
use legisml::sources::BillDatabase;
use legisml::temporal::StaticChopper;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "legisml", version, about = "Feature-matrix cache and model registry for bill issue classification")]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Directory for run-scoped log files
    #[arg(long, default_value = "logs", global = true)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Experiment YAML
    #[arg(short, long)]
    config: PathBuf,

    /// Project root: a local path or an object-store URI
    #[arg(short, long)]
    project: String,

    /// Registry database
    #[arg(long, env = "LEGISML_REGISTRY")]
    registry: PathBuf,

    /// Bill-tracking database (cohorts, labels, text)
    #[arg(long, env = "LEGISML_BILLS")]
    bills: Option<PathBuf>,

    /// Time splits produced by the temporal chopper (JSON)
    #[arg(long)]
    splits: Option<PathBuf>,

    /// Reuse the matrices of an earlier experiment instead of building
    #[arg(long, value_name = "EXPERIMENT_HASH")]
    reuse_matrices_from: Option<String>,

    /// Compress stored blobs (lz4 or zstd); readers must pass the same value
    #[cfg(feature = "compression")]
    #[arg(long, env = "LEGISML_COMPRESSION")]
    compression: Option<Compression>,
}

impl RunArgs {
    fn storage(&self) -> Result<ProjectStorage> {
        let storage = ProjectStorage::open(&self.project, None)
            .with_context(|| format!("opening project {}", self.project))?;
        #[cfg(feature = "compression")]
        let storage = match self.compression {
            Some(compression) => storage.compressed(compression),
            None => storage,
        };
        Ok(storage)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment
    Run(RunArgs),

    /// Mark orphaned `started` runs as failed
    Reconcile {
        /// Registry database
        #[arg(long, env = "LEGISML_REGISTRY")]
        registry: PathBuf,

        /// Runs started longer ago than this are orphaned
        #[arg(long, default_value_t = 24)]
        timeout_hours: i64,
    },

    /// Print the hashes a config would be registered under
    Hash {
        /// Experiment YAML
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Log to stdout and, when given, to a file; returns the file path
fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<Option<String>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("legisml={level}")))
    };
    let stdout = fmt::layer().with_target(false).with_filter(filter());

    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating log directory {}", dir.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(filter());
            tracing_subscriber::registry()
                .with(stdout)
                .with(file_layer)
                .init();
            Ok(Some(path.display().to_string()))
        }
        None => {
            tracing_subscriber::registry().with(stdout).init();
            Ok(None)
        }
    }
}

fn run(cli_log_level: &str, log_dir: &Path, args: RunArgs) -> Result<()> {
    let stamp = chrono::Utc::now().format("%y%m%d%H%M%S");
    let log_file = log_dir.join(format!("legisml_{stamp}.log"));
    let log_location = init_tracing(cli_log_level, Some(&log_file))?;

    let config = ExperimentConfig::from_file(&args.config)?;
    let registry = Registry::open(&args.registry)
        .with_context(|| format!("opening registry {}", args.registry.display()))?;
    let storage = args.storage()?;

    let mut builder = ExperimentOrchestrator::builder(config.clone(), registry, storage);
    if let Some(log) = log_location {
        builder = builder.log_location(log);
    }

    builder = match args.reuse_matrices_from {
        Some(hash) => builder.reuse_matrices_from(hash),
        None => {
            let bills = args.bills.as_deref().context("--bills is required to build matrices")?;
            let splits = args.splits.as_deref().context("--splits is required to build matrices")?;
            let database = Rc::new(
                BillDatabase::open(bills)
                    .with_context(|| format!("opening bill database {}", bills.display()))?
                    .with_cohort_query(config.cohort_query()?),
            );
            builder
                .chopper(Box::new(StaticChopper::from_file(splits)?))
                .sources(DataSources {
                    cohort: Box::new(Rc::clone(&database)),
                    labels: Box::new(Rc::clone(&database)),
                    text: Box::new(database),
                })
        }
    };

    let summary = builder.build()?.run()?;
    info!(
        experiment_hash = %summary.experiment_hash,
        run_id = summary.run_id,
        status = %summary.status,
        "done"
    );
    println!("experiment {}", summary.experiment_hash);
    println!("run        {} ({})", summary.run_id, summary.status);
    println!(
        "splits     {} ({} reused, {} skipped)",
        summary.matrix_pairs.len(),
        summary.splits_reused,
        summary.splits_skipped
    );
    println!(
        "grid       {}/{} cells, {} predictions",
        summary.grid.cells_succeeded, summary.grid.cells_attempted, summary.grid.predictions_written
    );
    for failure in &summary.grid.failures {
        println!(
            "  skipped  {} {} {} split {}: {}",
            failure.issue_area,
            failure.model_type,
            failure.hyperparameters,
            failure.time_split_index,
            failure.error
        );
    }

    if summary.status == RunStatus::Failed {
        anyhow::bail!("no grid cell succeeded");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(&cli.log_level, &cli.log_dir, args),
        Commands::Reconcile {
            registry,
            timeout_hours,
        } => {
            init_tracing(&cli.log_level, None)?;
            let registry = Registry::open(&registry)
                .with_context(|| format!("opening registry {}", registry.display()))?;
            let reconciled = registry.reconcile_orphaned_runs(chrono::Duration::hours(timeout_hours))?;
            println!("{reconciled} orphaned run(s) marked failed");
            Ok(())
        }
        Commands::Hash { config } => {
            let config = ExperimentConfig::from_file(&config)?;
            println!("experiment    {}", config.experiment_hash()?);
            println!("feature_group {}", config.feature_group_hash()?);
            Ok(())
        }
    }
}
