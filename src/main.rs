//! Binary entry point for dupscan.
//!
//! This binary provides the CLI interface for the duplicate detection engine.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dupscan::config::DupscanConfig;
use dupscan::observability::{self, ObservabilityConfig};
use dupscan::services::{CancellationFlag, DetectionTaskManager, DuplicateGroupRegistry};
use dupscan::storage::read_csv_file;
use dupscan::{
    AdmissionGate, DetectionRequest, EntityType, GroupId, GroupStatus, SimilarityScorer,
    SimilarityWeights, SqliteStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// How often `detect` polls task status.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Dupscan - fuzzy duplicate detection for business master data.
#[derive(Parser)]
#[command(name = "dupscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "DUPSCAN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to the `SQLite` database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Compare two strings.
    Compare {
        /// First string.
        a: String,

        /// Second string.
        b: String,

        /// Weights as name=value pairs, e.g. `jaro_winkler=0.5,jaccard=0.5`.
        #[arg(short, long)]
        weights: Option<String>,
    },

    /// Import candidate records from a CSV file.
    Import {
        /// CSV file with `id` and `name` columns.
        #[arg(short, long)]
        input: PathBuf,

        /// Project the records belong to.
        #[arg(short, long)]
        project: i64,

        /// Entity type: counterparty or nomenclature.
        #[arg(short, long, default_value = "counterparty")]
        entity: EntityType,
    },

    /// Run duplicate detection on a project.
    Detect {
        /// Project to scan.
        #[arg(short, long)]
        project: i64,

        /// Entity type: counterparty or nomenclature.
        #[arg(short, long, default_value = "counterparty")]
        entity: EntityType,

        /// Match threshold in (0, 1]. Defaults to the configured threshold.
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Candidate page size.
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Use advanced weights and token blocking.
        #[arg(long)]
        advanced: bool,

        /// Stop after scanning this many records (0 = no limit).
        #[arg(long)]
        max_items: Option<usize>,
    },

    /// Review duplicate groups.
    Groups {
        /// Group subcommand.
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Manage configuration.
    Config {
        /// Show current configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Group subcommands.
#[derive(Subcommand)]
enum GroupAction {
    /// List groups of a project.
    List {
        /// Project ID.
        #[arg(short, long)]
        project: i64,

        /// Status filter: open, resolved, or deleted.
        #[arg(short, long, default_value = "open")]
        status: GroupStatus,
    },

    /// Mark a group resolved without merging.
    Resolve {
        /// Project ID.
        #[arg(short, long)]
        project: i64,

        /// Group ID.
        group: String,
    },

    /// Merge records into a master record.
    Merge {
        /// Project ID.
        #[arg(short, long)]
        project: i64,

        /// Surviving record.
        #[arg(short, long)]
        master: i64,

        /// Records to absorb (comma-separated).
        #[arg(long, value_delimiter = ',', required = true)]
        merge: Vec<i64>,
    },

    /// Dismiss a group as a false positive.
    Delete {
        /// Project ID.
        #[arg(short, long)]
        project: i64,

        /// Group ID.
        group: String,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match DupscanConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(ObservabilityConfig::from_config(
        &config,
        cli.verbose,
    )) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(cli: Cli, mut config: DupscanConfig) -> Result<()> {
    if let Some(db) = cli.db {
        config = config.with_db_path(db);
    }

    match cli.command {
        Commands::Compare { a, b, weights } => cmd_compare(&config, &a, &b, weights.as_deref()),
        Commands::Import {
            input,
            project,
            entity,
        } => cmd_import(&config, input, project, entity),
        Commands::Detect {
            project,
            entity,
            threshold,
            batch_size,
            advanced,
            max_items,
        } => {
            let threshold = threshold.unwrap_or(config.detection.default_threshold);
            let mut request = DetectionRequest::new(project, entity, threshold)
                .with_advanced_weights(advanced);
            if let Some(batch_size) = batch_size {
                request = request.with_batch_size(batch_size);
            }
            if let Some(max_items) = max_items {
                request = request.with_max_items(max_items);
            }
            cmd_detect(&config, request).await
        },
        Commands::Groups { action } => cmd_groups(&config, action),
        Commands::Config { show } => cmd_config(&config, show),
    }
}

fn open_store(config: &DupscanConfig) -> Result<Arc<SqliteStore>> {
    let path = config
        .storage
        .db_path
        .clone()
        .or_else(SqliteStore::default_path)
        .context("no database path configured and no platform data directory")?;
    let store = SqliteStore::new(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn cmd_compare(config: &DupscanConfig, a: &str, b: &str, weights: Option<&str>) -> Result<()> {
    let scorer = SimilarityScorer::new(config.similarity.clone())?;
    let weights = match weights {
        Some(pairs) => SimilarityWeights::parse_pairs(pairs)?,
        None => scorer.default_weights(),
    };
    let result = scorer.compare(a, b, &weights)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_import(
    config: &DupscanConfig,
    input: PathBuf,
    project: i64,
    entity: EntityType,
) -> Result<()> {
    let records = read_csv_file(&input, project, entity)?;
    let store = open_store(config)?;
    let written = store.upsert_records(&records)?;
    println!("Imported {written} records into project {project} ({entity})");
    Ok(())
}

async fn cmd_detect(config: &DupscanConfig, request: DetectionRequest) -> Result<()> {
    let store = open_store(config)?;
    let manager = DetectionTaskManager::new(
        store.clone(),
        store,
        SimilarityScorer::new(config.similarity.clone())?,
        AdmissionGate::named(config.admission, "detection"),
        config.detection,
    );

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        if on_interrupt.cancel() {
            eprintln!("Cancelling after the current batch...");
        }
    })
    .context("installing Ctrl-C handler")?;

    let started = manager.start_detection_with_cancel(request, cancel).await?;
    eprintln!("Task {} {}", started.task_id, started.status);

    let mut last_scanned = 0;
    let task = loop {
        let task = manager.get_task_status(&started.task_id)?;
        if task.status.is_terminal() {
            break task;
        }
        if task.progress.scanned != last_scanned {
            last_scanned = task.progress.scanned;
            let total = task
                .progress
                .total
                .map_or_else(String::new, |t| format!("/{t}"));
            eprintln!(
                "  scanned {}{total} compared {} groups {}",
                task.progress.scanned, task.progress.compared, task.progress.groups_found
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    println!("{}", serde_json::to_string_pretty(&task)?);
    if let Some(error) = &task.error {
        bail!("detection failed: {error}");
    }
    Ok(())
}

fn cmd_groups(config: &DupscanConfig, action: GroupAction) -> Result<()> {
    let registry = DuplicateGroupRegistry::new(open_store(config)?);
    match action {
        GroupAction::List { project, status } => {
            let groups = registry.list_groups(project, Some(status))?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        },
        GroupAction::Resolve { project, group } => {
            let master = registry.resolve_group(project, &GroupId::new(group))?;
            println!("{}", serde_json::to_string_pretty(&master)?);
        },
        GroupAction::Merge {
            project,
            master,
            merge,
        } => {
            let merged = registry.merge_group(project, master, &merge)?;
            println!("{}", serde_json::to_string_pretty(&merged)?);
        },
        GroupAction::Delete { project, group } => {
            registry.delete_group(project, &GroupId::new(group.clone()))?;
            println!("Group {group} dismissed");
        },
    }
    Ok(())
}

fn cmd_config(config: &DupscanConfig, show: bool) -> Result<()> {
    if show {
        print!("{}", config.to_toml()?);
    } else if let Some(path) = DupscanConfig::default_path() {
        println!("Config file: {}", path.display());
        println!("Use --show to print the effective configuration.");
    }
    Ok(())
}
