//! sdfdb-ingest - load SD files into SQLite

use anyhow::{Context, Result};
use clap::Parser;
use sdfdb_common::logging::{init_logging, LogConfig, LogLevel};
use sdfdb_ingest::{
    ingest, source, IngestConfig, MemorySink, Orchestrator, RunStatus, RunSummary, SchemaSpec,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sdfdb-ingest")]
#[command(author, version, about = "Load SD files into a SQLite database")]
struct Cli {
    /// SD files, or directories holding *.sdf / *.sdf.gz files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON layout describing the output table (default: bundled PubChem layout)
    #[arg(short, long, env = "SDFDB_LAYOUT")]
    layout: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output table name, overriding the layout
    #[arg(long)]
    table: Option<String>,

    /// Drop the output table and ledger before loading
    #[arg(long)]
    reset: bool,

    /// Rows per transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Files read in parallel
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Batches that may wait for the writer
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Scratch directory for index builds
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Timeout for a single database call, in seconds
    #[arg(long)]
    sink_timeout: Option<u64>,

    /// Load files even if the ledger says they are already loaded
    #[arg(long)]
    no_skip_loaded: bool,

    /// Validate the layout and exit
    #[arg(long)]
    check_layout: bool,

    /// Parse, map and validate everything without writing a database
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command-line flags win over `SDFDB_*` variables
    fn apply(&self, mut config: IngestConfig) -> IngestConfig {
        if let Some(ref path) = self.database {
            config = config.with_database(path);
        }
        if let Some(ref table) = self.table {
            config = config.with_table(table);
        }
        if self.reset {
            config = config.with_reset(true);
        }
        if let Some(n) = self.batch_size {
            config = config.with_batch_size(n);
        }
        if let Some(n) = self.jobs {
            config = config.with_max_parallel_files(n);
        }
        if let Some(n) = self.queue_capacity {
            config = config.with_queue_capacity(n);
        }
        if let Some(ref dir) = self.temp_dir {
            config = config.with_temp_dir(dir);
        }
        if let Some(secs) = self.sink_timeout {
            config = config.with_sink_timeout(Duration::from_secs(secs));
        }
        if self.no_skip_loaded {
            config = config.with_skip_loaded_files(false);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the defaults chosen here
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sdfdb-ingest")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = cli.apply(IngestConfig::from_env().context("Invalid SDFDB_* environment")?);
    config.validate()?;

    let schema = match cli.layout {
        Some(ref path) => SchemaSpec::load_file(path)
            .with_context(|| format!("Invalid layout {}", path.display()))?,
        None => SchemaSpec::pubchem().context("Invalid bundled layout")?,
    };

    if cli.check_layout {
        println!(
            "Layout OK: table '{}', {} columns, {} indexed",
            schema.table(),
            schema.columns().len(),
            schema.indexed_columns().count()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, committing queued rows before stopping");
                cancel.cancel();
            }
        }
    });

    let summary = if cli.dry_run {
        info!("Dry run, nothing will be written");
        dry_run(config, schema, &cli.inputs, cancel).await?
    } else {
        info!(database = %config.database_path.display(), "Ingesting");
        ingest(&config, schema, &cli.inputs, cancel).await?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(match summary.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::FAILURE,
        RunStatus::Cancelled => ExitCode::from(130),
    })
}

/// Run the whole pipeline into an in-memory sink
async fn dry_run(
    config: IngestConfig,
    schema: SchemaSpec,
    inputs: &[PathBuf],
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let schema = match config.table {
        Some(ref table) => schema.with_table(table.clone())?,
        None => schema,
    };
    let sources = source::discover(inputs)?;
    let summary = Orchestrator::new(config, schema, Arc::new(MemorySink::new()))
        .with_cancellation(cancel)
        .run(sources)
        .await;
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    let stats = &summary.stats;
    println!("Run {} {} in {:.1}s", summary.run_id, summary.status, summary.elapsed_ms as f64 / 1000.0);
    println!("  table:             {}", summary.table);
    println!("  files:             {} ({} already loaded)", stats.files.len(), stats.files_skipped);
    println!("  records seen:      {}", stats.seen);
    println!("  accepted:          {}", stats.accepted);
    println!("  rejected:          {}", stats.rejected);
    for (reason, n) in &stats.rejections {
        println!("    {:<24}{}", reason.as_str(), n);
    }
    println!("  parse errors:      {}", stats.parse_errors);
    println!("  coercion failures: {}", stats.coercion_failures);
    println!("  rows committed:    {} in {} batches", stats.rows_committed, stats.batches_committed);
    println!("  indexes built:     {}", stats.indexes_built);
    if let Some(ref error) = summary.error {
        println!("  error:             {}", error);
    }
}
