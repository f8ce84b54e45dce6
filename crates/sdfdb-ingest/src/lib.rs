//! sdfdb ingest library
//!
//! Loads chemical structure collections (SD files, plain or gzipped) into a
//! SQLite table whose columns are described by a JSON layout.
//!
//! # Pipeline
//!
//! - [`reader`]: streams records out of a decompressed SD file
//! - [`mapper`]: projects a record onto the layout's columns
//! - [`validator`]: enforces NOT NULL and primary-key uniqueness
//! - [`loader`]: commits rows in batches, builds indexes at the end
//! - [`orchestrator`]: runs all of the above over many files at once
//!
//! # Example
//!
//! ```no_run
//! use sdfdb_ingest::{ingest, IngestConfig, SchemaSpec};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::default().with_database("./pubchem.sqlite");
//!     let schema = SchemaSpec::pubchem()?;
//!     let summary = ingest(&config, schema, &["./sdf".into()], CancellationToken::new()).await?;
//!     println!("{} rows loaded", summary.stats.rows_committed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod loader;
pub mod mapper;
pub mod orchestrator;
pub mod reader;
pub mod schema;
pub mod sink;
pub mod source;
pub mod stats;
pub mod validator;
pub mod value;

pub use config::IngestConfig;
pub use error::IngestError;
pub use loader::{BatchLoader, LoadError};
pub use mapper::{CandidateRow, RecordMapper};
pub use orchestrator::Orchestrator;
pub use reader::{ParseError, RawRecord, RecordReader};
pub use schema::{ColumnSpec, Dtype, SchemaError, SchemaSpec, Transform};
pub use sink::{MemorySink, RowSink, SinkError, SqliteSink};
pub use source::SourceFile;
pub use stats::{RunStatistics, RunStatus, RunSummary};
pub use validator::{PrimaryKeyRegistry, RejectReason, RowValidator};
pub use value::Value;

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Load `inputs` into the SQLite database named by `config`
///
/// Errors are returned only for problems found before loading starts
/// (configuration, inputs, opening the database). Everything after that is
/// reported through the summary's status.
pub async fn ingest(
    config: &IngestConfig,
    schema: SchemaSpec,
    inputs: &[PathBuf],
    cancel: CancellationToken,
) -> Result<RunSummary, IngestError> {
    config
        .validate()
        .map_err(|e| IngestError::Config(format!("{:#}", e)))?;

    let schema = match &config.table {
        Some(table) => schema.with_table(table.clone())?,
        None => schema,
    };
    let sources = source::discover(inputs)?;

    let sink = SqliteSink::connect(&config.database_path, config.temp_dir.as_deref()).await?;
    let summary = Orchestrator::new(config.clone(), schema, Arc::new(sink.clone()))
        .with_cancellation(cancel)
        .run(sources)
        .await;
    sink.close().await;

    Ok(summary)
}
