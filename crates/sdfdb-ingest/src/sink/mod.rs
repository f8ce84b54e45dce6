//! Relational sinks
//!
//! The loader only talks to a [`RowSink`]. Two implementations ship:
//!
//! - [`SqliteSink`]: the real output, a SQLite database through sqlx
//! - [`MemorySink`]: keeps everything in memory, records every call and can
//!   be told to fail on a given row; used by tests and dry runs

mod memory;
pub mod sql;
mod sqlite;

pub use memory::{MemorySink, SinkEvent};
pub use sqlite::SqliteSink;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

use crate::schema::{ColumnSpec, SchemaSpec};
use crate::validator::AcceptedRow;
use crate::value::PrimaryKey;

/// Name of the table that tracks which input files were loaded
pub const LEDGER_TABLE: &str = "sdf_file";

#[derive(Debug, Error)]
pub enum SinkError {
    /// A row of the batch was refused; the whole batch was rolled back
    #[error("row {row} of the batch was refused: {message}")]
    Row { row: usize, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// Whether `create_table` made a new table or found one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Created,
    Existing,
}

/// One ledger row: an input file whose rows are committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub filename: String,
    pub lowest_cid: Option<i64>,
    pub highest_cid: Option<i64>,
    pub date_added: NaiveDate,
    pub n_compounds: u64,
}

/// Destination of accepted rows
///
/// Calls are serialised by the loader; implementations need not handle
/// concurrent writers.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Drop the output table and the ledger
    async fn drop_tables(&self, schema: &SchemaSpec) -> Result<(), SinkError>;

    /// Create the output table and the ledger unless they exist
    async fn create_table(&self, schema: &SchemaSpec) -> Result<TableStatus, SinkError>;

    /// Insert all rows in one transaction; nothing is kept if any row fails
    async fn insert_batch(&self, schema: &SchemaSpec, rows: &[AcceptedRow])
        -> Result<(), SinkError>;

    /// Build the secondary index for one column
    async fn create_index(&self, schema: &SchemaSpec, column: &ColumnSpec)
        -> Result<(), SinkError>;

    /// Primary-key values already stored in the output table
    async fn primary_keys(&self, _schema: &SchemaSpec) -> Result<Vec<PrimaryKey>, SinkError> {
        Ok(Vec::new())
    }

    /// File names already recorded in the ledger
    async fn loaded_sources(&self) -> Result<HashSet<String>, SinkError> {
        Ok(HashSet::new())
    }

    async fn record_source(&self, _entry: &SourceEntry) -> Result<(), SinkError> {
        Ok(())
    }
}
