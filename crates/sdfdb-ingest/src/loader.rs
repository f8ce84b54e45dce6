//! Batched, transactional loading into a [`RowSink`]
//!
//! Accepted rows are buffered and written in batches of `batch_size`, one
//! sink transaction per batch. Secondary indexes are only built by
//! [`BatchLoader::finalize`], after the last batch has committed.
//!
//! Every sink call goes through one `tokio::sync::Mutex` and is bounded by
//! the configured timeout. After a failed batch the loader refuses further
//! writes; batches committed before it stay in place.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::schema::SchemaSpec;
use crate::sink::{RowSink, SinkError, SourceEntry, TableStatus};
use crate::validator::AcceptedRow;
use crate::value::PrimaryKey;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("batch {batch} was rolled back at {}: {source}", describe_row(.row, .key))]
    Batch {
        batch: u64,
        /// Offending row within the batch, when the sink could tell
        row: Option<usize>,
        /// Primary key of the offending row, if it has one
        key: Option<PrimaryKey>,
        #[source]
        source: SinkError,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("cannot create table '{table}': {source}")]
    CreateTable {
        table: String,
        #[source]
        source: SinkError,
    },

    #[error("cannot build index on '{column}': {source}")]
    Index {
        column: String,
        #[source]
        source: SinkError,
    },

    #[error("cannot record '{file}' in the ledger: {source}")]
    Ledger {
        file: String,
        #[source]
        source: SinkError,
    },

    #[error("loader {0}")]
    State(&'static str),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

fn describe_row(row: &Option<usize>, key: &Option<PrimaryKey>) -> String {
    match (row, key) {
        (Some(r), Some(k)) => format!("row {} (key {})", r, k),
        (Some(r), None) => format!("row {}", r),
        (None, _) => "an unknown row".to_string(),
    }
}

/// Counters reported by the loader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub batches_committed: u64,
    pub rows_committed: u64,
    pub indexes_built: u64,
    pub buffered: usize,
}

#[derive(Debug, Default)]
struct Inner {
    buffer: Vec<AcceptedRow>,
    batches: u64,
    rows: u64,
    indexes: u64,
    table_ready: bool,
    failed: bool,
    finalized: bool,
}

pub struct BatchLoader {
    sink: Arc<dyn RowSink>,
    schema: Arc<SchemaSpec>,
    batch_size: usize,
    timeout: Duration,
    /// Write lock: held for the duration of each sink call
    inner: Mutex<Inner>,
}

impl BatchLoader {
    pub fn new(
        sink: Arc<dyn RowSink>,
        schema: Arc<SchemaSpec>,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            schema,
            batch_size: batch_size.max(1),
            timeout,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn schema(&self) -> &SchemaSpec {
        &self.schema
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Create the output table; with `reset` drop it and the ledger first
    pub async fn create_table(&self, reset: bool) -> Result<TableStatus, LoadError> {
        let mut inner = self.inner.lock().await;
        let table = self.schema.table();

        if reset {
            self.bounded("drop tables", self.sink.drop_tables(&self.schema))
                .await?
                .map_err(|source| LoadError::CreateTable {
                    table: table.to_string(),
                    source,
                })?;
        }

        let status = self
            .bounded("create table", self.sink.create_table(&self.schema))
            .await?
            .map_err(|source| LoadError::CreateTable {
                table: table.to_string(),
                source,
            })?;

        inner.table_ready = true;
        info!(table, ?status, reset, "Output table ready");
        Ok(status)
    }

    /// Primary keys already in the output table
    pub async fn existing_keys(&self) -> Result<Vec<PrimaryKey>, LoadError> {
        let _guard = self.inner.lock().await;
        Ok(self
            .bounded("read primary keys", self.sink.primary_keys(&self.schema))
            .await??)
    }

    /// File names already in the ledger
    pub async fn loaded_sources(&self) -> Result<std::collections::HashSet<String>, LoadError> {
        let _guard = self.inner.lock().await;
        Ok(self.bounded("read ledger", self.sink.loaded_sources()).await??)
    }

    /// Buffer rows, committing every full batch
    pub async fn push(&self, rows: Vec<AcceptedRow>) -> Result<(), LoadError> {
        let mut inner = self.inner.lock().await;
        Self::check_writable(&inner)?;

        inner.buffer.extend(rows);
        while inner.buffer.len() >= self.batch_size {
            let batch: Vec<AcceptedRow> = inner.buffer.drain(..self.batch_size).collect();
            self.commit(&mut inner, batch).await?;
        }
        Ok(())
    }

    /// Commit whatever is buffered as one (possibly short) batch
    pub async fn flush(&self) -> Result<(), LoadError> {
        let mut inner = self.inner.lock().await;
        if inner.failed || inner.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut inner.buffer);
        self.commit(&mut inner, batch).await
    }

    /// Record an input file in the ledger once its rows are committed
    pub async fn record_source(&self, entry: &SourceEntry) -> Result<(), LoadError> {
        let inner = self.inner.lock().await;
        Self::check_writable(&inner)?;
        self.bounded("record source", self.sink.record_source(entry))
            .await?
            .map_err(|source| LoadError::Ledger {
                file: entry.filename.clone(),
                source,
            })
    }

    /// Commit the tail and build every requested index. Runs once.
    #[instrument(skip(self), fields(table = self.schema.table()))]
    pub async fn finalize(&self) -> Result<LoaderStats, LoadError> {
        let mut inner = self.inner.lock().await;
        Self::check_writable(&inner)?;

        if !inner.buffer.is_empty() {
            let batch = std::mem::take(&mut inner.buffer);
            self.commit(&mut inner, batch).await?;
        }

        for column in self.schema.indexed_columns() {
            info!(column = %column.name, "Building index");
            self.bounded("create index", self.sink.create_index(&self.schema, column))
                .await?
                .map_err(|source| LoadError::Index {
                    column: column.name.clone(),
                    source,
                })?;
            inner.indexes += 1;
        }

        inner.finalized = true;
        Ok(Self::snapshot(&inner))
    }

    pub async fn stats(&self) -> LoaderStats {
        Self::snapshot(&*self.inner.lock().await)
    }

    fn snapshot(inner: &Inner) -> LoaderStats {
        LoaderStats {
            batches_committed: inner.batches,
            rows_committed: inner.rows,
            indexes_built: inner.indexes,
            buffered: inner.buffer.len(),
        }
    }

    fn check_writable(inner: &Inner) -> Result<(), LoadError> {
        if !inner.table_ready {
            Err(LoadError::State("has no table yet"))
        } else if inner.failed {
            Err(LoadError::State("stopped after a failed batch"))
        } else if inner.finalized {
            Err(LoadError::State("is already finalized"))
        } else {
            Ok(())
        }
    }

    async fn commit(&self, inner: &mut Inner, batch: Vec<AcceptedRow>) -> Result<(), LoadError> {
        let number = inner.batches + 1;
        let result = self
            .bounded("insert batch", self.sink.insert_batch(&self.schema, &batch))
            .await;

        match result {
            Ok(Ok(())) => {
                inner.batches = number;
                inner.rows += batch.len() as u64;
                debug!(batch = number, rows = batch.len(), "Batch committed");
                Ok(())
            },
            Ok(Err(source)) => {
                inner.failed = true;
                let row = match &source {
                    SinkError::Row { row, .. } => Some(*row),
                    _ => None,
                };
                let key = row.and_then(|r| batch.get(r)).and_then(|r| r.key.clone());
                Err(LoadError::Batch {
                    batch: number,
                    row,
                    key,
                    source,
                })
            },
            Err(timeout) => {
                inner.failed = true;
                Err(timeout)
            },
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, LoadError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| LoadError::Timeout {
                operation,
                after: self.timeout,
            })
    }
}
