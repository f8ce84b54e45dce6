//! In-memory sink

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{RowSink, SinkError, SourceEntry, TableStatus};
use crate::schema::{ColumnSpec, SchemaSpec};
use crate::validator::AcceptedRow;
use crate::value::PrimaryKey;

/// Every call the sink has seen, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    DroppedTables,
    CreatedTable { status: TableStatus },
    Committed { batch: usize, rows: usize },
    RolledBack { batch: usize, row: usize },
    CreatedIndex { column: String },
    RecordedSource { filename: String },
}

#[derive(Debug, Default)]
struct State {
    table: bool,
    rows: Vec<AcceptedRow>,
    keys: HashSet<PrimaryKey>,
    indexes: Vec<String>,
    sources: BTreeMap<String, SourceEntry>,
    events: Vec<SinkEvent>,
    batches: usize,
    fail_on: Option<(usize, usize)>,
}

/// Sink that keeps committed rows in memory
///
/// Enforces primary-key uniqueness like a database would, and can be told
/// to refuse a particular row to exercise rollback paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<State>,
    insert_delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse row `row` (zero-based) of the `batch`-th insert (one-based)
    pub fn fail_on_row(self, batch: usize, row: usize) -> Self {
        self.lock().fail_on = Some((batch, row));
        self
    }

    /// Sleep before every insert, to exercise timeouts
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    pub fn rows(&self) -> Vec<AcceptedRow> {
        self.lock().rows.clone()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().events.clone()
    }

    pub fn indexes(&self) -> Vec<String> {
        self.lock().indexes.clone()
    }

    pub fn sources(&self) -> Vec<SourceEntry> {
        self.lock().sources.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn drop_tables(&self, _schema: &SchemaSpec) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.table = false;
        state.rows.clear();
        state.keys.clear();
        state.indexes.clear();
        state.sources.clear();
        state.events.push(SinkEvent::DroppedTables);
        Ok(())
    }

    async fn create_table(&self, _schema: &SchemaSpec) -> Result<TableStatus, SinkError> {
        let mut state = self.lock();
        let status = if state.table {
            TableStatus::Existing
        } else {
            TableStatus::Created
        };
        state.table = true;
        state.events.push(SinkEvent::CreatedTable { status });
        Ok(status)
    }

    async fn insert_batch(
        &self,
        _schema: &SchemaSpec,
        rows: &[AcceptedRow],
    ) -> Result<(), SinkError> {
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if !state.table {
            return Err(SinkError::Other("table does not exist".to_string()));
        }
        state.batches += 1;
        let batch = state.batches;

        let mut staged = HashSet::new();
        for (i, row) in rows.iter().enumerate() {
            let refused = if state.fail_on == Some((batch, i)) {
                Some("injected failure".to_string())
            } else {
                row.key
                    .as_ref()
                    .filter(|k| state.keys.contains(*k) || !staged.insert((*k).clone()))
                    .map(|k| format!("UNIQUE constraint failed: primary key {}", k))
            };

            if let Some(message) = refused {
                state.events.push(SinkEvent::RolledBack { batch, row: i });
                return Err(SinkError::Row { row: i, message });
            }
        }

        state.keys.extend(staged);
        state.rows.extend_from_slice(rows);
        state.events.push(SinkEvent::Committed {
            batch,
            rows: rows.len(),
        });
        Ok(())
    }

    async fn create_index(
        &self,
        _schema: &SchemaSpec,
        column: &ColumnSpec,
    ) -> Result<(), SinkError> {
        let mut state = self.lock();
        if !state.indexes.contains(&column.name) {
            state.indexes.push(column.name.clone());
        }
        state.events.push(SinkEvent::CreatedIndex {
            column: column.name.clone(),
        });
        Ok(())
    }

    async fn primary_keys(&self, _schema: &SchemaSpec) -> Result<Vec<PrimaryKey>, SinkError> {
        Ok(self.lock().keys.iter().cloned().collect())
    }

    async fn loaded_sources(&self) -> Result<HashSet<String>, SinkError> {
        Ok(self.lock().sources.keys().cloned().collect())
    }

    async fn record_source(&self, entry: &SourceEntry) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.sources.insert(entry.filename.clone(), entry.clone());
        state.events.push(SinkEvent::RecordedSource {
            filename: entry.filename.clone(),
        });
        Ok(())
    }
}
