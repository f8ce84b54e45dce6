//! SQLite output through sqlx

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{sql, RowSink, SinkError, SourceEntry, TableStatus, LEDGER_TABLE};
use crate::schema::{ColumnSpec, Dtype, SchemaSpec};
use crate::validator::AcceptedRow;
use crate::value::{PrimaryKey, Value};

/// Writes to a single SQLite database file
///
/// The pool holds exactly one connection: SQLite has one writer anyway,
/// and an in-memory database only exists on the connection that made it.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (creating if needed) the database at `path`
    ///
    /// `temp_dir` becomes SQLite's `temp_store_directory`, which is where
    /// index builds spill their sort runs.
    pub async fn connect(path: &Path, temp_dir: Option<&Path>) -> Result<Self, SinkError> {
        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        if let Some(dir) = temp_dir {
            let quoted = format!("'{}'", dir.display().to_string().replace('\'', "''"));
            options = options.pragma("temp_store_directory", quoted);
        }

        info!(database = %path.display(), "Opening SQLite database");
        Self::with_options(options).await
    }

    /// Private in-memory database, gone when the sink is dropped
    pub async fn in_memory() -> Result<Self, SinkError> {
        Self::with_options(SqliteConnectOptions::from_str("sqlite::memory:")?).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self, SinkError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn table_exists(&self, table: &str) -> Result<bool, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }
}

#[async_trait]
impl RowSink for SqliteSink {
    async fn drop_tables(&self, schema: &SchemaSpec) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::drop_table(schema.table())).execute(&mut *tx).await?;
        sqlx::query(&sql::drop_table(LEDGER_TABLE)).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(table = schema.table(), "Dropped output table and ledger");
        Ok(())
    }

    async fn create_table(&self, schema: &SchemaSpec) -> Result<TableStatus, SinkError> {
        let existed = self.table_exists(schema.table()).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::create_ledger()).execute(&mut *tx).await?;
        sqlx::query(&sql::create_table(schema)).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(if existed {
            TableStatus::Existing
        } else {
            TableStatus::Created
        })
    }

    async fn insert_batch(
        &self,
        schema: &SchemaSpec,
        rows: &[AcceptedRow],
    ) -> Result<(), SinkError> {
        let statement = sql::insert_row(schema);
        let mut tx = self.pool.begin().await?;

        for (i, row) in rows.iter().enumerate() {
            let mut query = sqlx::query(&statement);
            for value in &row.values {
                query = match value {
                    Value::Absent => query.bind(None::<i64>),
                    Value::Text(s) => query.bind(s.as_str()),
                    Value::Integer(v) => query.bind(*v),
                    Value::Real(v) => query.bind(*v),
                };
            }

            if let Err(e) = query.execute(&mut *tx).await {
                tx.rollback().await?;
                return Err(SinkError::Row {
                    row: i,
                    message: e.to_string(),
                });
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_index(
        &self,
        schema: &SchemaSpec,
        column: &ColumnSpec,
    ) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql::drop_index(schema, column)).execute(&mut *tx).await?;
        sqlx::query(&sql::create_index(schema, column)).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn primary_keys(&self, schema: &SchemaSpec) -> Result<Vec<PrimaryKey>, SinkError> {
        let Some((_, column)) = schema.primary_key() else {
            return Ok(Vec::new());
        };

        let statement = sql::select_column(schema, column);
        let mut rows = sqlx::query(&statement).fetch(&self.pool);
        let mut keys = Vec::new();

        while let Some(row) = rows.try_next().await? {
            let value = match column.dtype {
                Dtype::Integer => row.try_get::<Option<i64>, _>(0)?.map(Value::Integer),
                Dtype::Real => row.try_get::<Option<f64>, _>(0)?.map(Value::Real),
                Dtype::Text => row.try_get::<Option<String>, _>(0)?.map(Value::Text),
            };
            if let Some(key) = value.and_then(|v| v.key()) {
                keys.push(key);
            }
        }

        debug!(table = schema.table(), keys = keys.len(), "Read existing primary keys");
        Ok(keys)
    }

    async fn loaded_sources(&self) -> Result<HashSet<String>, SinkError> {
        let statement = format!("SELECT filename FROM {}", LEDGER_TABLE);
        let rows = sqlx::query(&statement).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("filename").map_err(SinkError::from))
            .collect()
    }

    async fn record_source(&self, entry: &SourceEntry) -> Result<(), SinkError> {
        sqlx::query(&sql::insert_ledger())
            .bind(&entry.filename)
            .bind(entry.lowest_cid)
            .bind(entry.highest_cid)
            .bind(entry.date_added.format("%Y-%m-%d").to_string())
            .bind(i64::try_from(entry.n_compounds).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
