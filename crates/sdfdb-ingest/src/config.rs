//! Loader configuration
//!
//! Defaults suit a full PubChem build on a workstation. Every field can be
//! overridden from the environment (`SDFDB_*`, `.env` files included) and
//! then again from the command line.

use anyhow::{Context, Result};
use sdfdb_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DATABASE: &str = "pubchem.sqlite";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite database file to write
    pub database_path: PathBuf,
    /// Output table, overriding the layout's
    pub table: Option<String>,
    /// Rows per transaction
    pub batch_size: usize,
    /// Chunks of `batch_size` rows that may wait between readers and the loader
    pub queue_capacity: usize,
    /// Input files read at the same time
    pub max_parallel_files: usize,
    /// Scratch directory for index builds
    pub temp_dir: Option<PathBuf>,
    /// Upper bound on any single sink call
    pub sink_timeout_secs: u64,
    /// Drop the output table and ledger before loading
    pub reset: bool,
    /// Skip input files already recorded in the ledger
    pub skip_loaded_files: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE),
            table: None,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_parallel_files: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            temp_dir: None,
            sink_timeout_secs: DEFAULT_SINK_TIMEOUT_SECS,
            reset: false,
            skip_loaded_files: true,
        }
    }
}

impl IngestConfig {
    /// Defaults overlaid with `SDFDB_*` variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::default().merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay any `SDFDB_*` variables that are set
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(path) = env::var("SDFDB_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(table) = env::var("SDFDB_TABLE") {
            self.table = Some(table);
        }
        if let Some(n) = env::parse("SDFDB_BATCH_SIZE")? {
            self.batch_size = n;
        }
        if let Some(n) = env::parse("SDFDB_QUEUE_CAPACITY")? {
            self.queue_capacity = n;
        }
        if let Some(n) = env::parse("SDFDB_MAX_PARALLEL_FILES")? {
            self.max_parallel_files = n;
        }
        if let Some(dir) = env::var("SDFDB_TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env::parse("SDFDB_SINK_TIMEOUT_SECS")? {
            self.sink_timeout_secs = secs;
        }
        if let Some(reset) = env::flag("SDFDB_RESET")? {
            self.reset = reset;
        }
        if let Some(skip) = env::flag("SDFDB_SKIP_LOADED_FILES")? {
            self.skip_loaded_files = skip;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            anyhow::bail!("SDFDB_DATABASE cannot be empty");
        }
        if self.batch_size == 0 {
            anyhow::bail!("SDFDB_BATCH_SIZE must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("SDFDB_QUEUE_CAPACITY must be greater than 0");
        }
        if self.max_parallel_files == 0 {
            anyhow::bail!("SDFDB_MAX_PARALLEL_FILES must be greater than 0");
        }
        if self.sink_timeout_secs == 0 {
            anyhow::bail!("SDFDB_SINK_TIMEOUT_SECS must be greater than 0");
        }
        if let Some(ref dir) = self.temp_dir {
            let meta = std::fs::metadata(dir)
                .with_context(|| format!("SDFDB_TEMP_DIR {} is not accessible", dir.display()))?;
            if !meta.is_dir() {
                anyhow::bail!("SDFDB_TEMP_DIR {} is not a directory", dir.display());
            }
        }
        Ok(())
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn with_max_parallel_files(mut self, n: usize) -> Self {
        self.max_parallel_files = n;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_skip_loaded_files(mut self, skip: bool) -> Self {
        self.skip_loaded_files = skip;
        self
    }
}
