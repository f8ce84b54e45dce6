//! Drives input files through reader, mapper, validator and loader
//!
//! ```text
//!  file 1 ─ read ─ map ─ validate ─┐
//!  file 2 ─ read ─ map ─ validate ─┼─ mpsc (bounded) ─ BatchLoader ─ sink
//!  file N ─ read ─ map ─ validate ─┘
//! ```
//!
//! Each file is parsed on a blocking thread, at most `max_parallel_files`
//! at a time. Producers send chunks of accepted rows over one bounded
//! channel; the single consumer owns the loader. When a file's last chunk
//! has been committed, the file is recorded in the ledger.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::loader::BatchLoader;
use crate::mapper::RecordMapper;
use crate::reader::{ReadError, RecordReader};
use crate::schema::SchemaSpec;
use crate::sink::{RowSink, SourceEntry, TableStatus};
use crate::source::SourceFile;
use crate::stats::{FileStatistics, RunStatistics, RunStatus, RunSummary};
use crate::validator::{AcceptedRow, PrimaryKeyRegistry, RowValidator, Verdict};

enum Message {
    Rows(Vec<AcceptedRow>),
    /// The producer stopped; `complete` tells whether it reached end of file
    FileDone(FileStatistics),
    FileFailed(FileStatistics, IngestError),
}

enum Outcome {
    Completed,
    Cancelled,
}

pub struct Orchestrator {
    config: IngestConfig,
    schema: Arc<SchemaSpec>,
    sink: Arc<dyn RowSink>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: IngestConfig, schema: SchemaSpec, sink: Arc<dyn RowSink>) -> Self {
        Self {
            config,
            schema: Arc::new(schema),
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn schema(&self) -> &SchemaSpec {
        &self.schema
    }

    /// Load every source and report the outcome
    ///
    /// Never fails: load errors, unreadable inputs and cancellation all end
    /// up in the returned summary.
    pub async fn run(&self, sources: Vec<SourceFile>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let span = tracing::info_span!("run", %run_id, table = self.schema.table());

        async move {
            info!(files = sources.len(), "Starting load");

            let loader = BatchLoader::new(
                Arc::clone(&self.sink),
                Arc::clone(&self.schema),
                self.config.batch_size,
                self.config.sink_timeout(),
            );
            let mut stats = RunStatistics::default();
            let outcome = self.execute(&loader, sources, &mut stats).await;

            let loaded = loader.stats().await;
            stats.batches_committed = loaded.batches_committed;
            stats.rows_committed = loaded.rows_committed;
            stats.indexes_built = loaded.indexes_built;

            let (status, error) = match outcome {
                Err(e) => {
                    error!(error = %e, "Load failed");
                    (RunStatus::Failed, Some(e.to_string()))
                },
                Ok(Outcome::Cancelled) => {
                    warn!(rows = stats.rows_committed, "Load cancelled");
                    (RunStatus::Cancelled, None)
                },
                // Nothing new to load is fine; loading nothing out of new files is not
                Ok(Outcome::Completed)
                    if stats.accepted == 0 && stats.files_skipped < stats.files.len() as u64 =>
                (
                    RunStatus::Failed,
                    Some("no records were accepted".to_string()),
                ),
                Ok(Outcome::Completed) => (RunStatus::Succeeded, None),
            };

            info!(
                %status,
                seen = stats.seen,
                accepted = stats.accepted,
                rejected = stats.rejected,
                parse_errors = stats.parse_errors,
                batches = stats.batches_committed,
                "Load finished"
            );

            RunSummary {
                run_id,
                status,
                table: self.schema.table().to_string(),
                stats,
                error,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        loader: &BatchLoader,
        sources: Vec<SourceFile>,
        stats: &mut RunStatistics,
    ) -> Result<Outcome, IngestError> {
        let status = loader.create_table(self.config.reset).await?;

        // Resuming into an existing table: its keys count as already seen
        let registry = if status == TableStatus::Existing && self.schema.primary_key().is_some() {
            let keys = loader.existing_keys().await?;
            info!(keys = keys.len(), "Seeded primary keys from existing table");
            PrimaryKeyRegistry::seeded(keys)
        } else {
            PrimaryKeyRegistry::new()
        };
        let registry = Arc::new(registry);

        let loaded = if self.config.skip_loaded_files {
            loader.loaded_sources().await?
        } else {
            HashSet::new()
        };
        let (skipped, pending): (Vec<_>, Vec<_>) =
            sources.into_iter().partition(|s| loaded.contains(&s.name));
        let cid_ranges: HashMap<String, Option<(i64, i64)>> =
            pending.iter().map(|s| (s.name.clone(), s.cid_range)).collect();
        for source in skipped {
            info!(file = %source.name, "Already loaded, skipping");
            stats.add_file(FileStatistics {
                skipped: true,
                complete: true,
                ..FileStatistics::new(&source.name)
            });
        }

        // Child token: a fatal error stops the producers without cancelling the caller's token
        let producers = self.cancel.child_token();
        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let mut tasks = self.spawn_producers(pending, registry, &producers, tx);

        let mut failure: Option<IngestError> = None;
        while let Some(message) = rx.recv().await {
            match message {
                Message::Rows(rows) => {
                    if failure.is_some() {
                        continue;
                    }
                    if let Err(e) = loader.push(rows).await {
                        producers.cancel();
                        failure = Some(e.into());
                    }
                },
                Message::FileDone(mut file) => {
                    if failure.is_none() {
                        let cid_range = cid_ranges.get(&file.file).copied().flatten();
                        match self.file_finished(loader, &file, cid_range).await {
                            Ok(()) => file.committed = file.accepted,
                            Err(e) => {
                                producers.cancel();
                                failure = Some(e);
                            },
                        }
                    }
                    stats.add_file(file);
                },
                Message::FileFailed(file, e) => {
                    error!(file = %file.file, error = %e, "Input file failed");
                    stats.add_file(file);
                    producers.cancel();
                    failure.get_or_insert(e);
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let problem = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(message)) => message,
                Err(e) => e.to_string(),
            };
            producers.cancel();
            failure.get_or_insert(IngestError::Producer(problem));
        }

        if let Some(e) = failure {
            return Err(e);
        }

        if self.cancel.is_cancelled() {
            // Queued rows are kept; indexes wait for a complete load
            loader.flush().await?;
            return Ok(Outcome::Cancelled);
        }

        loader.finalize().await?;
        Ok(Outcome::Completed)
    }

    /// Commit what the file produced and, if it was read to the end, record it
    async fn file_finished(
        &self,
        loader: &BatchLoader,
        file: &FileStatistics,
        cid_range: Option<(i64, i64)>,
    ) -> Result<(), IngestError> {
        loader.flush().await?;

        if !file.complete {
            debug!(file = %file.file, "File stopped early, not recording it");
            return Ok(());
        }

        let (lowest_cid, highest_cid) = cid_range.unzip();
        loader
            .record_source(&SourceEntry {
                filename: file.file.clone(),
                lowest_cid,
                highest_cid,
                date_added: Utc::now().date_naive(),
                n_compounds: file.accepted,
            })
            .await?;

        info!(
            file = %file.file,
            seen = file.seen,
            accepted = file.accepted,
            rejected = file.rejected,
            parse_errors = file.parse_errors,
            "File loaded"
        );
        Ok(())
    }

    fn spawn_producers(
        &self,
        sources: Vec<SourceFile>,
        registry: Arc<PrimaryKeyRegistry>,
        token: &CancellationToken,
        tx: mpsc::Sender<Message>,
    ) -> JoinSet<Result<(), String>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_files.max(1)));
        let mapper = RecordMapper::new(Arc::clone(&self.schema));
        let validator = RowValidator::new(Arc::clone(&self.schema), registry);
        let chunk_size = self.config.batch_size.max(1);
        let mut tasks = JoinSet::new();

        for source in sources {
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let tx = tx.clone();
            let mapper = mapper.clone();
            let validator = validator.clone();
            let span = tracing::info_span!("file", file = %source.name);
            let source_name = source.name.clone();

            tasks.spawn(
                async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit,
                        _ = token.cancelled() => {
                            let _ = tx.send(Message::FileDone(FileStatistics::new(&source.name))).await;
                            return Ok(());
                        },
                    };
                    let _permit = permit.map_err(|e| e.to_string())?;

                    let span = tracing::Span::current();
                    let joined = tokio::task::spawn_blocking(move || {
                        span.in_scope(|| {
                            let last =
                                read_file(&source, &mapper, &validator, &tx, &token, chunk_size);
                            let _ = tx.blocking_send(last);
                        })
                    })
                    .await;

                    joined.map_err(|e| {
                        error!(error = %e, "Reader task panicked");
                        format!("reader for {} failed: {}", source_name, e)
                    })
                }
                .instrument(span),
            );
        }

        tasks
    }
}

/// Read one file to its end (or until cancelled), sending accepted rows in
/// chunks. Returns the final message for the file.
fn read_file(
    source: &SourceFile,
    mapper: &RecordMapper,
    validator: &RowValidator,
    tx: &mpsc::Sender<Message>,
    cancel: &CancellationToken,
    chunk_size: usize,
) -> Message {
    let mut stats = FileStatistics::new(&source.name);

    let input = match source.open() {
        Ok(input) => input,
        Err(e) => {
            return Message::FileFailed(
                stats,
                IngestError::Source {
                    path: source.path.clone(),
                    source: e,
                },
            )
        },
    };
    debug!(path = %source.path.display(), "Reading file");

    let reader = RecordReader::new(input);
    let mut chunk = Vec::with_capacity(chunk_size);
    let mut complete = true;

    for item in reader {
        if cancel.is_cancelled() {
            complete = false;
            break;
        }

        match item {
            Ok(record) => {
                stats.seen += 1;
                let row = mapper.map(&record);
                stats.coercion_failures += row.coercion_failures.len() as u64;

                match validator.validate(row) {
                    Verdict::Accepted(row) => {
                        stats.accepted += 1;
                        chunk.push(row);
                        if chunk.len() >= chunk_size {
                            let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                            if tx.blocking_send(Message::Rows(full)).is_err() {
                                complete = false;
                                break;
                            }
                        }
                    },
                    Verdict::Rejected(rejection) => {
                        debug!(
                            record = record.index,
                            line = record.line,
                            reason = %rejection.reason,
                            column = %rejection.column,
                            "Record rejected"
                        );
                        stats.reject(rejection.reason);
                    },
                }
            },
            Err(ReadError::Parse(e)) => {
                warn!(record = e.record, line = e.line, error = %e, "Skipping malformed record");
                stats.parse_errors += 1;
            },
            Err(ReadError::Io { line, source: e }) => {
                error!(line, error = %e, "Read failed");
                return Message::FileFailed(
                    stats,
                    IngestError::Source {
                        path: source.path.clone(),
                        source: e,
                    },
                );
            },
        }
    }

    if !chunk.is_empty() && tx.blocking_send(Message::Rows(chunk)).is_err() {
        complete = false;
    }

    stats.complete = complete;
    Message::FileDone(stats)
}
