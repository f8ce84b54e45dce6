//! Top-level error type of the library

use std::path::PathBuf;
use thiserror::Error;

use crate::loader::LoadError;
use crate::schema::SchemaError;
use crate::sink::SinkError;

/// Errors that stop a run before it can produce a summary
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Input(String),

    #[error("cannot read {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("reader task failed: {0}")]
    Producer(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Load(#[from] LoadError),
}
