//! Error taxonomy shared by every stage of an ingestion job.
//!
//! Each variant corresponds to one failure class: bad parameters, connection
//! trouble, file I/O, structural mismatches, value conversion, and store-side
//! execution failures. The orchestrator folds all of them into a `JobResult`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the connector, the delimited reader/writer, the type layer
/// and the orchestrator.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection to {host}:{port} failed: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: sqlx::Error,
    },

    #[error("File error for '{}': {reason}", path.display())]
    File { path: PathBuf, reason: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Row format error on line {line}: expected {expected} fields, found {found}")]
    RowFormat {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Cannot convert value '{value}' in column '{column}' to {expected}")]
    Conversion {
        column: String,
        value: String,
        expected: String,
    },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Insert of {rows} rows failed: {message}")]
    Insert { rows: usize, message: String },
}

impl IngestError {
    /// Stable lowercase tag for logs and response envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "validation",
            IngestError::Connection { .. } => "connection",
            IngestError::File { .. } => "file",
            IngestError::Schema(_) => "schema",
            IngestError::RowFormat { .. } => "row_format",
            IngestError::Conversion { .. } => "conversion",
            IngestError::Query(_) => "query",
            IngestError::Insert { .. } => "insert",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        IngestError::Validation(msg.into())
    }

    pub(crate) fn file(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IngestError::File {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn query(err: impl ToString) -> Self {
        IngestError::Query(err.to_string())
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, IngestError>;
