use derive_builder::Builder;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{DEFAULT_DELIMITER, QUOTE};
use crate::error::{IngestError, Result};

/// A single record (row) from a delimited file, as trimmed text tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based line on which the record starts
    pub line: u64,
    pub fields: Vec<String>,
}

/// Location and field delimiter of a flat file.
///
/// File handles are opened and closed per operation, never held by the spec.
#[derive(Debug, Clone, Builder, PartialEq, Eq)]
pub struct FileSpec {
    #[builder(setter(into))]
    pub path: PathBuf,
    #[builder(default = "DEFAULT_DELIMITER")]
    pub delimiter: u8,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    /// Parse a user-supplied delimiter: one ASCII character, or `\t` for TAB.
    pub fn parse_delimiter(delimiter: &str) -> Result<u8> {
        let byte = if delimiter == "\\t" {
            b'\t'
        } else if delimiter.len() == 1 && delimiter.is_ascii() {
            delimiter.as_bytes()[0]
        } else {
            return Err(IngestError::validation(format!(
                "Delimiter must be a single ASCII character or \\t, got '{}'",
                delimiter
            )));
        };

        if byte == QUOTE || byte == b'\n' || byte == b'\r' {
            return Err(IngestError::validation(format!(
                "Delimiter cannot be a quote or line break, got '{}'",
                delimiter.escape_default()
            )));
        }
        Ok(byte)
    }

    /// Check that the path exists and is a regular file
    pub fn check_readable(&self) -> Result<()> {
        ensure_regular_file(&self.path)
    }
}

pub(crate) fn ensure_regular_file(path: &Path) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IngestError::file(path, "file does not exist"));
        }
        Err(e) => return Err(IngestError::file(path, e)),
    };

    if metadata.is_dir() {
        return Err(IngestError::file(path, "path is a directory"));
    }
    Ok(())
}
