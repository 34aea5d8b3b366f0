use std::fs::File;
use std::path::PathBuf;

use csv::{StringRecordsIntoIter, Trim};

use crate::config::QUOTE;
use crate::error::{IngestError, Result};
use crate::formats::reader::{FileSpec, Record, ensure_regular_file};
use crate::model::ColumnSet;

fn open_reader(spec: &FileSpec) -> Result<csv::Reader<File>> {
    ensure_regular_file(&spec.path)?;
    let file = File::open(&spec.path).map_err(|e| IngestError::file(&spec.path, e))?;

    Ok(csv::ReaderBuilder::new()
        .delimiter(spec.delimiter)
        .quote(QUOTE)
        .double_quote(true)
        .has_headers(true)
        .trim(Trim::All)
        // Field-count mismatches are reported by DelimitedRows with the line number
        .flexible(true)
        .from_reader(file))
}

fn read_header(reader: &mut csv::Reader<File>, spec: &FileSpec) -> Result<ColumnSet> {
    let headers = reader
        .headers()
        .map_err(|e| IngestError::file(&spec.path, format!("cannot read header: {}", e)))?;

    if headers.is_empty() {
        return Err(IngestError::file(&spec.path, "file is empty (no header line)"));
    }
    Ok(ColumnSet::new(headers.iter().map(str::to_string).collect()))
}

/// Read the header line and return its trimmed column names.
pub fn read_schema(spec: &FileSpec) -> Result<ColumnSet> {
    let mut reader = open_reader(spec)?;
    read_header(&mut reader, spec)
}

/// Open `spec` for streaming. The header is consumed; data records follow.
pub fn stream_rows(spec: &FileSpec) -> Result<DelimitedRows> {
    let mut reader = open_reader(spec)?;
    let header = read_header(&mut reader, spec)?;
    Ok(DelimitedRows {
        path: spec.path.clone(),
        header,
        records: reader.into_records(),
        finished: false,
    })
}

/// Lazy, forward-only iterator over the data records of a delimited file.
///
/// Quoted fields may contain the delimiter, line breaks and doubled quotes.
/// A record whose field count differs from the header yields a `RowFormat`
/// error naming its line, after which iteration stops.
pub struct DelimitedRows {
    path: PathBuf,
    header: ColumnSet,
    records: StringRecordsIntoIter<File>,
    finished: bool,
}

impl DelimitedRows {
    pub fn header(&self) -> &ColumnSet {
        &self.header
    }
}

impl Iterator for DelimitedRows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let item = match self.records.next()? {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                if record.len() == self.header.len() {
                    Ok(Record {
                        line,
                        fields: record.iter().map(str::to_string).collect(),
                    })
                } else {
                    Err(IngestError::RowFormat {
                        line,
                        expected: self.header.len(),
                        found: record.len(),
                    })
                }
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                Err(IngestError::file(
                    &self.path,
                    format!("malformed record on line {}: {}", line, e),
                ))
            }
        };

        if item.is_err() {
            self.finished = true;
        }
        Some(item)
    }
}
