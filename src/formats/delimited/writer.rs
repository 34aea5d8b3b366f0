use std::fs::File;

use csv::{QuoteStyle, Terminator};

use crate::config::QUOTE;
use crate::error::{IngestError, Result};
use crate::formats::reader::FileSpec;

/// Write `rows` to `spec.path`, replacing any existing content.
///
/// No header line is written. A field is quoted only when it contains the
/// delimiter, a quote or a line break; embedded quotes are doubled. Returns
/// the number of rows written.
pub fn write_rows<I, R>(spec: &FileSpec, rows: I) -> Result<u64>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[String]>,
{
    let file = File::create(&spec.path).map_err(|e| IngestError::file(&spec.path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(spec.delimiter)
        .quote(QUOTE)
        .double_quote(true)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(file);

    let mut written = 0u64;
    for row in rows {
        writer
            .write_record(row.as_ref())
            .map_err(|e| IngestError::file(&spec.path, format!("write failed: {}", e)))?;
        written += 1;
    }

    writer
        .flush()
        .map_err(|e| IngestError::file(&spec.path, format!("flush failed: {}", e)))?;
    Ok(written)
}
