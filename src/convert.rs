//! Conversion between typed cell values and text tokens.
//!
//! Text boundary (flat files): integers as decimal digits, floats with a `.`
//! separator and no grouping, text unchanged, NULL as the empty token, dates
//! and timestamps as ISO-8601. Relational boundary: NULL as the `NULL`
//! literal, text single-quoted with embedded quotes doubled. Non-finite
//! floats are not representable at either boundary.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::db::schema::SqlType;
use crate::error::{IngestError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
/// Space-separated form, which every store accepts in a quoted literal
const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Accepted timestamp spellings when reading text tokens
const TIMESTAMP_INPUT_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Widen a single-precision float through its shortest decimal form, so
    /// `0.1f32` becomes `0.1` rather than `0.10000000149011612`.
    pub fn from_f32(f: f32) -> Value {
        Value::Float(f.to_string().parse().unwrap_or(f64::from(f)))
    }

    /// Canonical text token for flat files. NULL becomes the empty token.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// SQL literal form: `NULL`, bare numerics, quoted everything else.
    ///
    /// Quotes are doubled rather than backslash-escaped.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(_) | Value::Float(_) => self.to_text(),
            Value::Timestamp(ts) => format!("'{}'", ts.format(SQL_TIMESTAMP_FORMAT)),
            Value::Text(_) | Value::Date(_) => {
                format!("'{}'", self.to_text().replace('\'', "''"))
            }
        }
    }

    /// SQL literal for a cell of a column typed `sql_type`.
    ///
    /// Booleans travel as 0/1 integers and are rendered `TRUE`/`FALSE`;
    /// everything else is [`Value::to_sql_literal`].
    pub fn to_column_literal(&self, sql_type: &SqlType) -> String {
        match (self, sql_type) {
            (Value::Integer(i), SqlType::Boolean) => {
                let literal = if *i != 0 { "TRUE" } else { "FALSE" };
                literal.to_string()
            }
            _ => self.to_sql_literal(),
        }
    }

    /// Parse a text token into a value for a column of type `sql_type`.
    ///
    /// The empty token (after trimming) is NULL for every type. Numeric and
    /// temporal targets reject tokens that do not parse instead of
    /// substituting a default.
    pub fn from_text(token: &str, sql_type: &SqlType, column: &str) -> Result<Value> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }

        let mismatch = || IngestError::Conversion {
            column: column.to_string(),
            value: trimmed.to_string(),
            expected: sql_type.to_string(),
        };

        match sql_type {
            SqlType::Boolean => parse_bool(trimmed).map(Value::Integer).ok_or_else(mismatch),
            SqlType::SmallInt => parse_int_in_range(trimmed, i16::MIN.into(), i16::MAX.into())
                .map(Value::Integer)
                .ok_or_else(mismatch),
            SqlType::Integer => parse_int_in_range(trimmed, i32::MIN.into(), i32::MAX.into())
                .map(Value::Integer)
                .ok_or_else(mismatch),
            SqlType::BigInt => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| mismatch()),
            SqlType::Real | SqlType::DoublePrecision => parse_finite(trimmed)
                .map(Value::Float)
                .ok_or_else(mismatch),
            // Numeric keeps its exact digits; validate only
            SqlType::Numeric => {
                if parse_finite(trimmed).is_some() {
                    Ok(Value::Text(trimmed.to_string()))
                } else {
                    Err(mismatch())
                }
            }
            SqlType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|_| mismatch()),
            SqlType::Timestamp | SqlType::TimestampTz => parse_timestamp(trimmed)
                .map(Value::Timestamp)
                .ok_or_else(mismatch),
            SqlType::Text | SqlType::Varchar | SqlType::Char | SqlType::Uuid | SqlType::Other(_) => {
                Ok(Value::Text(token.to_string()))
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<i64> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("t") || value == "1" {
        Some(1)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("f") || value == "0"
    {
        Some(0)
    } else {
        None
    }
}

/// `f64` parsing without `NaN` and the infinities
fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_int_in_range(value: &str, min: i64, max: i64) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

/// Parse ISO-8601-ish timestamps. Offsets are normalized to UTC; a bare date
/// is read as midnight.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Some(with_offset.with_timezone(&Utc).naive_utc());
    }

    let value = value.strip_suffix('Z').unwrap_or(value);
    TIMESTAMP_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
