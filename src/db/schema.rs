use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::model::{ColumnSet, Row};

/// Identifiers are interpolated into SQL text, so only this shape is accepted
static SAFE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Schemas that never hold user tables
const SYSTEM_SCHEMAS: &str =
    "('information_schema', 'INFORMATION_SCHEMA', 'pg_catalog', 'system')";

/// SQL data type of a store column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    Varchar,
    Char,
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    /// Anything else, keeping the catalog spelling
    Other(String),
}

impl SqlType {
    /// Classify a catalog type name.
    ///
    /// Accepts PostgreSQL spellings (`integer`, `character varying`) as well
    /// as ClickHouse ones (`Int32`, `Nullable(String)`, `DateTime64(3)`).
    pub fn from_catalog(type_name: &str) -> SqlType {
        let inner = unwrap_type_modifiers(type_name.trim());
        let base = inner.split('(').next().unwrap_or(inner).trim();

        match base.to_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            // INT8 is ClickHouse's 8-bit integer; the PostgreSQL catalog says "bigint"
            "SMALLINT" | "INT2" | "INT8" | "INT16" | "UINT8" => SqlType::SmallInt,
            "INTEGER" | "INT" | "INT4" | "INT32" | "UINT16" => SqlType::Integer,
            "BIGINT" | "INT64" | "UINT32" => SqlType::BigInt,
            "REAL" | "FLOAT4" | "FLOAT32" => SqlType::Real,
            "DOUBLE PRECISION" | "FLOAT8" | "FLOAT64" => SqlType::DoublePrecision,
            "NUMERIC" | "DECIMAL" | "DECIMAL32" | "DECIMAL64" | "DECIMAL128" | "DECIMAL256"
            | "UINT64" | "UINT128" | "UINT256" | "INT128" | "INT256" => SqlType::Numeric,
            "CHARACTER VARYING" | "VARCHAR" => SqlType::Varchar,
            "CHARACTER" | "CHAR" | "BPCHAR" | "FIXEDSTRING" => SqlType::Char,
            "TEXT" | "STRING" => SqlType::Text,
            "DATE" | "DATE32" => SqlType::Date,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" | "DATETIME" | "DATETIME64" => {
                SqlType::Timestamp
            }
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => SqlType::TimestampTz,
            "UUID" => SqlType::Uuid,
            _ => SqlType::Other(type_name.trim().to_string()),
        }
    }

    /// Whether the connector can decode this type straight off the wire.
    /// Other columns are projected through `CAST(.. AS TEXT)`.
    pub fn decodes_natively(&self) -> bool {
        !matches!(self, SqlType::Numeric | SqlType::Uuid | SqlType::Other(_))
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Numeric => "NUMERIC",
            SqlType::Text => "TEXT",
            SqlType::Varchar => "VARCHAR",
            SqlType::Char => "CHAR",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            SqlType::Uuid => "UUID",
            SqlType::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// Strip `Nullable(..)` and `LowCardinality(..)` wrappers
fn unwrap_type_modifiers(type_name: &str) -> &str {
    let mut current = type_name;
    loop {
        let stripped = ["Nullable(", "LowCardinality("].iter().find_map(|prefix| {
            current
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(')'))
        });
        match stripped {
            Some(inner) => current = inner.trim(),
            None => return current,
        }
    }
}

/// A column in a table description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl Column {
    /// Build a column from one catalog row
    pub fn from_catalog(name: String, type_name: &str, is_nullable: &str) -> Self {
        let nullable = matches!(
            is_nullable.trim().to_ascii_uppercase().as_str(),
            "YES" | "1" | "TRUE"
        ) || type_name.trim_start().starts_with("Nullable(");
        Self {
            sql_type: SqlType::from_catalog(type_name),
            name,
            nullable,
        }
    }
}

/// A validated, optionally schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Parse `table` or `schema.table`, validating each part.
    pub fn parse(table: &str) -> Result<Self> {
        let table = table.trim();
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, table),
        };

        if let Some(schema) = schema {
            validate_identifier(schema)?;
        }
        validate_identifier(name)?;

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Quoted form for interpolation into statements
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(&self.name)
            ),
            None => quote_identifier(&self.name),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Reject anything but `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if SAFE_IDENTIFIER.is_match(identifier) {
        Ok(())
    } else {
        Err(IngestError::Query(format!(
            "Invalid identifier '{}': only letters, digits and underscores are allowed",
            identifier
        )))
    }
}

pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// Single-quoted SQL string literal with embedded quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Catalog query listing user tables of `database`
pub fn list_tables_sql(database: &str) -> String {
    format!(
        "SELECT CAST(table_name AS TEXT) \
         FROM information_schema.tables \
         WHERE table_catalog = {} AND table_schema NOT IN {} \
         ORDER BY table_name",
        quote_literal(database),
        SYSTEM_SCHEMAS
    )
}

/// Catalog query describing a table's columns in ordinal order
pub fn describe_table_sql(database: &str, table: &TableRef) -> String {
    let schema_filter = match &table.schema {
        Some(schema) => format!("AND table_schema = {}", quote_literal(schema)),
        None => format!("AND table_schema NOT IN {}", SYSTEM_SCHEMAS),
    };
    format!(
        "SELECT CAST(column_name AS TEXT), CAST(data_type AS TEXT), CAST(is_nullable AS TEXT) \
         FROM information_schema.columns \
         WHERE table_catalog = {} AND table_name = {} {} \
         ORDER BY ordinal_position",
        quote_literal(database),
        quote_literal(&table.name),
        schema_filter
    )
}

/// Restrict a table description to `selected`, in selection order.
pub fn project_columns(
    described: &[Column],
    selected: &ColumnSet,
    table: &TableRef,
) -> Result<Vec<Column>> {
    selected
        .iter()
        .map(|name| {
            described
                .iter()
                .find(|c| c.name == name)
                .cloned()
                .ok_or_else(|| {
                    IngestError::Schema(format!(
                        "Column '{}' does not exist in table '{}'",
                        name, table
                    ))
                })
        })
        .collect()
}

/// Build the projected SELECT. Never `SELECT *`.
pub fn build_select_sql(columns: &[Column], table: &TableRef) -> Result<String> {
    if columns.is_empty() {
        return Err(IngestError::Query(
            "SELECT requires at least one column".to_string(),
        ));
    }

    let projection: Vec<String> = columns
        .iter()
        .map(|col| {
            validate_identifier(&col.name)?;
            let quoted = quote_identifier(&col.name);
            Ok(if col.sql_type.decodes_natively() {
                quoted
            } else {
                format!("CAST({} AS TEXT) AS {}", quoted, quoted)
            })
        })
        .collect::<Result<_>>()?;

    Ok(format!("SELECT {} FROM {}", projection.join(", "), table.quoted()))
}

/// Build a multi-row INSERT with every value rendered as a literal:
/// `INSERT INTO "t" ("a", "b") VALUES (1, 'x'), (2, NULL)`.
///
/// Quoted literals carry no type of their own, so the store coerces them to
/// the column type, including enums and other user-defined types.
pub fn build_insert_sql(table: &TableRef, columns: &[Column], rows: &[Row]) -> Result<String> {
    if columns.is_empty() || rows.is_empty() {
        return Err(IngestError::Query(
            "INSERT requires at least one column and one row".to_string(),
        ));
    }

    let column_list: Vec<String> = columns
        .iter()
        .map(|c| {
            validate_identifier(&c.name)?;
            Ok(quote_identifier(&c.name))
        })
        .collect::<Result<_>>()?;

    let mut value_groups = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns.len() {
            return Err(IngestError::Schema(format!(
                "Row has {} cells but {} columns were selected",
                row.len(),
                columns.len()
            )));
        }
        let literals: Vec<String> = row
            .cells
            .iter()
            .zip(columns)
            .map(|(value, col)| value.to_column_literal(&col.sql_type))
            .collect();
        value_groups.push(format!("({})", literals.join(", ")));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.quoted(),
        column_list.join(", "),
        value_groups.join(", ")
    ))
}
