//! Store connector speaking the PostgreSQL wire protocol through sqlx.
//!
//! ClickHouse serves this protocol on port 9005; PostgreSQL itself works too.
//! ClickHouse only implements the simple query protocol, so every statement
//! is sent as plain SQL text through `sqlx::raw_sql` with values rendered as
//! literals, and every result cell arrives in text format.
//! One connector owns at most one connection for the lifetime of a job or a
//! probe. There is no pooling and no implicit reconnect.
use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use derive_builder::Builder;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column as _, ConnectOptions, Connection, Executor as _, Row as _, TypeInfo as _};
use std::fmt;
use tracing::{debug, info, warn};

use super::schema::{
    Column, TableRef, build_insert_sql, build_select_sql, describe_table_sql,
    list_tables_sql, project_columns, validate_identifier,
};
use crate::config::{CONNECT_TIMEOUT, DEFAULT_PORT};
use crate::convert::Value;
use crate::error::{IngestError, Result};
use crate::model::{ColumnSet, Row};

/// Lazy, forward-only, non-restartable sequence of rows.
///
/// Each pull may block on I/O. The sequence ends when exhausted or after
/// yielding its first error.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// Parameters for reaching the store. The token, when present, is sent as the
/// connection password.
#[derive(Clone, Builder, PartialEq, Eq)]
pub struct ConnectionSpec {
    #[builder(setter(into))]
    pub host: String,
    #[builder(default = "DEFAULT_PORT")]
    pub port: u16,
    #[builder(setter(into))]
    pub database: String,
    #[builder(setter(into), default)]
    pub user: String,
    #[builder(setter(into, strip_option), default)]
    pub token: Option<String>,
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConnectionSpec {
    pub(crate) fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .database(&self.database);
        if !self.user.is_empty() {
            options = options.username(&self.user);
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            options = options.password(token);
        }
        options
    }
}

/// Operations the orchestrator needs from the relational side
#[async_trait]
pub trait Connector: Send {
    /// Establish the connection. Calling it on an open connector is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// User tables of the connected database, sorted by name
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Typed columns of `table` from the system catalog, in ordinal order.
    /// A missing table is a `Schema` error.
    async fn describe_table(&mut self, table: &TableRef) -> Result<Vec<Column>>;

    /// Column names of `table`, without touching its data
    async fn list_columns(&mut self, table: &TableRef) -> Result<ColumnSet> {
        let columns = self.describe_table(table).await?;
        Ok(ColumnSet::new(columns.into_iter().map(|c| c.name).collect()))
    }

    /// Open a cursor over exactly `columns` of `table`.
    async fn stream_query<'a>(
        &'a mut self,
        columns: &ColumnSet,
        table: &TableRef,
    ) -> Result<RowStream<'a>>;

    /// Insert one batch as a single statement, returning the rows written.
    /// Earlier batches are not rolled back when this fails.
    async fn insert_batch(
        &mut self,
        table: &TableRef,
        columns: &[Column],
        batch: &[Row],
    ) -> Result<u64>;

    /// Release the connection. Safe to call repeatedly; never fails.
    async fn close(&mut self);
}

/// Creates a fresh connector per job or probe
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, spec: &ConnectionSpec) -> Box<dyn Connector>;
}

/// Factory for [`PgConnector`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectorFactory;

impl ConnectorFactory for PgConnectorFactory {
    fn create(&self, spec: &ConnectionSpec) -> Box<dyn Connector> {
        Box::new(PgConnector::new(spec.clone()))
    }
}

pub struct PgConnector {
    spec: ConnectionSpec,
    conn: Option<PgConnection>,
}

impl PgConnector {
    pub fn new(spec: ConnectionSpec) -> Self {
        Self { spec, conn: None }
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        self.conn.as_mut().ok_or_else(|| {
            IngestError::Query("Connector is not connected; call connect() first".to_string())
        })
    }

    fn connection_error(&self, source: sqlx::Error) -> IngestError {
        IngestError::Connection {
            host: self.spec.host.clone(),
            port: self.spec.port,
            source,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let options = self.spec.connect_options();
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, options.connect())
            .await
            .map_err(|_| self.connection_error(sqlx::Error::PoolTimedOut))?
            .map_err(|e| self.connection_error(e))?;

        info!(
            host = %self.spec.host,
            port = self.spec.port,
            database = %self.spec.database,
            "Store connected"
        );
        self.conn = Some(conn);
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let sql = list_tables_sql(&self.spec.database);
        let conn = self.connection()?;

        let rows = conn
            .fetch_all(sqlx::raw_sql(&sql))
            .await
            .map_err(IngestError::query)?;

        rows.iter()
            .map(|row| text_cell(row, 0))
            .collect::<Result<Vec<_>>>()
    }

    async fn describe_table(&mut self, table: &TableRef) -> Result<Vec<Column>> {
        let sql = describe_table_sql(&self.spec.database, table);
        let conn = self.connection()?;

        let rows = conn
            .fetch_all(sqlx::raw_sql(&sql))
            .await
            .map_err(IngestError::query)?;

        if rows.is_empty() {
            return Err(IngestError::Schema(format!(
                "Table '{}' not found or has no columns",
                table
            )));
        }

        rows.iter()
            .map(|row| {
                Ok(Column::from_catalog(
                    text_cell(row, 0)?,
                    &text_cell(row, 1)?,
                    &text_cell(row, 2)?,
                ))
            })
            .collect()
    }

    async fn stream_query<'a>(
        &'a mut self,
        columns: &ColumnSet,
        table: &TableRef,
    ) -> Result<RowStream<'a>> {
        for name in columns.iter() {
            validate_identifier(name)?;
        }

        let described = self.describe_table(table).await?;
        let projected = project_columns(&described, columns, table)?;
        let sql = build_select_sql(&projected, table)?;
        debug!(%sql, "Opening cursor");

        let conn = self.connection()?;
        Ok(Box::pin(try_stream! {
            let mut rows = sqlx::raw_sql(&sql).fetch(conn);
            while let Some(row) = rows.try_next().await.map_err(IngestError::query)? {
                yield decode_row(&row)?;
            }
        }))
    }

    async fn insert_batch(
        &mut self,
        table: &TableRef,
        columns: &[Column],
        batch: &[Row],
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let sql = build_insert_sql(table, columns, batch)?;
        let conn = self.connection()?;
        conn.execute(sqlx::raw_sql(&sql))
            .await
            .map_err(|e| IngestError::Insert {
                rows: batch.len(),
                message: format!("{}; first row: {}", e, preview_row(&batch[0])),
            })?;

        debug!(rows = batch.len(), table = %table, "Batch inserted");
        Ok(batch.len() as u64)
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close().await {
                Ok(()) => info!(host = %self.spec.host, "Store connection closed"),
                Err(e) => warn!(error = %e, "Error while closing store connection"),
            }
        }
    }
}

/// Render a row as SQL literals for error context, truncating long values
fn preview_row(row: &Row) -> String {
    let cells: Vec<String> = row
        .cells
        .iter()
        .take(5)
        .map(|v| {
            let literal = v.to_sql_literal();
            if literal.chars().count() > 40 {
                format!("{}...", literal.chars().take(40).collect::<String>())
            } else {
                literal
            }
        })
        .collect();
    format!(
        "({}{})",
        cells.join(", "),
        if row.len() > 5 { ", ..." } else { "" }
    )
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let cells = row
        .columns()
        .iter()
        .map(|col| decode_cell(row, col.ordinal(), col.name(), col.type_info().name()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(cells))
}

/// Decode one cell by its wire type. NULL of any type becomes `Value::Null`.
fn decode_cell(row: &PgRow, idx: usize, name: &str, wire_type: &str) -> Result<Value> {
    let decoded = match wire_type {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| v.map(|b| Value::Integer(i64::from(b)))),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| v.map(Value::Integer)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(Value::from_f32)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| v.map(Value::Float)),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| v.map(Value::Date)),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| v.map(Value::Timestamp)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| v.map(|ts| Value::Timestamp(ts.naive_utc()))),
        // Enums, arrays and server-specific types all arrive as text
        _ => row
            .try_get_unchecked::<Option<String>, _>(idx)
            .map(|v| v.map(Value::Text)),
    };

    decoded
        .map(|v| v.unwrap_or(Value::Null))
        .map_err(|e| {
            IngestError::Query(format!(
                "Failed to decode column '{}' of type {}: {}",
                name, wire_type, e
            ))
        })
}

/// A non-NULL catalog cell as a string
fn text_cell(row: &PgRow, idx: usize) -> Result<String> {
    row.try_get_unchecked::<String, _>(idx)
        .map_err(|e| IngestError::Query(format!("Failed to read catalog column {}: {}", idx, e)))
}

/// Parameters of a live server for integration tests, read from
/// `FLATFILE_BRIDGE_TEST_{HOST,PORT,DATABASE,USER,PASSWORD}`. `None` when no
/// host is configured, in which case live tests return early.
#[cfg(test)]
pub(crate) fn live_test_spec() -> Option<ConnectionSpec> {
    let var = |name: &str| std::env::var(format!("FLATFILE_BRIDGE_TEST_{}", name)).ok();
    let host = var("HOST").filter(|h| !h.is_empty())?;
    let mut builder = ConnectionSpecBuilder::default();
    builder
        .host(host)
        .port(var("PORT").and_then(|p| p.parse().ok()).unwrap_or(5432u16))
        .database(var("DATABASE").unwrap_or_else(|| "postgres".to_string()))
        .user(var("USER").unwrap_or_else(|| "postgres".to_string()));
    if let Some(password) = var("PASSWORD") {
        builder.token(password);
    }
    builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_spec() -> ConnectionSpec {
        ConnectionSpecBuilder::default()
            .host("127.0.0.1")
            .port(1u16)
            .database("default")
            .user("default")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let spec = ConnectionSpecBuilder::default()
            .host("localhost")
            .database("analytics")
            .build()
            .unwrap();
        assert_eq!(spec.port, DEFAULT_PORT);
        assert_eq!(spec.user, "");
        assert!(spec.token.is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let spec = ConnectionSpecBuilder::default()
            .host("localhost")
            .database("analytics")
            .token("secret-jwt")
            .build()
            .unwrap();
        let rendered = format!("{:?}", spec);
        assert!(!rendered.contains("secret-jwt"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let mut connector = PgConnector::new(unreachable_spec());
        let err = connector.connect().await.unwrap_err();
        assert_eq!(err.kind(), "connection");
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(connector.conn.is_none());

        connector.close().await;
        connector.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut connector = PgConnector::new(unreachable_spec());
        connector.close().await;
        connector.close().await;
        assert!(connector.conn.is_none());
    }

    #[tokio::test]
    async fn test_live_close_twice_after_connect() {
        let Some(spec) = live_test_spec() else {
            return;
        };
        let mut connector = PgConnector::new(spec);
        connector.connect().await.unwrap();
        connector.connect().await.unwrap();
        assert!(connector.conn.is_some());

        connector.close().await;
        connector.close().await;
        assert!(connector.conn.is_none());

        let err = connector.list_tables().await.unwrap_err();
        assert_eq!(err.kind(), "query");
    }

    #[tokio::test]
    async fn test_live_catalog_queries_use_literals() {
        let Some(spec) = live_test_spec() else {
            return;
        };
        let mut connector = PgConnector::new(spec);
        connector.connect().await.unwrap();

        let tables = connector.list_tables().await.unwrap();
        assert!(tables.iter().all(|t| !t.is_empty()));

        let missing = TableRef::parse("no_such_table_for_flatfile_bridge").unwrap();
        let err = connector.describe_table(&missing).await.unwrap_err();
        assert_eq!(err.kind(), "schema");
        connector.close().await;
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut connector = PgConnector::new(unreachable_spec());
        let table = TableRef::parse("events").unwrap();
        let err = connector.describe_table(&table).await.unwrap_err();
        assert_eq!(err.kind(), "query");
    }

    #[tokio::test]
    async fn test_stream_query_rejects_unsafe_column_before_io() {
        let mut connector = PgConnector::new(unreachable_spec());
        let table = TableRef::parse("events").unwrap();
        let columns = ColumnSet::from(vec!["id", "name; DROP TABLE events"]);
        let err = match connector.stream_query(&columns, &table).await {
            Ok(_) => panic!("unsafe identifier accepted"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Invalid identifier"));
    }

    #[test]
    fn test_preview_row_uses_sql_literals() {
        let row = Row::new(vec![
            Value::Integer(1),
            Value::Text("it's".to_string()),
            Value::Null,
        ]);
        assert_eq!(preview_row(&row), "(1, 'it''s', NULL)");
    }
}
