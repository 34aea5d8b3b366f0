//! Public boundary API.
//!
//! Each handler takes an explicit request struct (the JSON contract used by
//! the web front end, camelCase field names), validates required fields
//! before building any spec, and answers with a [`Response`] envelope. Errors
//! never escape a handler: they are rendered into the envelope's message.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::DEFAULT_PORT;
use crate::coordination::{Endpoint, IngestionJobBuilder, Orchestrator, Outcome};
use crate::db::connector::{ConnectionSpec, ConnectorFactory, PgConnectorFactory};
use crate::db::schema::TableRef;
use crate::error::{IngestError, Result};
use crate::formats::FileSpec;
use crate::formats::delimited::read_schema;
use crate::model::ColumnSet;

/// Kind of endpoint named in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    ClickHouse,
    FlatFile,
}

impl FromStr for EndpointKind {
    type Err = IngestError;

    /// Parse kind from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clickhouse" => Ok(EndpointKind::ClickHouse),
            "flatfile" => Ok(EndpointKind::FlatFile),
            _ => Err(IngestError::validation(format!(
                "Unsupported endpoint type '{}'. Supported types: ClickHouse, FlatFile",
                s
            ))),
        }
    }
}

/// Store connection fields shared by every request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub jwt_token: Option<String>,
}

impl StoreParams {
    fn to_spec(&self) -> Result<ConnectionSpec> {
        Ok(ConnectionSpec {
            host: required(&self.host, "host")?,
            port: self.port.unwrap_or(DEFAULT_PORT),
            database: required(&self.database, "database")?,
            user: self.user.clone().unwrap_or_default(),
            token: self.jwt_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

/// Flat file fields shared by every request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParams {
    pub file_path: Option<String>,
    pub delimiter: Option<String>,
}

impl FileParams {
    fn to_spec(&self) -> Result<FileSpec> {
        let path = required(&self.file_path, "filePath")?;
        let delimiter = match self.delimiter.as_deref() {
            Some(d) if !d.is_empty() => FileSpec::parse_delimiter(d)?,
            _ => return Err(IngestError::validation("Missing required field 'delimiter'")),
        };
        Ok(FileSpec::new(path, delimiter))
    }
}

/// `/connect`: check that a store or file can be opened
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub source_type: String,
    #[serde(flatten)]
    pub store: StoreParams,
    #[serde(flatten)]
    pub file: FileParams,
}

/// `/loadColumns` and table listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    pub source_type: String,
    #[serde(flatten)]
    pub store: StoreParams,
    #[serde(flatten)]
    pub file: FileParams,
    pub table_name: Option<String>,
}

/// `/ingest`: run one transfer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub source_type: String,
    pub target_type: String,
    #[serde(flatten)]
    pub store: StoreParams,
    #[serde(flatten)]
    pub file: FileParams,
    /// Source table when exporting from the store
    pub table_name: Option<String>,
    /// Target table when loading into the store; falls back to `tableName`
    pub target_table: Option<String>,
    /// Comma-joined column names
    pub selected_columns: String,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Response envelope returned by every handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: Status,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_transferred: Option<u64>,
}

impl Response {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            data: None,
            rows_transferred: None,
        }
    }

    fn error(err: &IngestError) -> Self {
        warn!("Request failed: [{}] {}", err.kind(), err);
        Self {
            status: Status::Error,
            message: err.to_string(),
            data: None,
            rows_transferred: None,
        }
    }

    fn with_data(mut self, data: Vec<String>) -> Self {
        self.data = Some(data);
        self
    }

    fn with_rows(mut self, rows: u64) -> Self {
        self.rows_transferred = Some(rows);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(IngestError::validation(format!(
            "Missing required field '{}'",
            field
        ))),
    }
}

/// Entry point for the boundary handlers.
///
/// Holds the connector factory so tests can swap the store out.
#[derive(Clone)]
pub struct Bridge {
    factory: Arc<dyn ConnectorFactory>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(Arc::new(PgConnectorFactory))
    }
}

impl Bridge {
    pub fn new(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self { factory }
    }

    /// Open then close a store connection, or check a file path.
    pub async fn probe_connection(&self, request: &ProbeRequest) -> Response {
        match self.probe(request).await {
            Ok(message) => Response::success(message),
            Err(e) => Response::error(&e),
        }
    }

    /// Column names of a store table or a file header.
    pub async fn discover_columns(&self, request: &DiscoverRequest) -> Response {
        match self.columns(request).await {
            Ok(columns) => Response::success("Columns loaded").with_data(columns.into_names()),
            Err(e) => Response::error(&e),
        }
    }

    /// Tables of the connected store database.
    pub async fn discover_tables(&self, request: &DiscoverRequest) -> Response {
        match self.tables(request).await {
            Ok(tables) => Response::success("Tables loaded").with_data(tables),
            Err(e) => Response::error(&e),
        }
    }

    /// Run one transfer and report the rows moved.
    pub async fn run_ingestion(&self, request: &IngestRequest) -> Response {
        let job = match build_job(request) {
            Ok(job) => job,
            Err(e) => return Response::error(&e),
        };

        let orchestrator = Orchestrator::new(self.factory.clone());
        let result = orchestrator.run(job).await;
        match result.outcome {
            Outcome::Success => Response::success(format!(
                "Ingestion successful. Records processed: {}",
                result.rows_transferred
            ))
            .with_rows(result.rows_transferred),
            Outcome::PartialFailure(e) => Response::error(&e).with_rows(result.rows_transferred),
        }
    }

    async fn probe(&self, request: &ProbeRequest) -> Result<&'static str> {
        match request.source_type.parse::<EndpointKind>()? {
            EndpointKind::ClickHouse => {
                let spec = request.store.to_spec()?;
                let mut connector = self.factory.create(&spec);
                let result = connector.connect().await;
                connector.close().await;
                result?;
                info!("Probe of {}:{} succeeded", spec.host, spec.port);
                Ok("Connection successful")
            }
            EndpointKind::FlatFile => {
                request.file.to_spec()?.check_readable()?;
                Ok("Flat file access successful")
            }
        }
    }

    async fn columns(&self, request: &DiscoverRequest) -> Result<ColumnSet> {
        match request.source_type.parse::<EndpointKind>()? {
            EndpointKind::ClickHouse => {
                let spec = request.store.to_spec()?;
                let table = TableRef::parse(&required(&request.table_name, "tableName")?)?;
                let mut connector = self.factory.create(&spec);
                let result = match connector.connect().await {
                    Ok(()) => connector.list_columns(&table).await,
                    Err(e) => Err(e),
                };
                connector.close().await;
                result
            }
            EndpointKind::FlatFile => read_schema(&request.file.to_spec()?),
        }
    }

    async fn tables(&self, request: &DiscoverRequest) -> Result<Vec<String>> {
        match request.source_type.parse::<EndpointKind>()? {
            EndpointKind::ClickHouse => {
                let spec = request.store.to_spec()?;
                let mut connector = self.factory.create(&spec);
                let result = match connector.connect().await {
                    Ok(()) => connector.list_tables().await,
                    Err(e) => Err(e),
                };
                connector.close().await;
                result
            }
            EndpointKind::FlatFile => Err(IngestError::validation(
                "Table listing is only available for ClickHouse sources",
            )),
        }
    }
}

/// Map an ingestion request onto a job. No I/O happens here.
fn build_job(request: &IngestRequest) -> Result<crate::coordination::IngestionJob> {
    let source_kind = request.source_type.parse::<EndpointKind>()?;
    let target_kind = request.target_type.parse::<EndpointKind>()?;

    let (source, target) = match (source_kind, target_kind) {
        (EndpointKind::ClickHouse, EndpointKind::FlatFile) => {
            let table = required(&request.table_name, "tableName")?;
            (
                Endpoint::Store {
                    spec: request.store.to_spec()?,
                    table,
                },
                Endpoint::File(request.file.to_spec()?),
            )
        }
        (EndpointKind::FlatFile, EndpointKind::ClickHouse) => {
            let table = required(&request.target_table, "targetTable")
                .or_else(|_| required(&request.table_name, "targetTable"))?;
            (
                Endpoint::File(request.file.to_spec()?),
                Endpoint::Store {
                    spec: request.store.to_spec()?,
                    table,
                },
            )
        }
        (source, target) => {
            return Err(IngestError::validation(format!(
                "Unsupported direction: {:?} to {:?}",
                source, target
            )));
        }
    };

    let mut builder = IngestionJobBuilder::default();
    builder
        .source(source)
        .target(target)
        .columns(ColumnSet::parse(&request.selected_columns, ','));
    if let Some(batch_size) = request.batch_size {
        builder.batch_size(batch_size);
    }
    builder
        .build()
        .map_err(|e| IngestError::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_kind_parse() {
        assert_eq!("ClickHouse".parse::<EndpointKind>().unwrap(), EndpointKind::ClickHouse);
        assert_eq!("clickhouse".parse::<EndpointKind>().unwrap(), EndpointKind::ClickHouse);
        assert_eq!("FLATFILE".parse::<EndpointKind>().unwrap(), EndpointKind::FlatFile);

        let err = "Postgres".parse::<EndpointKind>().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_ingest_request_from_json() {
        let request: IngestRequest = serde_json::from_value(json!({
            "sourceType": "ClickHouse",
            "targetType": "FlatFile",
            "host": "ch.local",
            "port": 9005,
            "database": "default",
            "user": "default",
            "jwtToken": "",
            "tableName": "events",
            "selectedColumns": "id, name",
            "filePath": "/tmp/out.csv",
            "delimiter": ","
        }))
        .unwrap();

        assert_eq!(request.store.host.as_deref(), Some("ch.local"));
        assert_eq!(request.store.port, Some(9005));
        assert_eq!(request.file.file_path.as_deref(), Some("/tmp/out.csv"));

        let job = build_job(&request).unwrap();
        assert_eq!(job.columns.names(), &["id", "name"]);
        match job.source {
            Endpoint::Store { spec, table } => {
                assert_eq!(table, "events");
                assert_eq!(spec.token, None);
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_port_null_defaults() {
        let request: ProbeRequest = serde_json::from_value(json!({
            "sourceType": "ClickHouse",
            "host": "h",
            "port": null,
            "database": "db"
        }))
        .unwrap();
        assert_eq!(request.store.to_spec().unwrap().port, DEFAULT_PORT);
    }

    #[test]
    fn test_missing_fields_are_validation_errors() {
        let store = StoreParams {
            host: Some("  ".to_string()),
            database: Some("db".to_string()),
            ..Default::default()
        };
        assert_eq!(store.to_spec().unwrap_err().kind(), "validation");

        let file = FileParams {
            file_path: Some("data.csv".to_string()),
            delimiter: None,
        };
        let err = file.to_spec().unwrap_err();
        assert!(err.to_string().contains("delimiter"));

        let file = FileParams {
            file_path: Some("data.csv".to_string()),
            delimiter: Some("\\t".to_string()),
        };
        assert_eq!(file.to_spec().unwrap().delimiter, b'\t');
    }

    #[test]
    fn test_build_job_target_table_fallback() {
        let request = IngestRequest {
            source_type: "FlatFile".to_string(),
            target_type: "ClickHouse".to_string(),
            store: StoreParams {
                host: Some("h".to_string()),
                database: Some("db".to_string()),
                ..Default::default()
            },
            file: FileParams {
                file_path: Some("in.csv".to_string()),
                delimiter: Some("|".to_string()),
            },
            table_name: Some("fallback".to_string()),
            selected_columns: "a".to_string(),
            ..Default::default()
        };
        match build_job(&request).unwrap().target {
            Endpoint::Store { table, .. } => assert_eq!(table, "fallback"),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_build_job_rejects_same_kind() {
        let request = IngestRequest {
            source_type: "FlatFile".to_string(),
            target_type: "flatfile".to_string(),
            selected_columns: "a".to_string(),
            ..Default::default()
        };
        assert_eq!(build_job(&request).unwrap_err().kind(), "validation");
    }

    #[test]
    fn test_response_envelope_shape() {
        let ok = Response::success("Ingestion successful. Records processed: 3").with_rows(3);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({
                "status": "success",
                "message": "Ingestion successful. Records processed: 3",
                "rowsTransferred": 3
            })
        );

        let err = Response::error(&IngestError::validation("No columns selected"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"status": "error", "message": "Validation error: No columns selected"})
        );
    }
}
