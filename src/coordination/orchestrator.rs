use derive_builder::Builder;
use futures::TryStreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use crate::convert::Value;
use crate::db::connector::{ConnectionSpec, Connector, ConnectorFactory};
use crate::db::schema::{Column, TableRef, project_columns};
use crate::error::{IngestError, Result};
use crate::formats::delimited::{DelimitedRows, stream_rows, write_rows};
use crate::formats::{FileSpec, Record};
use crate::model::{Batch, ColumnSet, Row};
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// Lifecycle of a single ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Validating,
    SourceOpen,
    Streaming,
    TargetFlushing,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Validating => "validating",
            JobState::SourceOpen => "source_open",
            JobState::Streaming => "streaming",
            JobState::TargetFlushing => "target_flushing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One side of a transfer
#[derive(Debug, Clone)]
pub enum Endpoint {
    Store { spec: ConnectionSpec, table: String },
    File(FileSpec),
}

impl Endpoint {
    fn kind(&self) -> &'static str {
        match self {
            Endpoint::Store { .. } => "store",
            Endpoint::File(_) => "file",
        }
    }
}

/// Parameters of one transfer
#[derive(Debug, Clone, Builder)]
pub struct IngestionJob {
    pub source: Endpoint,
    pub target: Endpoint,
    #[builder(setter(into))]
    pub columns: ColumnSet,
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
}

impl IngestionJob {
    pub fn new(source: Endpoint, target: Endpoint, columns: ColumnSet) -> Self {
        Self {
            source,
            target,
            columns,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Check everything that can be checked without I/O.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(IngestError::validation("No columns selected"));
        }
        if let Some(dup) = self.columns.first_duplicate() {
            return Err(IngestError::validation(format!(
                "Column '{}' is selected more than once",
                dup
            )));
        }

        match (&self.source, &self.target) {
            (Endpoint::Store { table, .. }, Endpoint::File(file))
            | (Endpoint::File(file), Endpoint::Store { table, .. }) => {
                if table.trim().is_empty() {
                    return Err(IngestError::validation("Table name is required"));
                }
                if file.path.as_os_str().is_empty() {
                    return Err(IngestError::validation("File path is required"));
                }
            }
            (source, target) => {
                return Err(IngestError::validation(format!(
                    "Unsupported direction: {} to {}",
                    source.kind(),
                    target.kind()
                )));
            }
        }

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(IngestError::validation(format!(
                "Batch size must be between {} and {}, got {}",
                MIN_BATCH_SIZE, MAX_BATCH_SIZE, self.batch_size
            )));
        }
        Ok(())
    }
}

/// Terminal outcome of a job
#[derive(Debug)]
pub enum Outcome {
    Success,
    PartialFailure(IngestError),
}

/// Rows transferred plus outcome. Built once when the job ends.
#[derive(Debug)]
pub struct JobResult {
    pub rows_transferred: u64,
    pub outcome: Outcome,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub fn error(&self) -> Option<&IngestError> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::PartialFailure(e) => Some(e),
        }
    }
}

/// Mutable bookkeeping for a running job
struct JobProgress {
    job_id: Uuid,
    state: JobState,
    rows_transferred: u64,
    stats: ProgressStats,
}

impl JobProgress {
    fn new() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            state: JobState::Validating,
            rows_transferred: 0,
            stats: ProgressStats::new(),
        }
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            debug!("Job {}: {} -> {}", self.job_id, self.state, next);
            self.state = next;
        }
    }

    fn record(&mut self, event: TelemetryEvent) {
        if let TelemetryEvent::BatchFlushed { rows, .. } = event {
            self.rows_transferred += rows;
        }
        self.stats.update(&event);
    }
}

/// Runs ingestion jobs one at a time, creating a fresh connector per job.
pub struct Orchestrator {
    factory: Arc<dyn ConnectorFactory>,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self { factory }
    }

    /// Run `job` to completion or terminal failure.
    ///
    /// Never returns an error directly: failures become
    /// [`Outcome::PartialFailure`] with the rows committed before the failure.
    /// Every connector opened here is closed before this returns.
    pub async fn run(&self, job: IngestionJob) -> JobResult {
        let start_time = Instant::now();
        let mut progress = JobProgress::new();
        info!(
            "Starting ingestion job {}: {} -> {} ({} columns)",
            progress.job_id,
            job.source.kind(),
            job.target.kind(),
            job.columns.len()
        );

        let result = match job.validate() {
            Ok(()) => self.transfer(&job, &mut progress).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                progress.transition(JobState::Completed);
                let (p50, p90, p99) = progress.stats.get_percentiles();
                info!(
                    "Job {} completed: {} rows ({} read) in {:.2}s ({} batches, flush p50={:?}ms p90={:?}ms p99={:?}ms)",
                    progress.job_id,
                    progress.rows_transferred,
                    progress.stats.rows_read,
                    start_time.elapsed().as_secs_f64(),
                    progress.stats.batches_flushed,
                    p50,
                    p90,
                    p99
                );
                JobResult {
                    rows_transferred: progress.rows_transferred,
                    outcome: Outcome::Success,
                }
            }
            Err(e) => {
                let failed_in = progress.state;
                progress.transition(JobState::Failed);
                warn!(
                    "Job {} failed during {} after {} rows ({} read, {} in failed batches): [{}] {}",
                    progress.job_id,
                    failed_in,
                    progress.rows_transferred,
                    progress.stats.rows_read,
                    progress.stats.rows_failed,
                    e.kind(),
                    e
                );
                JobResult {
                    rows_transferred: progress.rows_transferred,
                    outcome: Outcome::PartialFailure(e),
                }
            }
        }
    }

    async fn transfer(&self, job: &IngestionJob, progress: &mut JobProgress) -> Result<()> {
        match (&job.source, &job.target) {
            (Endpoint::Store { spec, table }, Endpoint::File(file)) => {
                self.store_to_file(spec, table, file, &job.columns, progress)
                    .await
            }
            (Endpoint::File(file), Endpoint::Store { spec, table }) => {
                self.file_to_store(file, spec, table, &job.columns, job.batch_size, progress)
                    .await
            }
            (source, target) => Err(IngestError::validation(format!(
                "Unsupported direction: {} to {}",
                source.kind(),
                target.kind()
            ))),
        }
    }

    async fn store_to_file(
        &self,
        spec: &ConnectionSpec,
        table: &str,
        file: &FileSpec,
        columns: &ColumnSet,
        progress: &mut JobProgress,
    ) -> Result<()> {
        progress.transition(JobState::SourceOpen);
        let table = TableRef::parse(table)?;

        let mut connector = self.factory.create(spec);
        let result = export_table(connector.as_mut(), &table, file, columns, progress).await;
        connector.close().await;
        result
    }

    async fn file_to_store(
        &self,
        file: &FileSpec,
        spec: &ConnectionSpec,
        table: &str,
        columns: &ColumnSet,
        batch_size: usize,
        progress: &mut JobProgress,
    ) -> Result<()> {
        progress.transition(JobState::SourceOpen);
        let table = TableRef::parse(table)?;
        let records = stream_rows(file)?;
        let positions = header_positions(records.header(), columns)?;

        let mut connector = self.factory.create(spec);
        let result = import_rows(
            connector.as_mut(),
            &table,
            columns,
            records,
            &positions,
            batch_size,
            progress,
        )
        .await;
        connector.close().await;
        result
    }
}

/// Stream the selected columns out of the store, buffer them, then write the
/// file in one pass.
async fn export_table(
    connector: &mut dyn Connector,
    table: &TableRef,
    file: &FileSpec,
    columns: &ColumnSet,
    progress: &mut JobProgress,
) -> Result<()> {
    connector.connect().await?;
    let mut rows = connector.stream_query(columns, table).await?;

    progress.transition(JobState::Streaming);
    let mut buffered: Vec<Vec<String>> = Vec::new();
    while let Some(row) = rows.try_next().await? {
        if row.len() != columns.len() {
            return Err(IngestError::Schema(format!(
                "Query returned {} cells for {} selected columns",
                row.len(),
                columns.len()
            )));
        }
        buffered.push(row.to_text_fields());
    }
    drop(rows);
    progress.record(TelemetryEvent::RowsRead {
        rows: buffered.len() as u64,
    });

    progress.transition(JobState::TargetFlushing);
    let flush_start = Instant::now();
    let written = write_rows(file, &buffered)?;
    progress.record(TelemetryEvent::BatchFlushed {
        rows: written,
        duration_ms: flush_start.elapsed().as_millis() as u64,
    });
    info!("Wrote {} rows to {}", written, file.path.display());
    Ok(())
}

/// Convert file records against the target table's column types and insert
/// them batch by batch.
async fn import_rows(
    connector: &mut dyn Connector,
    table: &TableRef,
    columns: &ColumnSet,
    records: DelimitedRows,
    positions: &[usize],
    batch_size: usize,
    progress: &mut JobProgress,
) -> Result<()> {
    connector.connect().await?;
    let described = connector.describe_table(table).await?;
    let target_columns = project_columns(&described, columns, table)?;

    progress.transition(JobState::Streaming);
    let mut batch: Batch = Vec::with_capacity(batch_size);
    for record in records {
        let row = convert_record(&record?, positions, &target_columns)?;
        batch.push(row);
        if batch.len() >= batch_size {
            flush_batch(connector, table, &target_columns, &mut batch, progress).await?;
        }
    }
    if !batch.is_empty() {
        flush_batch(connector, table, &target_columns, &mut batch, progress).await?;
    }
    Ok(())
}

async fn flush_batch(
    connector: &mut dyn Connector,
    table: &TableRef,
    columns: &[Column],
    batch: &mut Batch,
    progress: &mut JobProgress,
) -> Result<()> {
    progress.transition(JobState::TargetFlushing);
    let rows = std::mem::take(batch);
    progress.record(TelemetryEvent::RowsRead {
        rows: rows.len() as u64,
    });

    let flush_start = Instant::now();
    match connector.insert_batch(table, columns, &rows).await {
        Ok(inserted) => {
            let duration_ms = flush_start.elapsed().as_millis() as u64;
            debug!("Flushed {} rows into {} in {}ms", inserted, table, duration_ms);
            progress.record(TelemetryEvent::BatchFlushed {
                rows: inserted,
                duration_ms,
            });
            progress.transition(JobState::Streaming);
            Ok(())
        }
        Err(e) => {
            progress.record(TelemetryEvent::BatchFailed {
                rows: rows.len() as u64,
            });
            Err(e)
        }
    }
}

/// Index of each selected column within the file header
fn header_positions(header: &ColumnSet, columns: &ColumnSet) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|name| {
            header.position(name).ok_or_else(|| {
                IngestError::Schema(format!("Column '{}' not found in file header", name))
            })
        })
        .collect()
}

fn convert_record(record: &Record, positions: &[usize], columns: &[Column]) -> Result<Row> {
    let cells = positions
        .iter()
        .zip(columns)
        .map(|(&pos, column)| {
            let token = record.fields.get(pos).map(String::as_str).unwrap_or("");
            Value::from_text(token, &column.sql_type, &column.name).inspect_err(|_| {
                debug!("Conversion failed on line {}", record.line);
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(cells))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connector::ConnectionSpecBuilder;
    use crate::db::schema::SqlType;

    fn store() -> Endpoint {
        Endpoint::Store {
            spec: ConnectionSpecBuilder::default()
                .host("localhost")
                .database("default")
                .build()
                .unwrap(),
            table: "events".to_string(),
        }
    }

    fn file() -> Endpoint {
        Endpoint::File(FileSpec::new("out.csv", b','))
    }

    #[test]
    fn test_validate_accepts_both_directions() {
        let columns = ColumnSet::from(vec!["id", "name"]);
        assert!(IngestionJob::new(store(), file(), columns.clone()).validate().is_ok());
        assert!(IngestionJob::new(file(), store(), columns).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_same_kind() {
        let columns = ColumnSet::from(vec!["id"]);
        let err = IngestionJob::new(file(), file(), columns.clone())
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("file to file"));

        let err = IngestionJob::new(store(), store(), columns)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("store to store"));
    }

    #[test]
    fn test_validate_columns() {
        let err = IngestionJob::new(store(), file(), ColumnSet::default())
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = IngestionJob::new(store(), file(), ColumnSet::from(vec!["id", "id"]))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("'id'"));
    }

    #[test]
    fn test_validate_batch_size() {
        let build = |size| {
            IngestionJobBuilder::default()
                .source(file())
                .target(store())
                .columns(vec!["id"])
                .batch_size(size)
                .build()
                .unwrap()
        };
        assert!(build(0).validate().is_err());
        assert!(build(1).validate().is_ok());
        assert!(build(MAX_BATCH_SIZE).validate().is_ok());
        assert!(build(MAX_BATCH_SIZE + 1).validate().is_err());
    }

    #[test]
    fn test_builder_default_batch_size() {
        let job = IngestionJobBuilder::default()
            .source(store())
            .target(file())
            .columns(vec!["id"])
            .build()
            .unwrap();
        assert_eq!(job.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_header_positions() {
        let header = ColumnSet::from(vec!["name", "id", "extra"]);
        let positions = header_positions(&header, &ColumnSet::from(vec!["id", "name"])).unwrap();
        assert_eq!(positions, vec![1, 0]);

        let err = header_positions(&header, &ColumnSet::from(vec!["missing"])).unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn test_convert_record() {
        let columns = vec![
            Column::from_catalog("id".into(), "integer", "NO"),
            Column::from_catalog("name".into(), "text", "YES"),
        ];
        let record = Record {
            line: 2,
            fields: vec!["x".into(), "7".into(), "".into()],
        };
        let row = convert_record(&record, &[1, 0], &columns).unwrap();
        assert_eq!(
            row.cells,
            vec![Value::Integer(7), Value::Text("x".to_string())]
        );

        let bad = Record {
            line: 3,
            fields: vec!["x".into(), "seven".into()],
        };
        let err = convert_record(&bad, &[1, 0], &columns).unwrap_err();
        assert!(matches!(err, IngestError::Conversion { ref column, .. } if column == "id"));
        assert_eq!(columns[0].sql_type, SqlType::Integer);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(JobState::TargetFlushing.to_string(), "target_flushing");
        assert_eq!(JobState::SourceOpen.to_string(), "source_open");
    }

    #[test]
    fn test_progress_tracks_read_and_failed_rows() {
        let mut progress = JobProgress::new();
        progress.record(TelemetryEvent::RowsRead { rows: 5 });
        progress.record(TelemetryEvent::BatchFlushed {
            rows: 3,
            duration_ms: 4,
        });
        progress.record(TelemetryEvent::BatchFailed { rows: 2 });

        assert_eq!(progress.rows_transferred, 3);
        assert_eq!(progress.stats.rows_read, 5);
        assert_eq!(progress.stats.rows_failed, 2);
        assert_eq!(progress.stats.batches_flushed, 1);
    }
}
