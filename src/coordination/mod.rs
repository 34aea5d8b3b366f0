//! Single-job ingestion orchestration

pub mod orchestrator;

pub use orchestrator::{
    Endpoint, IngestionJob, IngestionJobBuilder, JobResult, JobState, Orchestrator, Outcome,
};
