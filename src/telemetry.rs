/// Progress events emitted by the orchestrator while a job runs
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Source rows were pulled and converted
    RowsRead { rows: u64 },
    /// A batch was committed to the target
    BatchFlushed { rows: u64, duration_ms: u64 },
    /// The target rejected a batch
    BatchFailed { rows: u64 },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub rows_read: u64,
    pub rows_flushed: u64,
    pub rows_failed: u64,
    pub batches_flushed: usize,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::RowsRead { rows } => {
                self.rows_read += rows;
            }
            TelemetryEvent::BatchFlushed { rows, duration_ms } => {
                self.rows_flushed += rows;
                self.batches_flushed += 1;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::BatchFailed { rows } => {
                self.rows_failed += rows;
            }
        }
    }

    /// Nearest-rank percentile of batch flush durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = rank.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
