//! Configuration constants for the bridge
//!
//! This module centralizes the tunable parameters used by the connector, the
//! delimited file layer and the orchestrator.

use std::time::Duration;

// ============================================================================
// Connection Configuration
// ============================================================================

/// Upper bound on establishing a store connection.
///
/// Only the handshake is bounded. Pulls from an open cursor and batch inserts
/// run without a deadline; callers needing bounded latency wrap the whole job.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

/// PostgreSQL wire protocol port exposed by ClickHouse.
pub const DEFAULT_PORT: u16 = 9005;

// ============================================================================
// Ingestion Configuration
// ============================================================================

/// Number of rows per INSERT statement when loading into the store.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

pub const MIN_BATCH_SIZE: usize = 1;

/// Largest accepted batch size. Each batch is one INSERT statement whose
/// text grows with rows times columns.
pub const MAX_BATCH_SIZE: usize = 5000;

// ============================================================================
// Flat File Configuration
// ============================================================================

pub const DEFAULT_DELIMITER: u8 = b',';

pub const QUOTE: u8 = b'"';
