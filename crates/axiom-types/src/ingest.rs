//! Ingest result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one or more ingest requests.
///
/// Statuses are additive: [`IngestStatus::add`] folds the status of another
/// request into this one, which is how the channel pipeline reports a single
/// result across all of its flushes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatus {
    /// Number of events accepted by the server.
    pub ingested: u64,
    /// Number of events rejected by the server.
    pub failed: u64,
    /// Per-event failure details for rejected events.
    #[serde(default)]
    pub failures: Vec<IngestFailure>,
    /// Number of payload bytes the server processed.
    pub processed_bytes: u64,
    /// Number of storage blocks created by the request.
    #[serde(default)]
    pub blocks_created: u32,
    /// Length of the server-side write-ahead log after the request.
    #[serde(default)]
    pub wal_length: u32,
    /// Trace ID of the last request, read from the `X-Axiom-Trace-Id` header.
    #[serde(skip)]
    pub trace_id: Option<String>,
}

impl IngestStatus {
    /// Merges `other` into `self`.
    ///
    /// Counts are summed and failure lists concatenated. The WAL length and
    /// trace ID are taken from `other`, the more recent of the two.
    pub fn add(&mut self, other: IngestStatus) {
        self.ingested += other.ingested;
        self.failed += other.failed;
        self.failures.extend(other.failures);
        self.processed_bytes += other.processed_bytes;
        self.blocks_created += other.blocks_created;
        self.wal_length = other.wal_length;
        if other.trace_id.is_some() {
            self.trace_id = other.trace_id;
        }
    }

    /// Returns `true` if the request succeeded but some events were rejected.
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }

    /// Total number of events the server saw, accepted or not.
    pub fn total(&self) -> u64 {
        self.ingested + self.failed
    }
}

/// A single rejected event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    /// Timestamp of the rejected event.
    pub timestamp: DateTime<Utc>,
    /// Reason the server gave for rejecting it.
    pub error: String,
}
