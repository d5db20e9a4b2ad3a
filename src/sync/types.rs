//! Sync data types
//!
//! Defines the values that flow through a synchronization cycle:
//! - Sources and the snapshots read from them
//! - Checkpoints persisted per source
//! - Per-cycle reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::gateway::RangeDescriptor;

use super::fingerprint::Fingerprint;

/// One replica participating in synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Opaque identifier (a spreadsheet id for the Sheets gateway)
    pub id: String,
    /// Cells read from and written to
    pub range: RangeDescriptor,
}

impl Source {
    pub fn new(id: impl Into<String>, range: RangeDescriptor) -> Self {
        Self {
            id: id.into(),
            range,
        }
    }
}

/// Full tabular content of a source's range, rows of columns
///
/// Order is significant in both dimensions. Cells are scalar JSON values
/// (strings, numbers, booleans or null), matching what tabular APIs return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    rows: Vec<Vec<Value>>,
}

impl Snapshot {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Widest row, in cells
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}

/// Persisted record of the latest known content of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    pub snapshot: Snapshot,
    pub fingerprint: Fingerprint,
    /// When the change was recorded
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Build a checkpoint, fingerprinting the snapshot
    pub fn new(source_id: impl Into<String>, snapshot: Snapshot, timestamp: DateTime<Utc>) -> Self {
        let fingerprint = Fingerprint::of(&snapshot);
        Self {
            source_id: source_id.into(),
            snapshot,
            fingerprint,
            timestamp,
        }
    }

    /// Lightweight view without the snapshot body
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            source_id: self.source_id.clone(),
            fingerprint: self.fingerprint,
            timestamp: self.timestamp,
            rows: self.snapshot.row_count(),
        }
    }
}

/// Checkpoint metadata for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    pub fingerprint: Fingerprint,
    pub timestamp: DateTime<Utc>,
    pub rows: usize,
}

/// What happened to one source during the poll phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    /// First checkpoint recorded for this source
    Baseline,
    /// Content differed from the checkpoint on file and was persisted
    Changed,
    /// Content now equals the previous canonical snapshot (received by
    /// broadcast); recorded with the canonical timestamp
    Adopted,
    /// Content matched the checkpoint on file
    Unchanged,
    /// Fetch failed; source skipped this cycle
    FetchFailed,
    /// Checkpoint lookup or write failed; update abandoned this cycle
    CheckpointFailed,
}

impl PollStatus {
    /// Whether a checkpoint write happened
    pub fn persisted(self) -> bool {
        matches!(self, PollStatus::Baseline | PollStatus::Changed | PollStatus::Adopted)
    }
}

/// What happened to one source during the broadcast phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Written,
    ClearFailed,
    WriteFailed,
}

/// Outcome for one source in one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport<S> {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    pub status: S,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<S> SourceReport<S> {
    pub fn ok(source_id: &str, status: S) -> Self {
        Self {
            source_id: source_id.to_string(),
            status,
            error: None,
        }
    }

    pub fn failed(source_id: &str, status: S, error: impl ToString) -> Self {
        Self {
            source_id: source_id.to_string(),
            status,
            error: Some(error.to_string()),
        }
    }
}

/// Summary of one completed cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    #[serde(rename = "cycleId")]
    pub cycle_id: Uuid,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
    pub polls: Vec<SourceReport<PollStatus>>,
    /// Source whose snapshot was broadcast, if any checkpoint existed
    #[serde(rename = "canonicalSource")]
    pub canonical_source: Option<String>,
    pub broadcasts: Vec<SourceReport<BroadcastStatus>>,
}

impl CycleReport {
    /// Number of checkpoint writes this cycle
    pub fn persisted_count(&self) -> usize {
        self.polls.iter().filter(|p| p.status.persisted()).count()
    }

    pub fn poll_status(&self, source_id: &str) -> Option<PollStatus> {
        self.polls
            .iter()
            .find(|p| p.source_id == source_id)
            .map(|p| p.status)
    }

    pub fn broadcast_status(&self, source_id: &str) -> Option<BroadcastStatus> {
        self.broadcasts
            .iter()
            .find(|b| b.source_id == source_id)
            .map(|b| b.status)
    }
}
