//! Change detection
//!
//! Compares a freshly fetched snapshot against the checkpoint on file.

use super::fingerprint::Fingerprint;
use super::store::{CheckpointStore, StoreError};
use super::types::Snapshot;

/// Result of comparing a snapshot with its source's checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// No checkpoint on file for the source
    New { fingerprint: Fingerprint },
    /// Checkpoint on file has a different fingerprint
    Changed {
        fingerprint: Fingerprint,
        previous: Fingerprint,
    },
    /// Checkpoint on file matches
    Unchanged { fingerprint: Fingerprint },
}

impl Detection {
    pub fn is_change(&self) -> bool {
        !matches!(self, Detection::Unchanged { .. })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match *self {
            Detection::New { fingerprint }
            | Detection::Changed { fingerprint, .. }
            | Detection::Unchanged { fingerprint } => fingerprint,
        }
    }
}

/// Detects content changes against the checkpoint store
pub struct ChangeDetector<'a> {
    store: &'a dyn CheckpointStore,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(store: &'a dyn CheckpointStore) -> Self {
        Self { store }
    }

    /// Fingerprint the snapshot and compare it with the stored one
    pub async fn detect(&self, source_id: &str, snapshot: &Snapshot) -> Result<Detection, StoreError> {
        let fingerprint = Fingerprint::of(snapshot);

        match self.store.read_checkpoint(source_id).await {
            Ok(checkpoint) if checkpoint.fingerprint == fingerprint => {
                Ok(Detection::Unchanged { fingerprint })
            }
            Ok(checkpoint) => Ok(Detection::Changed {
                fingerprint,
                previous: checkpoint.fingerprint,
            }),
            Err(StoreError::NotFound(_)) => Ok(Detection::New { fingerprint }),
            Err(e) => Err(e),
        }
    }
}
