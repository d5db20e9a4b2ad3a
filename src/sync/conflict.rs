//! Canonical snapshot selection
//!
//! Whole-snapshot last-writer-wins: the checkpoint with the newest timestamp
//! is canonical. Checkpoints written in the same cycle share a timestamp, so
//! ties are broken by source id (lexicographically smallest wins), never by
//! iteration order.

use std::cmp::Ordering;

use super::types::Checkpoint;

/// Ordering under which the canonical checkpoint is the maximum
fn precedence(a: &Checkpoint, b: &Checkpoint) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| b.source_id.cmp(&a.source_id))
}

/// Pick the canonical checkpoint, or `None` if there are none yet
pub fn select_canonical(checkpoints: &[Checkpoint]) -> Option<&Checkpoint> {
    checkpoints.iter().max_by(|a, b| precedence(a, b))
}
