//! Broadcast of the canonical snapshot
//!
//! Every source, including the one the snapshot came from, is cleared and
//! rewritten. Sources are handled concurrently and fail independently.
//! A source is only cleared when the snapshot fits its range, so a rejected
//! write never leaves it empty.

use std::time::Duration;

use futures::future::join_all;

use super::engine::bounded;
use super::types::{BroadcastStatus, Checkpoint, Source, SourceReport};
use crate::gateway::{SourceGateway, WriteError};

/// Pushes a canonical snapshot to every source
pub struct Broadcaster<'a> {
    gateway: &'a dyn SourceGateway,
    call_timeout: Duration,
}

impl<'a> Broadcaster<'a> {
    pub fn new(gateway: &'a dyn SourceGateway, call_timeout: Duration) -> Self {
        Self {
            gateway,
            call_timeout,
        }
    }

    /// Clear then write the canonical snapshot on all sources
    pub async fn broadcast(
        &self,
        canonical: &Checkpoint,
        sources: &[Source],
    ) -> Vec<SourceReport<BroadcastStatus>> {
        join_all(sources.iter().map(|source| self.replace(canonical, source))).await
    }

    async fn replace(&self, canonical: &Checkpoint, source: &Source) -> SourceReport<BroadcastStatus> {
        let timeout = self.call_timeout;
        let snapshot = &canonical.snapshot;

        // A clear is only safe when the write that follows can succeed
        let (rows, columns) = (snapshot.row_count(), snapshot.column_count());
        if !source.range.fits(rows, columns) {
            let e = WriteError::OutOfRange {
                rows,
                columns,
                range: source.range.to_string(),
            };
            tracing::warn!(source_id = %source.id, error = %e, "Canonical snapshot does not fit source, left untouched");
            return SourceReport::failed(&source.id, BroadcastStatus::WriteFailed, e);
        }

        // Write must not start until the clear has completed
        if let Err(e) = bounded(timeout, self.gateway.clear(source), || WriteError::Timeout(timeout)).await {
            tracing::warn!(source_id = %source.id, error = %e, "Failed to clear source before broadcast");
            return SourceReport::failed(&source.id, BroadcastStatus::ClearFailed, e);
        }

        let written = bounded(
            timeout,
            self.gateway.write(source, snapshot),
            || WriteError::Timeout(timeout),
        )
        .await;

        match written {
            Ok(()) => {
                tracing::debug!(
                    source_id = %source.id,
                    canonical = %canonical.source_id,
                    "Broadcast canonical snapshot"
                );
                SourceReport::ok(&source.id, BroadcastStatus::Written)
            }
            Err(e) => {
                tracing::warn!(source_id = %source.id, error = %e, "Failed to write canonical snapshot");
                SourceReport::failed(&source.id, BroadcastStatus::WriteFailed, e)
            }
        }
    }
}
