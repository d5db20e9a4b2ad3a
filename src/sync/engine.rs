//! Synchronization cycle
//!
//! One cycle is: poll every source concurrently (fetch, fingerprint,
//! compare, persist on change), wait for all of them, select the canonical
//! checkpoint, then broadcast it to every source.
//!
//! Only polling and selection can be interrupted by the cycle deadline or by
//! cancellation. Once a broadcast starts it runs to completion, each gateway
//! call bounded by the per-call timeout, so a source is never left between
//! its clear and its write.
//!
//! A source whose new content is exactly the previously broadcast canonical
//! snapshot is recorded with the canonical's timestamp rather than the
//! cycle's. Receiving a broadcast is not an edit, so it must not outrank a
//! genuine edit made on another source in the same cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::broadcast::Broadcaster;
use super::conflict::select_canonical;
use super::detector::{ChangeDetector, Detection};
use super::store::{CheckpointStore, StoreError};
use super::types::{Checkpoint, CycleReport, PollStatus, Snapshot, Source, SourceReport};
use crate::error::FatalError;
use crate::gateway::{FetchError, SourceGateway};

/// Cycle-level failure; the scheduler logs it and waits for the next tick
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Failed to read checkpoints: {0}")]
    Selection(#[source] StoreError),

    #[error("Cycle exceeded its deadline of {0:?}")]
    TimedOut(Duration),

    #[error("Cycle cancelled")]
    Cancelled,
}

/// Await `fut`, turning an elapsed deadline into `on_timeout()`
pub(crate) async fn bounded<T, E, F>(
    deadline: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// Outcome of the interruptible half of a cycle
struct Selection {
    polls: Vec<SourceReport<PollStatus>>,
    canonical: Option<Checkpoint>,
}

/// Drives synchronization cycles over a fixed set of sources
pub struct SyncEngine {
    gateway: Arc<dyn SourceGateway>,
    store: Arc<dyn CheckpointStore>,
    sources: Vec<Source>,
    call_timeout: Duration,
}

impl SyncEngine {
    pub fn new(
        gateway: Arc<dyn SourceGateway>,
        store: Arc<dyn CheckpointStore>,
        sources: Vec<Source>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            sources,
            call_timeout,
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Prepare for the first cycle
    ///
    /// Optionally resets the checkpoint store, then checks that the store
    /// answers and that at least one source can be fetched.
    pub async fn initialize(&self, reset: bool) -> Result<(), FatalError> {
        if reset {
            self.store_call(self.store.reset()).await?;
        } else {
            let existing = self.store_call(self.store.list_checkpoints()).await?;
            tracing::info!("Resuming with {} existing checkpoints", existing.len());
        }

        let probes = join_all(self.sources.iter().map(|source| self.fetch(source))).await;
        let reachable = probes.iter().filter(|p| p.is_ok()).count();

        for (source, probe) in self.sources.iter().zip(&probes) {
            if let Err(e) = probe {
                tracing::warn!(source_id = %source.id, error = %e, "Source unreachable at startup");
            }
        }

        if reachable == 0 {
            return Err(FatalError::GatewayUnreachable {
                attempted: self.sources.len(),
            });
        }

        tracing::info!(
            "Initialized sync engine: {}/{} sources reachable",
            reachable,
            self.sources.len()
        );
        Ok(())
    }

    /// Run one cycle stamped with the current time
    ///
    /// `deadline` and `cancel` abandon polling and selection; a broadcast
    /// already under way is finished first.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<CycleReport, CycleError> {
        self.run_cycle_guarded(Utc::now().trunc_subsecs(6), cancel, Some(deadline))
            .await
    }

    /// Run one uninterruptible cycle; every checkpoint it writes carries `timestamp`
    pub async fn run_cycle_at(&self, timestamp: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        self.run_cycle_guarded(timestamp, &CancellationToken::new(), None)
            .await
    }

    async fn run_cycle_guarded(
        &self,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_cycle", %cycle_id);

        async move {
            let started_at = Utc::now();

            let selection = async {
                match deadline {
                    Some(deadline) => {
                        bounded(deadline, self.poll_and_select(timestamp), || {
                            CycleError::TimedOut(deadline)
                        })
                        .await
                    }
                    None => self.poll_and_select(timestamp).await,
                }
            };

            let Selection { polls, canonical } = tokio::select! {
                _ = cancel.cancelled() => return Err(CycleError::Cancelled),
                selection = selection => selection?,
            };

            let broadcasts = match &canonical {
                Some(canonical) => {
                    tracing::debug!(
                        canonical = %canonical.source_id,
                        fingerprint = %canonical.fingerprint,
                        "Selected canonical snapshot"
                    );
                    Broadcaster::new(self.gateway.as_ref(), self.call_timeout)
                        .broadcast(canonical, &self.sources)
                        .await
                }
                None => {
                    tracing::info!("No checkpoint recorded yet, skipping broadcast");
                    Vec::new()
                }
            };

            let report = CycleReport {
                cycle_id,
                started_at,
                finished_at: Utc::now(),
                polls,
                canonical_source: canonical.map(|c| c.source_id),
                broadcasts,
            };

            tracing::info!(
                persisted = report.persisted_count(),
                canonical = report.canonical_source.as_deref().unwrap_or("-"),
                "Sync cycle complete"
            );
            Ok::<_, CycleError>(report)
        }
        .instrument(span)
        .await
    }

    /// Poll every source, then pick the canonical checkpoint
    async fn poll_and_select(&self, timestamp: DateTime<Utc>) -> Result<Selection, CycleError> {
        // Canonical as broadcast by the previous cycle
        let previous = match self.store_call(self.store.read_latest_checkpoint()).await {
            Ok(checkpoint) => Some(checkpoint),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(CycleError::Selection(e)),
        };

        // Fan out one poll per source; join_all is the fan-in barrier
        let polls = join_all(
            self.sources
                .iter()
                .map(|source| self.poll_source(source, timestamp, previous.as_ref())),
        )
        .await;

        let checkpoints = self
            .store_call(self.store.list_checkpoints())
            .await
            .map_err(CycleError::Selection)?;

        Ok(Selection {
            polls,
            canonical: select_canonical(&checkpoints).cloned(),
        })
    }

    async fn fetch(&self, source: &Source) -> Result<Snapshot, FetchError> {
        let timeout = self.call_timeout;
        bounded(timeout, self.gateway.fetch(source), || FetchError::Timeout(timeout)).await
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let timeout = self.call_timeout;
        bounded(timeout, call, || StoreError::Timeout(timeout)).await
    }

    /// Fetch, detect and persist for one source; errors stop here
    async fn poll_source(
        &self,
        source: &Source,
        timestamp: DateTime<Utc>,
        previous: Option<&Checkpoint>,
    ) -> SourceReport<PollStatus> {
        let snapshot = match self.fetch(source).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(source_id = %source.id, error = %e, "Failed to fetch source");
                return SourceReport::failed(&source.id, PollStatus::FetchFailed, e);
            }
        };

        let detector = ChangeDetector::new(self.store.as_ref());
        let detection = match self.store_call(detector.detect(&source.id, &snapshot)).await {
            Ok(detection) => detection,
            Err(e) => {
                tracing::error!(source_id = %source.id, error = %e, "Failed to read checkpoint");
                return SourceReport::failed(&source.id, PollStatus::CheckpointFailed, e);
            }
        };

        let adopted = previous.filter(|c| c.fingerprint == detection.fingerprint());
        let (status, timestamp) = match (detection, adopted) {
            (Detection::Unchanged { .. }, _) => {
                tracing::trace!(source_id = %source.id, "No change");
                return SourceReport::ok(&source.id, PollStatus::Unchanged);
            }
            (_, Some(canonical)) => (PollStatus::Adopted, canonical.timestamp),
            (Detection::New { .. }, None) => (PollStatus::Baseline, timestamp),
            (Detection::Changed { .. }, None) => (PollStatus::Changed, timestamp),
        };

        let checkpoint = Checkpoint {
            source_id: source.id.clone(),
            snapshot,
            fingerprint: detection.fingerprint(),
            timestamp,
        };

        match self.store_call(self.store.write_checkpoint(&checkpoint)).await {
            Ok(()) => {
                tracing::info!(
                    source_id = %source.id,
                    fingerprint = %checkpoint.fingerprint,
                    status = ?status,
                    "Change detected, checkpoint written"
                );
                SourceReport::ok(&source.id, status)
            }
            Err(e) => {
                tracing::error!(
                    source_id = %source.id,
                    error = %e,
                    "Failed to write checkpoint, retrying next cycle"
                );
                SourceReport::failed(&source.id, PollStatus::CheckpointFailed, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayCall, MemoryGateway, RangeDescriptor};
    use crate::sync::{BroadcastStatus, Snapshot, SqliteCheckpointStore};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;

    fn grid(rows: serde_json::Value) -> Snapshot {
        serde_json::from_value(rows).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sources(ids: &[&str]) -> Vec<Source> {
        ids.iter()
            .map(|id| Source::new(*id, RangeDescriptor::parse("Sheet1!A1:D10").unwrap()))
            .collect()
    }

    struct Harness {
        gateway: MemoryGateway,
        store: Arc<SqliteCheckpointStore>,
        engine: SyncEngine,
    }

    async fn harness(initial: serde_json::Value) -> Harness {
        let gateway = MemoryGateway::with_sources(["a", "b", "c"], &grid(initial));
        let store = Arc::new(SqliteCheckpointStore::new(
            crate::db::create_memory_pool().await.unwrap(),
        ));
        let engine = SyncEngine::new(
            Arc::new(gateway.clone()),
            store.clone(),
            sources(&["a", "b", "c"]),
            Duration::from_secs(1),
        );
        Harness {
            gateway,
            store,
            engine,
        }
    }

    /// Store that fails writes for one source
    struct FailingWrites {
        inner: SqliteCheckpointStore,
        failing: String,
    }

    #[async_trait]
    impl CheckpointStore for FailingWrites {
        async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
            if checkpoint.source_id == self.failing {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            self.inner.write_checkpoint(checkpoint).await
        }

        async fn read_latest_checkpoint(&self) -> Result<Checkpoint, StoreError> {
            self.inner.read_latest_checkpoint().await
        }

        async fn read_checkpoint(&self, source_id: &str) -> Result<Checkpoint, StoreError> {
            self.inner.read_checkpoint(source_id).await
        }

        async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
            self.inner.list_checkpoints().await
        }

        async fn reset(&self) -> Result<(), StoreError> {
            self.inner.reset().await
        }
    }

    #[tokio::test]
    async fn test_scenario_single_source_change_converges() {
        let h = harness(json!([[1, 2], [3, 4]])).await;
        h.engine.initialize(true).await.unwrap();

        // Cycle 1: baseline for everyone, identical content everywhere
        let report = h.engine.run_cycle_at(at(0)).await.unwrap();
        assert_eq!(report.persisted_count(), 3);
        assert!(report.polls.iter().all(|p| p.status == PollStatus::Baseline));
        assert_eq!(report.canonical_source.as_deref(), Some("a"));
        for id in ["a", "b", "c"] {
            assert_eq!(h.gateway.contents(id).unwrap(), grid(json!([[1, 2], [3, 4]])));
        }

        // Cycle 2: B is edited
        let edited = grid(json!([[1, 2], [9, 4]]));
        h.gateway.set_contents("b", edited.clone());
        let report = h.engine.run_cycle_at(at(1)).await.unwrap();

        assert_eq!(report.poll_status("a"), Some(PollStatus::Unchanged));
        assert_eq!(report.poll_status("b"), Some(PollStatus::Changed));
        assert_eq!(report.poll_status("c"), Some(PollStatus::Unchanged));
        assert_eq!(report.canonical_source.as_deref(), Some("b"));

        let latest = h.store.read_latest_checkpoint().await.unwrap();
        assert_eq!(latest.source_id, "b");
        assert_eq!(latest.timestamp, at(1));

        for source in h.engine.sources() {
            assert_eq!(report.broadcast_status(&source.id), Some(BroadcastStatus::Written));
            assert_eq!(h.gateway.fetch(source).await.unwrap(), edited);
        }
    }

    #[tokio::test]
    async fn test_unchanged_cycle_is_idempotent() {
        let h = harness(json!([[1, 2], [3, 4]])).await;
        h.engine.run_cycle_at(at(0)).await.unwrap();
        let before = h.store.list_checkpoints().await.unwrap();

        let report = h.engine.run_cycle_at(at(1)).await.unwrap();
        let after = h.store.list_checkpoints().await.unwrap();

        assert_eq!(report.persisted_count(), 0);
        assert_eq!(before, after);
        assert_eq!(report.canonical_source.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_same_cycle_changes_tie_break_on_source_id() {
        for _ in 0..3 {
            let h = harness(json!([["base"]])).await;
            h.engine.run_cycle_at(at(0)).await.unwrap();

            h.gateway.set_contents("b", grid(json!([["from b"]])));
            h.gateway.set_contents("a", grid(json!([["from a"]])));
            let report = h.engine.run_cycle_at(at(1)).await.unwrap();

            assert_eq!(report.poll_status("a"), Some(PollStatus::Changed));
            assert_eq!(report.poll_status("b"), Some(PollStatus::Changed));
            assert_eq!(report.canonical_source.as_deref(), Some("a"));
            for id in ["a", "b", "c"] {
                assert_eq!(h.gateway.contents(id).unwrap(), grid(json!([["from a"]])));
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let h = harness(json!([[0]])).await;
        h.engine.run_cycle_at(at(0)).await.unwrap();

        h.gateway.fail_fetch("c", true);
        h.gateway.set_contents("b", grid(json!([[7]])));
        let report = h.engine.run_cycle_at(at(1)).await.unwrap();

        assert_eq!(report.poll_status("c"), Some(PollStatus::FetchFailed));
        assert_eq!(report.poll_status("b"), Some(PollStatus::Changed));
        assert_eq!(report.canonical_source.as_deref(), Some("b"));
        // C cannot be read but can still be written
        assert_eq!(h.gateway.contents("c").unwrap(), grid(json!([[7]])));
    }

    #[tokio::test]
    async fn test_first_cycle_with_no_reachable_source_skips_broadcast() {
        let h = harness(json!([[0]])).await;
        for id in ["a", "b", "c"] {
            h.gateway.fail_fetch(id, true);
        }

        let report = h.engine.run_cycle_at(at(0)).await.unwrap();

        assert!(report.canonical_source.is_none());
        assert!(report.broadcasts.is_empty());
        assert!(!h
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::Clear(_) | GatewayCall::Write(_))));
    }

    #[tokio::test]
    async fn test_checkpoint_write_failure_is_retried_next_cycle() {
        let gateway = MemoryGateway::with_sources(["a", "b", "c"], &grid(json!([[0]])));
        let inner = SqliteCheckpointStore::new(crate::db::create_memory_pool().await.unwrap());
        let engine = SyncEngine::new(
            Arc::new(gateway.clone()),
            Arc::new(FailingWrites {
                inner: inner.clone(),
                failing: "b".to_string(),
            }),
            sources(&["a", "b", "c"]),
            Duration::from_secs(1),
        );

        let report = engine.run_cycle_at(at(0)).await.unwrap();
        assert_eq!(report.poll_status("b"), Some(PollStatus::CheckpointFailed));
        assert_eq!(report.poll_status("a"), Some(PollStatus::Baseline));
        assert!(inner.read_checkpoint("b").await.unwrap_err().is_not_found());

        // A healthy store picks B up again on the next cycle
        let engine = SyncEngine::new(
            Arc::new(gateway.clone()),
            Arc::new(inner.clone()),
            sources(&["a", "b", "c"]),
            Duration::from_secs(1),
        );
        let report = engine.run_cycle_at(at(1)).await.unwrap();
        assert_eq!(report.poll_status("b"), Some(PollStatus::Adopted));
        assert_eq!(report.poll_status("a"), Some(PollStatus::Unchanged));
        assert_eq!(inner.read_checkpoint("b").await.unwrap().timestamp, at(0));
    }

    #[tokio::test]
    async fn test_broadcast_failure_does_not_fail_cycle() {
        let h = harness(json!([[0]])).await;
        h.engine.run_cycle_at(at(0)).await.unwrap();

        h.gateway.set_contents("a", grid(json!([[5]])));
        h.gateway.fail_write("b", true);
        let report = h.engine.run_cycle_at(at(1)).await.unwrap();

        assert_eq!(report.broadcast_status("b"), Some(BroadcastStatus::ClearFailed));
        assert_eq!(report.broadcast_status("c"), Some(BroadcastStatus::Written));

        // B recovers and converges on the next cycle without a new edit
        h.gateway.fail_write("b", false);
        let report = h.engine.run_cycle_at(at(2)).await.unwrap();
        assert_eq!(report.poll_status("b"), Some(PollStatus::Unchanged));
        assert_eq!(report.poll_status("c"), Some(PollStatus::Adopted));
        assert_eq!(report.canonical_source.as_deref(), Some("a"));
        assert_eq!(h.gateway.contents("b").unwrap(), grid(json!([[5]])));
    }

    #[tokio::test]
    async fn test_broadcast_receipt_is_adopted_not_authored() {
        let h = harness(json!([[1, 2], [3, 4]])).await;
        h.engine.run_cycle_at(at(0)).await.unwrap();
        h.gateway.set_contents("b", grid(json!([[1, 2], [9, 4]])));
        h.engine.run_cycle_at(at(1)).await.unwrap();

        // A and C now hold B's content; recording it keeps B's timestamp
        let report = h.engine.run_cycle_at(at(2)).await.unwrap();
        assert_eq!(report.poll_status("a"), Some(PollStatus::Adopted));
        assert_eq!(report.poll_status("b"), Some(PollStatus::Unchanged));
        assert_eq!(report.poll_status("c"), Some(PollStatus::Adopted));
        for checkpoint in h.store.list_checkpoints().await.unwrap() {
            assert_eq!(checkpoint.timestamp, at(1));
            assert_eq!(checkpoint.snapshot, grid(json!([[1, 2], [9, 4]])));
        }

        // Settled: nothing left to record
        let report = h.engine.run_cycle_at(at(3)).await.unwrap();
        assert_eq!(report.persisted_count(), 0);
    }

    #[tokio::test]
    async fn test_edit_during_adoption_wins() {
        let h = harness(json!([["v1"]])).await;
        h.engine.run_cycle_at(at(0)).await.unwrap();
        h.gateway.set_contents("b", grid(json!([["v2"]])));
        h.engine.run_cycle_at(at(1)).await.unwrap();

        // C is edited while A is still recording the v2 broadcast
        h.gateway.set_contents("c", grid(json!([["v3"]])));
        let report = h.engine.run_cycle_at(at(2)).await.unwrap();

        assert_eq!(report.poll_status("a"), Some(PollStatus::Adopted));
        assert_eq!(report.poll_status("c"), Some(PollStatus::Changed));
        assert_eq!(report.canonical_source.as_deref(), Some("c"));
        for id in ["a", "b", "c"] {
            assert_eq!(h.gateway.contents(id).unwrap(), grid(json!([["v3"]])));
        }
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let h = harness(json!([[0]])).await;
        h.gateway.set_fetch_delay(Some(Duration::from_millis(200)));
        let engine = SyncEngine::new(
            Arc::new(h.gateway.clone()),
            h.store.clone(),
            sources(&["a"]),
            Duration::from_millis(20),
        );

        let report = engine.run_cycle_at(at(0)).await.unwrap();
        assert_eq!(report.poll_status("a"), Some(PollStatus::FetchFailed));
        assert!(report.polls[0].error.as_deref().unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_canonical_too_large_for_one_source_never_empties_replicas() {
        let gateway = MemoryGateway::with_sources(["a", "b", "c"], &grid(json!([[1]])));
        let narrow = RangeDescriptor::parse("Sheet1!A1:A1").unwrap();
        let wide = RangeDescriptor::parse("Sheet1!A1:D10").unwrap();
        let store = Arc::new(SqliteCheckpointStore::new(
            crate::db::create_memory_pool().await.unwrap(),
        ));
        let engine = SyncEngine::new(
            Arc::new(gateway.clone()),
            store,
            vec![
                Source::new("a", narrow),
                Source::new("b", wide.clone()),
                Source::new("c", wide),
            ],
            Duration::from_secs(1),
        );
        engine.run_cycle_at(at(0)).await.unwrap();
        let baseline_calls = gateway.calls().len();

        // B grows wider than A's range
        gateway.set_contents("b", grid(json!([[1, 2]])));
        let report = engine.run_cycle_at(at(1)).await.unwrap();
        assert_eq!(report.broadcast_status("a"), Some(BroadcastStatus::WriteFailed));
        assert_eq!(report.broadcast_status("c"), Some(BroadcastStatus::Written));
        assert!(!gateway.calls()[baseline_calls..].contains(&GatewayCall::Clear("a".into())));

        let report = engine.run_cycle_at(at(2)).await.unwrap();
        assert_eq!(report.poll_status("a"), Some(PollStatus::Unchanged));
        assert_eq!(report.canonical_source.as_deref(), Some("b"));

        assert_eq!(gateway.contents("a").unwrap(), grid(json!([[1]])));
        for id in ["b", "c"] {
            assert_eq!(gateway.contents(id).unwrap(), grid(json!([[1, 2]])));
        }
    }

    /// Wait until the gateway has seen at least one clear
    async fn until_first_clear(gateway: &MemoryGateway) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !gateway
                .calls()
                .iter()
                .any(|c| matches!(c, GatewayCall::Clear(_)))
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_broadcast_finishes_writes() {
        let h = harness(json!([["keep"]])).await;
        h.gateway.set_write_delay(Some(Duration::from_millis(100)));
        let engine = Arc::new(h.engine);
        let cancel = CancellationToken::new();

        let cycle = {
            let (engine, cancel) = (Arc::clone(&engine), cancel.clone());
            tokio::spawn(async move { engine.run_cycle(&cancel, Duration::from_secs(10)).await })
        };
        until_first_clear(&h.gateway).await;
        cancel.cancel();

        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.canonical_source.as_deref(), Some("a"));
        for id in ["a", "b", "c"] {
            assert_eq!(report.broadcast_status(id), Some(BroadcastStatus::Written));
            assert_eq!(h.gateway.contents(id).unwrap(), grid(json!([["keep"]])));
        }
    }

    #[tokio::test]
    async fn test_cycle_deadline_does_not_cut_broadcast() {
        let h = harness(json!([["keep"]])).await;
        h.gateway.set_write_delay(Some(Duration::from_millis(400)));

        let report = h
            .engine
            .run_cycle(&CancellationToken::new(), Duration::from_millis(200))
            .await
            .unwrap();

        for id in ["a", "b", "c"] {
            assert_eq!(report.broadcast_status(id), Some(BroadcastStatus::Written));
            assert_eq!(h.gateway.contents(id).unwrap(), grid(json!([["keep"]])));
        }
    }

    #[tokio::test]
    async fn test_cancel_before_selection_skips_broadcast() {
        let h = harness(json!([[0]])).await;
        h.gateway.set_fetch_delay(Some(Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h.engine.run_cycle(&cancel, Duration::from_secs(60)).await;

        assert!(matches!(result, Err(CycleError::Cancelled)));
        assert!(!h
            .gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::Clear(_) | GatewayCall::Write(_))));
    }

    /// Store whose checkpoint writes hang
    struct StalledWrites {
        inner: SqliteCheckpointStore,
    }

    #[async_trait]
    impl CheckpointStore for StalledWrites {
        async fn write_checkpoint(&self, _checkpoint: &Checkpoint) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        async fn read_latest_checkpoint(&self) -> Result<Checkpoint, StoreError> {
            self.inner.read_latest_checkpoint().await
        }

        async fn read_checkpoint(&self, source_id: &str) -> Result<Checkpoint, StoreError> {
            self.inner.read_checkpoint(source_id).await
        }

        async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
            self.inner.list_checkpoints().await
        }

        async fn reset(&self) -> Result<(), StoreError> {
            self.inner.reset().await
        }
    }

    #[tokio::test]
    async fn test_store_calls_are_bounded_by_call_timeout() {
        let gateway = MemoryGateway::with_sources(["a"], &grid(json!([[1]])));
        let engine = SyncEngine::new(
            Arc::new(gateway),
            Arc::new(StalledWrites {
                inner: SqliteCheckpointStore::new(crate::db::create_memory_pool().await.unwrap()),
            }),
            sources(&["a"]),
            Duration::from_millis(50),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), engine.run_cycle_at(at(0)))
            .await
            .expect("stalled store write was not bounded")
            .unwrap();

        assert_eq!(report.poll_status("a"), Some(PollStatus::CheckpointFailed));
        assert!(report.polls[0].error.as_deref().unwrap().contains("timed out"));
        assert!(report.canonical_source.is_none());
    }

    #[tokio::test]
    async fn test_initialize() {
        let h = harness(json!([[1]])).await;
        h.store
            .write_checkpoint(&Checkpoint::new("zz", grid(json!([[9]])), at(0)))
            .await
            .unwrap();

        h.engine.initialize(false).await.unwrap();
        assert_eq!(h.store.list_checkpoints().await.unwrap().len(), 1);

        h.engine.initialize(true).await.unwrap();
        assert!(h.store.list_checkpoints().await.unwrap().is_empty());

        for id in ["a", "b", "c"] {
            h.gateway.fail_fetch(id, true);
        }
        assert!(matches!(
            h.engine.initialize(true).await,
            Err(FatalError::GatewayUnreachable { attempted: 3 })
        ));
    }
}
