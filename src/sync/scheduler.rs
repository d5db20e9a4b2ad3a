//! Cycle scheduling
//!
//! Fires a cycle on every tick of a fixed interval. Cycles are single-flight:
//! a tick that arrives while the previous cycle is still running is skipped
//! and logged, never queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::engine::{CycleError, SyncEngine};
use super::types::CycleReport;

/// Shared view of scheduler progress
#[derive(Clone, Default)]
pub struct SchedulerStatus {
    inner: Arc<RwLock<StatusInner>>,
}

#[derive(Default)]
struct StatusInner {
    last_report: Option<CycleReport>,
    last_error: Option<(DateTime<Utc>, String)>,
    cycles_completed: u64,
    cycles_failed: u64,
    ticks_skipped: u64,
}

/// Point-in-time copy of [`SchedulerStatus`]
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "lastReport")]
    pub last_report: Option<CycleReport>,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "lastErrorAt", skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(rename = "cyclesCompleted")]
    pub cycles_completed: u64,
    #[serde(rename = "cyclesFailed")]
    pub cycles_failed: u64,
    #[serde(rename = "ticksSkipped")]
    pub ticks_skipped: u64,
}

impl SchedulerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        StatusSnapshot {
            last_report: inner.last_report.clone(),
            last_error: inner.last_error.as_ref().map(|(_, e)| e.clone()),
            last_error_at: inner.last_error.as_ref().map(|(at, _)| *at),
            cycles_completed: inner.cycles_completed,
            cycles_failed: inner.cycles_failed,
            ticks_skipped: inner.ticks_skipped,
        }
    }

    async fn record_skip(&self) {
        self.inner.write().await.ticks_skipped += 1;
    }

    async fn record(&self, outcome: Result<CycleReport, CycleError>) {
        let mut inner = self.inner.write().await;
        match outcome {
            Ok(report) => {
                inner.cycles_completed += 1;
                inner.last_report = Some(report);
            }
            Err(e) => {
                inner.cycles_failed += 1;
                inner.last_error = Some((Utc::now(), e.to_string()));
            }
        }
    }
}

/// Fixed-interval driver for [`SyncEngine`]
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    cycle_timeout: Duration,
    status: SchedulerStatus,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration, cycle_timeout: Duration) -> Self {
        Self {
            engine,
            interval,
            cycle_timeout,
            status: SchedulerStatus::new(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.clone()
    }

    /// Run cycles until `cancel` fires
    ///
    /// Cancellation also stops the cycle in flight at its next safe point;
    /// this returns once that cycle has stopped.
    pub async fn run_forever(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<()>> = None;

        tracing::info!(
            "Scheduler started: {} sources every {:?}",
            self.engine.sources().len(),
            self.interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        tracing::warn!("Previous cycle still running, skipping tick");
                        self.status.record_skip().await;
                        continue;
                    }

                    if let Some(handle) = in_flight.take() {
                        if let Err(e) = handle.await {
                            tracing::error!("Sync cycle task panicked: {}", e);
                        }
                    }

                    in_flight = Some(self.spawn_cycle(cancel.child_token()));
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = handle.await {
                tracing::error!("Sync cycle task panicked: {}", e);
            }
        }

        tracing::info!("Scheduler stopped");
    }

    fn spawn_cycle(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let status = self.status.clone();
        let deadline = self.cycle_timeout;

        tokio::spawn(async move {
            let outcome = engine.run_cycle(&cancel, deadline).await;
            match &outcome {
                Ok(_) => {}
                Err(CycleError::Cancelled) => tracing::info!("Sync cycle cancelled"),
                Err(e) => tracing::warn!("Sync cycle abandoned, retrying next tick: {}", e),
            }
            status.record(outcome).await;
        })
    }
}
