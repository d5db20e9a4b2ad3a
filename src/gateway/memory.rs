//! In-memory gateway
//!
//! Holds one grid per source id. Used by tests and by `GATEWAY=memory`
//! dry runs. Failures and latency can be injected per source.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{FetchError, SourceGateway, WriteError};
use crate::sync::{Snapshot, Source};

/// A call received by the gateway, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Fetch(String),
    Clear(String),
    Write(String),
}

/// Gateway backed by in-process grids
#[derive(Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<MemoryGatewayInner>>,
}

#[derive(Default)]
struct MemoryGatewayInner {
    grids: HashMap<String, Snapshot>,
    failing_fetch: HashSet<String>,
    failing_write: HashSet<String>,
    fetch_delay: Option<Duration>,
    write_delay: Option<Duration>,
    calls: Vec<GatewayCall>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a gateway where every listed source holds the same grid
    pub fn with_sources<'a>(ids: impl IntoIterator<Item = &'a str>, initial: &Snapshot) -> Self {
        let gateway = Self::new();
        for id in ids {
            gateway.set_contents(id, initial.clone());
        }
        gateway
    }

    /// Replace a source's grid directly, as an external editor would
    pub fn set_contents(&self, source_id: &str, snapshot: Snapshot) {
        self.inner.lock().grids.insert(source_id.to_string(), snapshot);
    }

    pub fn contents(&self, source_id: &str) -> Option<Snapshot> {
        self.inner.lock().grids.get(source_id).cloned()
    }

    /// Make fetches of this source fail (or succeed again)
    pub fn fail_fetch(&self, source_id: &str, failing: bool) {
        let mut inner = self.inner.lock();
        if failing {
            inner.failing_fetch.insert(source_id.to_string());
        } else {
            inner.failing_fetch.remove(source_id);
        }
    }

    /// Make clears and writes of this source fail (or succeed again)
    pub fn fail_write(&self, source_id: &str, failing: bool) {
        let mut inner = self.inner.lock();
        if failing {
            inner.failing_write.insert(source_id.to_string());
        } else {
            inner.failing_write.remove(source_id);
        }
    }

    /// Delay every fetch, simulating a slow replica API
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.inner.lock().fetch_delay = delay;
    }

    /// Delay every write, leaving a window after the preceding clear
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.inner.lock().write_delay = delay;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.lock().calls.clone()
    }

    /// Prepare a write or clear: record the call, then check the source
    fn begin_write(&self, call: GatewayCall, source: &Source) -> Result<(), WriteError> {
        let mut inner = self.inner.lock();
        inner.calls.push(call);
        if inner.failing_write.contains(&source.id) {
            return Err(WriteError::Transport(format!(
                "injected write failure for {}",
                source.id
            )));
        }
        if !inner.grids.contains_key(&source.id) {
            return Err(WriteError::UnknownSource(source.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceGateway for MemoryGateway {
    async fn fetch(&self, source: &Source) -> Result<Snapshot, FetchError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.calls.push(GatewayCall::Fetch(source.id.clone()));
            inner.fetch_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock();
        if inner.failing_fetch.contains(&source.id) {
            return Err(FetchError::Transport(format!(
                "injected fetch failure for {}",
                source.id
            )));
        }
        inner
            .grids
            .get(&source.id)
            .cloned()
            .ok_or_else(|| FetchError::UnknownSource(source.id.clone()))
    }

    async fn clear(&self, source: &Source) -> Result<(), WriteError> {
        self.begin_write(GatewayCall::Clear(source.id.clone()), source)?;
        self.inner
            .lock()
            .grids
            .insert(source.id.clone(), Snapshot::empty());
        Ok(())
    }

    async fn write(&self, source: &Source, snapshot: &Snapshot) -> Result<(), WriteError> {
        let delay = self.inner.lock().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.begin_write(GatewayCall::Write(source.id.clone()), source)?;

        let (rows, columns) = (snapshot.row_count(), snapshot.column_count());
        if !source.range.fits(rows, columns) {
            return Err(WriteError::OutOfRange {
                rows,
                columns,
                range: source.range.to_string(),
            });
        }

        self.inner
            .lock()
            .grids
            .insert(source.id.clone(), snapshot.clone());
        Ok(())
    }
}
