//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::sync::{CheckpointStore, SchedulerStatus};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Arc<dyn CheckpointStore>,
    scheduler: SchedulerStatus,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn CheckpointStore>, scheduler: SchedulerStatus) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                scheduler,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the checkpoint store
    pub fn store(&self) -> &dyn CheckpointStore {
        self.inner.store.as_ref()
    }

    /// Get the scheduler's progress view
    pub fn scheduler(&self) -> &SchedulerStatus {
        &self.inner.scheduler
    }
}
