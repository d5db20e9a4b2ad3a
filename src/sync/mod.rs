//! Sync module for replica synchronization
//!
//! Provides:
//! - Snapshot fingerprinting and change detection
//! - Checkpoint persistence
//! - Canonical selection and broadcast
//! - Fixed-interval, single-flight scheduling
//!
//! # Sync Cycle
//!
//! 1. Every source is fetched concurrently
//! 2. A source whose fingerprint differs from its checkpoint gets a new
//!    checkpoint stamped with the cycle time
//! 3. All polls are awaited before selection
//! 4. The checkpoint with the newest timestamp is canonical
//! 5. The canonical snapshot is written to every source, clear before write
//!
//! # Conflict Resolution
//!
//! - Newest timestamp wins
//! - Equal timestamps: lexicographically smallest source id wins
//! - A source that merely received the last broadcast keeps the broadcast's
//!   timestamp, so echoes never outrank edits

mod broadcast;
mod conflict;
mod detector;
mod engine;
mod fingerprint;
mod scheduler;
mod store;
mod types;

pub use broadcast::Broadcaster;
pub use conflict::select_canonical;
pub use detector::{ChangeDetector, Detection};
pub use engine::{CycleError, SyncEngine};
pub use fingerprint::{Fingerprint, InvalidFingerprint};
pub use scheduler::{Scheduler, SchedulerStatus, StatusSnapshot};
pub use store::{CheckpointStore, SqliteCheckpointStore, StoreError};
pub use types::{
    BroadcastStatus, Checkpoint, CheckpointSummary, CycleReport, PollStatus, Snapshot, Source,
    SourceReport,
};
