//! Source gateways
//!
//! A gateway reads and overwrites the configured range of a replica.
//! The engine only talks to replicas through [`SourceGateway`].
//!
//! # Implementations
//!
//! - [`SheetsGateway`]: Google Sheets REST API (values get/clear/update)
//! - [`MemoryGateway`]: in-process grids, for tests and dry runs

mod memory;
mod range;
mod sheets;

pub use memory::{GatewayCall, MemoryGateway};
pub use range::{RangeDescriptor, RangeError};
pub use sheets::SheetsGateway;

use async_trait::async_trait;
use thiserror::Error;

use crate::sync::{Snapshot, Source};

/// Access to the replicas being kept in sync
///
/// Implementations must allow concurrent calls for distinct sources.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    /// Read the full content of the source's range
    async fn fetch(&self, source: &Source) -> Result<Snapshot, FetchError>;

    /// Clear every cell of the source's range
    async fn clear(&self, source: &Source) -> Result<(), WriteError>;

    /// Replace the content of the source's range
    async fn write(&self, source: &Source, snapshot: &Snapshot) -> Result<(), WriteError>;
}

/// Reading a source failed
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Clearing or writing a source failed
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Snapshot of {rows}x{columns} does not fit range {range}")]
    OutOfRange {
        rows: usize,
        columns: usize,
        range: String,
    },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}
