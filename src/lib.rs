//! Sheets Sync Server Library
//!
//! Keeps a fixed set of tabular replicas mirror-consistent. The main server
//! binary is in main.rs.
//!
//! # Modules
//!
//! - `sync`: Change detection, checkpointing, canonical selection, broadcast
//! - `gateway`: Replica access (Google Sheets REST, in-memory)
//! - `db`: SQLite pool and schema
//! - `routes`: Read-only HTTP status surface

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod state;
pub mod sync;
