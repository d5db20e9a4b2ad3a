//! Configuration management for Sheets Sync Server

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::{RangeDescriptor, RangeError};
use crate::sync::Source;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Fixed for the process lifetime
    pub sources: Vec<Source>,
    pub interval: Duration,
    /// Deadline for one whole cycle
    pub cycle_timeout: Duration,
    /// Deadline for each gateway call
    pub call_timeout: Duration,
    /// Clear all checkpoints before the first cycle
    pub reset_on_start: bool,
}

#[derive(Debug, Clone)]
pub enum GatewayConfig {
    Sheets(SheetsConfig),
    Memory,
}

#[derive(Clone)]
pub struct SheetsConfig {
    pub api_base: String,
    pub access_token: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for SheetsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsConfig")
            .field("api_base", &self.api_base)
            .field("access_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Configuration that cannot be used
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid range for source {source_id}: {error}")]
    Range { source_id: String, error: RangeError },

    #[error("Duplicate source id: {0}")]
    DuplicateSource(String),

    #[error("No sources configured")]
    NoSources,
}

pub const DEFAULT_RANGE: &str = "Sheet1!A1:D10";
pub const DEFAULT_SHEETS_API: &str = "https://sheets.googleapis.com/v4";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./sheets-sync.db";

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from any variable lookup
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match var(name) {
                None => Ok(Duration::from_millis(default)),
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
                    _ => Err(ConfigError::Invalid { name, value }),
                },
            }
        };

        let default_range = var("SYNC_DEFAULT_RANGE").unwrap_or_else(|| DEFAULT_RANGE.to_string());
        let sources = parse_sources(
            &var("SYNC_SOURCES").ok_or(ConfigError::Missing("SYNC_SOURCES"))?,
            &default_range,
        )?;

        let call_timeout = millis("SYNC_CALL_TIMEOUT_MS", 10_000)?;

        let reset_on_start = match var("SYNC_RESET_ON_START") {
            None => true,
            Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                name: "SYNC_RESET_ON_START",
                value,
            })?,
        };

        let gateway = match var("GATEWAY").as_deref().unwrap_or("sheets") {
            "sheets" => GatewayConfig::Sheets(SheetsConfig {
                api_base: var("SHEETS_API_BASE").unwrap_or_else(|| DEFAULT_SHEETS_API.to_string()),
                access_token: var("SHEETS_ACCESS_TOKEN")
                    .ok_or(ConfigError::Missing("SHEETS_ACCESS_TOKEN"))?,
                request_timeout: call_timeout,
            }),
            "memory" => GatewayConfig::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "GATEWAY",
                    value: other.to_string(),
                })
            }
        };

        let port = match var("SERVER_PORT") {
            None => 3000,
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { name: "SERVER_PORT", value })?,
        };

        Ok(Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            sync: SyncConfig {
                sources,
                interval: millis("SYNC_INTERVAL_MS", 1_000)?,
                cycle_timeout: millis("SYNC_CYCLE_TIMEOUT_MS", 30_000)?,
                call_timeout,
                reset_on_start,
            },
            gateway,
            database: DatabaseConfig {
                url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            },
        })
    }
}

/// Parse `id`, `id=Range` entries separated by commas
pub fn parse_sources(list: &str, default_range: &str) -> Result<Vec<Source>, ConfigError> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, range) = match entry.split_once('=') {
            Some((id, range)) => (id.trim(), range.trim()),
            None => (entry, default_range),
        };

        let range = RangeDescriptor::parse(range).map_err(|error| ConfigError::Range {
            source_id: id.to_string(),
            error,
        })?;

        if !seen.insert(id.to_string()) {
            return Err(ConfigError::DuplicateSource(id.to_string()));
        }
        sources.push(Source::new(id, range));
    }

    if sources.is_empty() {
        return Err(ConfigError::NoSources);
    }
    Ok(sources)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
