//! Google Sheets gateway
//!
//! Talks to the Sheets REST API v4 `spreadsheets.values` endpoints.
//! The source id is the spreadsheet id; the range is passed through in
//! A1 notation. Authentication is a bearer token obtained elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FetchError, SourceGateway, WriteError};
use crate::config::SheetsConfig;
use crate::sync::{Snapshot, Source};

/// Gateway for Google Sheets spreadsheets
#[derive(Clone)]
pub struct SheetsGateway {
    client: Client,
    api_base: String,
    access_token: String,
    request_timeout: Duration,
}

/// `ValueRange` resource, the body of get and update
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    major_dimension: Option<String>,
    /// Absent when the range is empty
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Error envelope returned by Google APIs
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

/// Failure shared by reads and writes, before mapping to the phase's error
enum CallError {
    Transport(String),
    Timeout,
    Auth(String),
    NotFound,
    Api { status: u16, message: String },
}

impl SheetsGateway {
    /// Create a gateway from configuration
    pub fn new(config: &SheetsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("sheets-sync-server/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            request_timeout: config.request_timeout,
        })
    }

    /// `{base}/spreadsheets/{id}/values/{range}{suffix}`
    fn values_url(&self, source: &Source, suffix: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}{}",
            self.api_base,
            urlencoding::encode(&source.id),
            urlencoding::encode(source.range.as_str()),
            suffix
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, CallError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout
                } else {
                    CallError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or(body);

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CallError::Auth(message),
            StatusCode::NOT_FOUND => CallError::NotFound,
            _ => CallError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

impl CallError {
    fn into_fetch_error(self, source: &Source, timeout: Duration) -> FetchError {
        match self {
            CallError::Transport(e) => FetchError::Transport(e),
            CallError::Timeout => FetchError::Timeout(timeout),
            CallError::Auth(e) => FetchError::Auth(e),
            CallError::NotFound => FetchError::UnknownSource(source.id.clone()),
            CallError::Api { status, message } => FetchError::Api { status, message },
        }
    }

    fn into_write_error(self, source: &Source, timeout: Duration) -> WriteError {
        match self {
            CallError::Transport(e) => WriteError::Transport(e),
            CallError::Timeout => WriteError::Timeout(timeout),
            CallError::Auth(e) => WriteError::Auth(e),
            CallError::NotFound => WriteError::UnknownSource(source.id.clone()),
            CallError::Api { status, message } => WriteError::Api { status, message },
        }
    }
}

#[async_trait]
impl SourceGateway for SheetsGateway {
    async fn fetch(&self, source: &Source) -> Result<Snapshot, FetchError> {
        let request = self
            .client
            .get(self.values_url(source, ""))
            .query(&[("majorDimension", "ROWS")]);

        let response = self
            .send(request)
            .await
            .map_err(|e| e.into_fetch_error(source, self.request_timeout))?;

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(Snapshot::new(body.values))
    }

    async fn clear(&self, source: &Source) -> Result<(), WriteError> {
        let request = self
            .client
            .post(self.values_url(source, ":clear"))
            .json(&serde_json::json!({}));

        self.send(request)
            .await
            .map_err(|e| e.into_write_error(source, self.request_timeout))?;

        tracing::debug!(source_id = %source.id, range = %source.range, "Cleared range");
        Ok(())
    }

    async fn write(&self, source: &Source, snapshot: &Snapshot) -> Result<(), WriteError> {
        let body = ValueRange {
            range: Some(source.range.to_string()),
            major_dimension: Some("ROWS".to_string()),
            values: snapshot.rows().to_vec(),
        };

        let request = self
            .client
            .put(self.values_url(source, ""))
            .query(&[("valueInputOption", "RAW")])
            .json(&body);

        self.send(request)
            .await
            .map_err(|e| e.into_write_error(source, self.request_timeout))?;

        tracing::debug!(
            source_id = %source.id,
            rows = snapshot.row_count(),
            "Wrote snapshot to range"
        );
        Ok(())
    }
}
