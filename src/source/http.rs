//! HTTP helper for map-server requests
//!
//! Provides a thin JSON GET on top of `reqwest` that classifies failures into
//! [`SourceError`] variants:
//! - Connection failures and timeouts map to transient errors
//! - 429 and 5xx statuses map to transient errors
//! - Other 4xx statuses are rejected without retry
//! - A `200 OK` whose body is not JSON (a proxy's HTML page) is a
//!   transient [`SourceError::MalformedBody`]
//! - ArcGIS services report many failures as `200 OK` with an `error` object
//!   in the body; those are surfaced as [`SourceError::ServiceError`]
//!
//! No retrying happens here. The extraction loop retries the whole streaming
//! phase, so a failed page simply ends the current stream.

use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{SourceError, SourceResult};

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum length of a response body echoed into an error message
const MAX_ERROR_BODY_CHARS: usize = 512;

/// JSON-over-HTTP client for map-server endpoints
#[derive(Debug, Clone)]
pub struct MapServerHttpClient {
    client: Client,
}

impl MapServerHttpClient {
    /// Create a client with the default connect timeout
    pub fn new() -> SourceResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("layer-dumper/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::NetworkError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Execute a GET request and decode the body as JSON
    ///
    /// `timeout` bounds the whole request, body included.
    pub async fn get_json(
        &self,
        url: &Url,
        params: &[(String, String)],
        timeout: Option<Duration>,
    ) -> SourceResult<Value> {
        debug!(url = %url, params = params.len(), "GET");

        let mut request = self.client.get(url.clone()).query(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();

        if status.as_u16() == 429 {
            warn!(url = %url, "Rate limited by map server (429)");
            return Err(SourceError::RateLimited);
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::ServerError {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                message: truncate(&body),
            });
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            SourceError::MalformedBody(format!(
                "Failed to decode JSON ({e}): {}",
                truncate(&String::from_utf8_lossy(&body))
            ))
        })?;

        check_service_error(&value)?;
        Ok(value)
    }
}

/// Surface an ArcGIS `{"error": {"code": .., "message": ..}}` body as an error
pub fn check_service_error(value: &Value) -> SourceResult<()> {
    let Some(error) = value.get("error") else {
        return Ok(());
    };

    let code = error.get("code").and_then(Value::as_i64).unwrap_or(500);
    let mut message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    if let Some(details) = error.get("details").and_then(Value::as_array) {
        let details: Vec<&str> = details.iter().filter_map(Value::as_str).collect();
        if !details.is_empty() {
            message = format!("{message} ({})", details.join("; "));
        }
    }

    Err(SourceError::ServiceError { code, message })
}

fn map_reqwest_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(e.to_string())
    } else if e.is_decode() {
        SourceError::MalformedBody(e.to_string())
    } else {
        SourceError::NetworkError(e.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    cut.push('…');
    cut
}
