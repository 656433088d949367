//! Remote feature sources
//!
//! A [`FeatureSource`] wraps a paginated remote service. Given a starting
//! offset and a page size it produces a lazy, ordered stream of
//! [`FeatureRecord`]s together with a best-effort total count.
//!
//! # Ordering assumption
//!
//! Resuming by offset assumes the remote service returns features in the same
//! order every time it is queried. This is not verified: if the order can
//! shift between requests, a resumed dump may skip or duplicate features.
//! Adapters should request an explicit ordering where the service allows it,
//! but the dumper does not attempt to detect reordering.

use crate::FeatureRecord;
use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

pub mod arcgis;
pub mod http;
pub mod pagination;

/// Service error codes that no amount of retrying will fix
const FATAL_SERVICE_CODES: [i64; 5] = [401, 403, 404, 498, 499];

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection failure, reset, DNS error or similar
    #[error("network error: {0}")]
    NetworkError(String),

    /// Request exceeded the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Service asked us to slow down (HTTP 429)
    #[error("rate limit exceeded")]
    RateLimited,

    /// Server-side failure (HTTP 5xx)
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Error object returned inside an otherwise successful response
    #[error("service error {code}: {message}")]
    ServiceError {
        /// Service error code
        code: i64,
        /// Service error message
        message: String,
    },

    /// Request rejected by the service (HTTP 4xx other than 429)
    #[error("request rejected with {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body was not the JSON document a map server sends
    ///
    /// Gateways and proxies in front of the service answer with HTML error
    /// pages or truncated bodies while it is overloaded or restarting.
    #[error("malformed response body: {0}")]
    MalformedBody(String),

    /// Response could not be interpreted, or paging went wrong locally
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Endpoint URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl SourceError {
    /// Whether retrying the same request later can reasonably succeed
    ///
    /// Everything the remote side produces is transient except HTTP 4xx
    /// rejections and service errors that name a missing layer or a refused
    /// token (401, 403, 404, 498, 499). ArcGIS reports overload and query
    /// timeouts as `{"error": {"code": 400, "message": "Failed to execute
    /// query."}}` inside a `200 OK`, so service code 400 is retried.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::NetworkError(_)
            | SourceError::Timeout(_)
            | SourceError::RateLimited
            | SourceError::ServerError { .. }
            | SourceError::MalformedBody(_) => true,
            SourceError::ServiceError { code, .. } => !FATAL_SERVICE_CODES.contains(code),
            SourceError::Rejected { .. }
            | SourceError::InvalidResponse(_)
            | SourceError::InvalidUrl(_) => false,
        }
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Stream of features from a source
pub type FeatureStream = Pin<Box<dyn Stream<Item = SourceResult<FeatureRecord>> + Send>>;

/// Parameters for opening a source at a given offset
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// First feature to produce, relative to the source's native ordering
    pub start_offset: u64,
    /// Number of features requested per page
    pub page_size: u64,
    /// Opaque query parameters passed through to the service
    pub extra_params: Vec<(String, String)>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl SourceRequest {
    /// Request starting at `start_offset` with the given page size
    pub fn new(start_offset: u64, page_size: u64) -> Self {
        Self {
            start_offset,
            page_size,
            extra_params: Vec::new(),
            timeout: None,
        }
    }
}

/// An opened source: the lazy feature stream and the estimated total
pub struct OpenedSource {
    /// Features in source order, starting at the requested offset
    pub features: FeatureStream,
    /// Total features in the layer, when the service reports it
    pub total: Option<u64>,
}

impl std::fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSource")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Paginated feature source
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Open the source at `request.start_offset`
    ///
    /// The returned stream is pull-based: each page is fetched only when the
    /// previous one has been consumed. Any page fetch may yield an error item,
    /// after which the stream ends.
    async fn open(&self, request: &SourceRequest) -> SourceResult<OpenedSource>;

    /// Fetch the layer metadata document (schema, feature count, ...)
    async fn metadata(&self) -> SourceResult<Value>;

    /// Human-readable location of the source, for logging
    fn describe(&self) -> String;
}
