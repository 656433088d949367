//! # Layer Dumper Library
//!
//! Bulk extraction of feature layers from ArcGIS REST map servers into
//! chunked GeoJSON-lines files, with clean resume after crashes, network
//! failures and rate limiting.
//!
//! ## Features
//!
//! - **Chunked output**: features are appended one JSON object per line to
//!   `{layer}_chunk_{j}.geojsonl` files bounded by a configured record count
//! - **Resume registry**: an append-only `{layer}_downloaded_registry.txt`
//!   ledger records every completed chunk; restarts continue from the last
//!   committed boundary
//! - **Crash cleanup**: chunk files that never made it into the registry are
//!   deleted before streaming resumes
//! - **Retry envelope**: transient source failures restart the streaming phase
//!   after an exponential backoff with jitter, indefinitely
//!
//! ## Quick Start
//!
//! ```no_run
//! use layer_dumper::catalog::LayerCatalog;
//! use layer_dumper::downloader::{DumpExecutor, DumpJob};
//! use layer_dumper::source::arcgis::ArcGisSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = LayerCatalog::load_embedded()?;
//! let url = catalog.layer_url("buildings", false)?;
//! let source = ArcGisSource::new(url, None)?;
//!
//! let mut job = DumpJob::new("buildings", "outputs/buildings").with_chunk_size(350);
//! let progress = DumpExecutor::new().execute(&mut job, &source).await?;
//! println!("{} features written", progress.features_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] - Layer names, remote layer ids and map-server URLs
//! - [`source`] - Paginated feature source abstraction and the ArcGIS adapter
//! - [`resume`] - Resume registry, run-state derivation and folder locking
//! - [`output`] - Chunk files, output naming and JSON documents
//! - [`downloader`] - Extraction orchestrator with retry and backoff

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Layer catalog with remote layer ids
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Extraction orchestration
pub mod downloader;

/// Process-wide metrics
pub mod metrics;

/// Chunk files and output documents
pub mod output;

/// Resume registry and run state
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Remote feature sources
pub mod source;

pub use catalog::LayerCatalog;
pub use downloader::{DumpExecutor, DumpJob};
pub use resume::ResumeRegistry;

/// A single feature produced by a source (geometry + attributes)
///
/// The dumper never interprets the fields of a record. It only preserves the
/// order in which the source produced them and serializes each record as one
/// line of JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(Value);

impl FeatureRecord {
    /// Wrap an arbitrary JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the record, returning the underlying JSON value
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a top-level member of the record
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Serialize the record as a single line of JSON (without the newline)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

impl From<Value> for FeatureRecord {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<Map<String, Value>> for FeatureRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(Value::Object(map))
    }
}
