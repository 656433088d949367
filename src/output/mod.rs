//! Output files of a layer dump
//!
//! - [`path`] - deterministic naming of every file a dump produces
//! - [`chunk`] - GeoJSON-lines chunk files, rollover and crash cleanup
//! - [`json`] - pretty-printed JSON documents and GeoJSON feature collections

use crate::FeatureRecord;

pub mod chunk;
pub mod json;
pub mod path;

pub use chunk::ChunkWriter;
pub use json::{write_json_pretty, FeatureCollectionWriter};
pub use path::LayerPaths;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Sink for features in source order
pub trait FeatureWriter {
    /// Write a single feature
    fn write_feature(&mut self, record: &FeatureRecord) -> OutputResult<()>;

    /// Flush buffered data and sync it to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Number of features written through this writer
    fn features_written(&self) -> u64;
}

pub(crate) fn io_error(context: &str, path: &std::path::Path, e: std::io::Error) -> OutputError {
    OutputError::IoError(format!("{context} {}: {e}", path.display()))
}
