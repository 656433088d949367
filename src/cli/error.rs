//! CLI error types and conversions

use crate::catalog::CatalogError;
use crate::downloader::DumpError;
use crate::metrics::MetricsError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::source::SourceError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Catalog error
    #[error("catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    /// Dump error
    #[error("dump error: {0}")]
    DumpError(#[from] DumpError),

    /// Source error
    #[error("source error: {0}")]
    SourceError(#[from] SourceError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Registry check found problems
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl CliError {
    /// Whether the command stopped because shutdown was requested
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CliError::DumpError(DumpError::Cancelled))
    }
}
