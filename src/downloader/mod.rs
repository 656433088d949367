//! Dump orchestration
//!
//! # Overview
//!
//! 1. **Job Creation**: describe what to dump with [`job::DumpJob`]
//! 2. **Execution**: run it with [`executor::DumpExecutor`], which resumes from
//!    the registry, cleans up after crashed runs and retries transient
//!    failures with [`config::BackoffPolicy`]
//! 3. **Progress Tracking**: [`job::JobStatus`], [`job::JobProgress`] and the
//!    periodic lines of [`progress::ProgressState`]
//! 4. **Snapshots**: [`snapshot`] writes a whole layer to one GeoJSON file
//!    without resume support
//!
//! # Error Handling
//!
//! All operations return `Result<T, DumpError>`:
//! - Transient source errors (network, timeout, 429, 5xx) are retried
//! - Configuration errors fail before anything is written
//! - Local I/O errors are fatal, since retrying cannot fix them

pub mod config;
pub mod executor;
pub mod job;
pub mod progress;
pub mod snapshot;

pub use config::BackoffPolicy;
pub use executor::DumpExecutor;
pub use job::{DumpJob, JobProgress, JobStatus};
pub use snapshot::{SnapshotDumper, SnapshotSummary};

use crate::catalog::CatalogError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::source::SourceError;

/// Dump errors
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// Invalid job configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Layer could not be resolved
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Feature source failure
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Registry or lock failure
    #[error("resume error: {0}")]
    Resume(#[from] ResumeError),

    /// Chunk or document write failure
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Configured attempt limit reached
    #[error("giving up after {attempts} consecutive failures: {last_error}")]
    RetriesExhausted {
        /// Consecutive failed attempts
        attempts: u32,
        /// Error of the last attempt
        last_error: String,
    },

    /// Shutdown requested before the layer was exhausted
    #[error("dump cancelled")]
    Cancelled,
}

impl DumpError {
    /// Whether the streaming phase should be retried after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, DumpError::Source(e) if e.is_transient())
    }
}
