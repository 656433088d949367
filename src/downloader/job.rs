//! Dump job definition and status tracking

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::config::{DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};
use super::DumpError;
use crate::output::LayerPaths;
use crate::source::SourceRequest;

/// What to dump and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpJob {
    /// Layer name (e.g. "buildings")
    pub layer: String,
    /// Folder receiving chunks, registry and metadata
    pub output_folder: PathBuf,
    /// Maximum features per chunk file
    pub chunk_size: u64,
    /// Features requested per page
    pub page_size: u64,
    /// Per-request timeout
    pub timeout: Option<Duration>,
    /// Query parameters passed through to the source, in order
    pub extra_params: Vec<(String, String)>,
    /// Read from the alternate map server
    pub use_alt: bool,
    /// Current job status
    #[serde(default)]
    pub status: JobStatus,
    /// Job progress tracking
    #[serde(default)]
    pub progress: JobProgress,
}

impl DumpJob {
    /// Dump `layer` into `output_folder` with default sizes
    pub fn new(layer: impl Into<String>, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            layer: layer.into(),
            output_folder: output_folder.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            timeout: None,
            extra_params: Vec::new(),
            use_alt: false,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
        }
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a query parameter passed through to the source
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    /// Read from the alternate map server
    pub fn with_alt(mut self, use_alt: bool) -> Self {
        self.use_alt = use_alt;
        self
    }

    /// Validate job parameters
    pub fn validate(&self) -> Result<(), DumpError> {
        if self.layer.trim().is_empty() {
            return Err(DumpError::ConfigError("Layer cannot be empty".to_string()));
        }

        if self.output_folder.as_os_str().is_empty() {
            return Err(DumpError::ConfigError(
                "Output folder must be specified".to_string(),
            ));
        }

        if self.layer.contains(['/', '\\']) {
            return Err(DumpError::ConfigError(format!(
                "Layer '{}' cannot contain path separators",
                self.layer
            )));
        }

        if self.chunk_size == 0 {
            return Err(DumpError::ConfigError(
                "Chunk size must be greater than zero".to_string(),
            ));
        }

        if self.page_size == 0 {
            return Err(DumpError::ConfigError(
                "Page size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Output file names for this job
    pub fn paths(&self) -> LayerPaths {
        LayerPaths::new(&self.output_folder, &self.layer)
    }

    /// Source request starting at `start_offset`
    pub fn source_request(&self, start_offset: u64) -> SourceRequest {
        SourceRequest {
            start_offset,
            page_size: self.page_size,
            extra_params: self.extra_params.clone(),
            timeout: self.timeout,
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobStatus {
    /// Job has not started yet
    #[default]
    Pending,
    /// Job is currently running
    InProgress,
    /// Job completed successfully
    Completed,
    /// Job failed with error
    Failed,
    /// Job was cancelled
    Cancelled,
}

/// Job progress tracking
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Total features reported by the source, if any
    pub total_features: Option<u64>,
    /// Remote offset the last attempt started from
    pub start_idx: u64,
    /// Remote offset of the next feature to fetch
    pub position: u64,
    /// Features written during this run (all attempts)
    pub features_written: u64,
    /// Chunks committed to the registry during this run
    pub chunks_committed: u64,
    /// Chunks deleted by cleanup during this run
    pub chunks_cleaned: u64,
    /// Number of retries attempted
    pub retries: u64,
    /// Error message if job failed
    pub error: Option<String>,
}

impl JobProgress {
    /// Dump percentage (0.0 to 100.0), when the total is known
    pub fn percentage(&self) -> Option<f64> {
        self.total_features.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.position.min(total) as f64 / total as f64) * 100.0
            }
        })
    }

    /// Check if the dump reached the reported total
    pub fn is_complete(&self) -> bool {
        if let Some(total) = self.total_features {
            self.position >= total
        } else {
            false
        }
    }
}
