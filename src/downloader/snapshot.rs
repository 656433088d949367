//! One-shot dump of a whole layer into a single GeoJSON file
//!
//! No registry, no chunks and no retry: the layer is streamed from offset 0
//! into a `FeatureCollection` that only appears on disk once complete. The
//! layer metadata goes next to it as `<stem>_metadata.json`.

use futures_util::StreamExt;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Instrument};

use super::config::DEFAULT_PAGE_SIZE;
use super::DumpError;
use crate::output::path::snapshot_metadata_path;
use crate::output::{write_json_pretty, FeatureCollectionWriter, FeatureWriter};
use crate::shutdown::{self, SharedShutdown};
use crate::source::{FeatureSource, SourceRequest};

/// Result of a snapshot dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// Feature collection file
    pub path: PathBuf,
    /// Metadata document
    pub metadata_path: PathBuf,
    /// Features written
    pub features: u64,
    /// Total reported by the source, if any
    pub total: Option<u64>,
}

/// Writes a layer to one GeoJSON `FeatureCollection`
pub struct SnapshotDumper {
    page_size: u64,
    timeout: Option<Duration>,
    extra_params: Vec<(String, String)>,
    progress_bar: Option<ProgressBar>,
    shutdown: Option<SharedShutdown>,
}

impl Default for SnapshotDumper {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotDumper {
    /// Dumper with the default page size and no timeout
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            timeout: None,
            extra_params: Vec::new(),
            progress_bar: None,
            shutdown: shutdown::get_global_shutdown(),
        }
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

    /// Query parameters passed through to the source
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.extra_params = params;
        self
    }

    /// Mirror progress on an `indicatif` bar
    pub fn with_progress_bar(mut self, progress_bar: ProgressBar) -> Self {
        self.progress_bar = Some(progress_bar);
        self
    }

    /// Dump every feature of `source` into `path`
    ///
    /// Any error, transient or not, aborts the snapshot and leaves no file at
    /// `path`.
    pub async fn dump(
        &self,
        source: &dyn FeatureSource,
        path: &Path,
    ) -> Result<SnapshotSummary, DumpError> {
        if self.page_size == 0 {
            return Err(DumpError::ConfigError(
                "Page size must be greater than zero".to_string(),
            ));
        }

        let span = tracing::info_span!("snapshot", path = %path.display());
        async move {
            info!(source = %source.describe(), "Starting snapshot dump");

            let metadata_path = snapshot_metadata_path(path);
            let metadata = source.metadata().await?;
            write_json_pretty(&metadata_path, &metadata)?;

            let request = SourceRequest {
                start_offset: 0,
                page_size: self.page_size,
                extra_params: self.extra_params.clone(),
                timeout: self.timeout,
            };
            let opened = source.open(&request).await?;

            if let (Some(pb), Some(total)) = (&self.progress_bar, opened.total) {
                pb.set_length(total);
            }

            let mut writer = FeatureCollectionWriter::create(path)?;
            let mut features = opened.features;
            while let Some(item) = features.next().await {
                writer.write_feature(&item?)?;
                if let Some(pb) = &self.progress_bar {
                    pb.inc(1);
                }
                if self.shutdown_requested() {
                    return Err(DumpError::Cancelled);
                }
            }

            let written = writer.finish()?;
            info!(features = written, total = ?opened.total, "Snapshot written");

            Ok(SnapshotSummary {
                path: path.to_path_buf(),
                metadata_path,
                features: written,
                total: opened.total,
            })
        }
        .instrument(span)
        .await
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}
