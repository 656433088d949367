//! Dump executor: resumable chunked extraction with a retry envelope
//!
//! Every attempt walks the same phases:
//!
//! ```text
//! INIT -> RESUME_COMPUTE -> CLEANUP -> STREAMING -> DONE
//!                ^                         |
//!                +------ BACKOFF <---------+  (transient source error)
//! ```
//!
//! Only a transient source error leads to another attempt. Each attempt
//! re-reads the registry, so the restart point is always the last committed
//! chunk boundary and the partial chunk of the failed attempt is deleted.
//!
//! Resuming by offset relies on the source returning features in a stable
//! order; see [`crate::source`].

use futures_util::StreamExt;
use indicatif::ProgressBar;
use tracing::{debug, info, warn, Instrument};

use crate::downloader::config::BackoffPolicy;
use crate::downloader::progress::ProgressState;
use crate::downloader::{DumpError, DumpJob, JobProgress, JobStatus};
use crate::metrics::{self, DumpMetrics};
use crate::output::chunk::{cleanup_unregistered, should_rollover};
use crate::output::{write_json_pretty, ChunkWriter, FeatureWriter, LayerPaths};
use crate::resume::{DumpLock, ResumeRegistry, RunState};
use crate::shutdown::{self, SharedShutdown};
use crate::source::FeatureSource;

/// How an attempt that did not fail ended
enum AttemptOutcome {
    /// Source exhausted
    Completed,
    /// Shutdown requested mid-stream
    Cancelled,
}

/// Dump executor orchestrates the complete dump workflow
pub struct DumpExecutor {
    backoff: BackoffPolicy,
    shutdown: Option<SharedShutdown>,
    progress_bar: Option<ProgressBar>,
}

impl Default for DumpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpExecutor {
    /// Executor with the default backoff, attached to the global shutdown handle
    pub fn new() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            shutdown: shutdown::get_global_shutdown(),
            progress_bar: None,
        }
    }

    /// Override the retry backoff
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Mirror progress on an `indicatif` bar
    pub fn with_progress_bar(mut self, progress_bar: ProgressBar) -> Self {
        self.progress_bar = Some(progress_bar);
        self
    }

    /// Dump `job` from `source` until the source is exhausted
    ///
    /// Updates `job.status` and `job.progress` and returns the final progress.
    /// The last chunk is left unregistered; a later run re-fetches its
    /// features.
    pub async fn execute(
        &self,
        job: &mut DumpJob,
        source: &dyn FeatureSource,
    ) -> Result<JobProgress, DumpError> {
        let span = tracing::info_span!(
            "execute_dump_job",
            layer = %job.layer,
            output = %job.output_folder.display(),
            chunk_size = job.chunk_size,
            page_size = job.page_size,
        );

        async move {
            info!(source = %source.describe(), "Starting dump job");
            let dump_metrics = DumpMetrics::start(&job.layer);

            match self.run(job, source, &dump_metrics).await {
                Ok(()) => {
                    job.status = JobStatus::Completed;
                    dump_metrics.record_success(job.progress.features_written);
                    Ok(job.progress.clone())
                }
                Err(DumpError::Cancelled) => {
                    job.status = JobStatus::Cancelled;
                    job.progress.error = Some("Shutdown requested".to_string());
                    info!(
                        features_written = job.progress.features_written,
                        "Dump cancelled, committed chunks are kept"
                    );
                    Err(DumpError::Cancelled)
                }
                Err(e) => {
                    job.status = JobStatus::Failed;
                    job.progress.error = Some(e.to_string());
                    dump_metrics.record_failure(&e.to_string());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        job: &mut DumpJob,
        source: &dyn FeatureSource,
        dump_metrics: &DumpMetrics,
    ) -> Result<(), DumpError> {
        // INIT
        job.validate()?;
        let paths = job.paths();
        std::fs::create_dir_all(paths.folder()).map_err(|e| {
            crate::output::OutputError::IoError(format!(
                "Failed to create {}: {e}",
                paths.folder().display()
            ))
        })?;
        let _lock = DumpLock::try_acquire(&paths.lock_path())?;

        job.status = JobStatus::InProgress;
        let mut metadata_written = false;
        let mut failures: u32 = 0;

        loop {
            if self.shutdown_requested() {
                return Err(DumpError::Cancelled);
            }

            let written_before = job.progress.features_written;
            let result = self
                .attempt(job, source, &paths, &mut metadata_written, dump_metrics)
                .await;

            let error = match result {
                Ok(AttemptOutcome::Completed) => {
                    info!(
                        features_written = job.progress.features_written,
                        chunks_committed = job.progress.chunks_committed,
                        position = job.progress.position,
                        "Source exhausted, dump complete"
                    );
                    return Ok(());
                }
                Ok(AttemptOutcome::Cancelled) => return Err(DumpError::Cancelled),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if job.progress.features_written > written_before {
                failures = 0;
            }
            failures += 1;

            if !self.backoff.allows_retry(failures) {
                return Err(DumpError::RetriesExhausted {
                    attempts: failures,
                    last_error: error.to_string(),
                });
            }

            job.progress.retries += 1;
            let delay = self.backoff.delay(failures);
            warn!(
                error = %error,
                consecutive_failures = failures,
                backoff_ms = delay.as_millis() as u64,
                "Transient failure, retrying from the last committed chunk"
            );
            metrics::record_retry_backoff(&job.layer, delay, failures);

            if !self.sleep_unless_shutdown(delay).await {
                return Err(DumpError::Cancelled);
            }
        }
    }

    async fn attempt(
        &self,
        job: &mut DumpJob,
        source: &dyn FeatureSource,
        paths: &LayerPaths,
        metadata_written: &mut bool,
        dump_metrics: &DumpMetrics,
    ) -> Result<AttemptOutcome, DumpError> {
        if !*metadata_written {
            let metadata = source.metadata().await?;
            write_json_pretty(&paths.metadata_path(), &metadata)?;
            *metadata_written = true;
            debug!(path = %paths.metadata_path().display(), "Layer metadata written");
        }

        // RESUME_COMPUTE
        let mut registry = ResumeRegistry::load(&paths.registry_path())?;
        let state = RunState::derive(&registry, paths.folder())?;
        let chunk_size = state.effective_chunk_size(job.chunk_size);
        let start_idx = state.start_idx;

        // CLEANUP
        let removed = cleanup_unregistered(paths, |p| registry.is_registered(p))?;
        job.progress.chunks_cleaned += removed.len() as u64;
        dump_metrics.record_chunks_cleaned(removed.len() as u64);

        // STREAMING
        let opened = source.open(&job.source_request(start_idx)).await?;
        if opened.total.is_some() {
            job.progress.total_features = opened.total;
        }
        job.progress.start_idx = start_idx;
        job.progress.position = start_idx;

        info!(
            start_idx,
            chunk_size,
            chunk_index = state.next_chunk_index,
            total = ?opened.total,
            "Streaming features"
        );

        if let Some(pb) = &self.progress_bar {
            if let Some(total) = opened.total {
                pb.set_length(total);
            }
            pb.set_position(start_idx);
        }

        let mut writer = ChunkWriter::new(paths.clone(), state.next_chunk_index);
        let mut progress = ProgressState::new(start_idx, opened.total, state.next_chunk_index);
        let mut features = opened.features;
        let mut index = start_idx;

        while let Some(item) = features.next().await {
            let record = item?;

            if should_rollover(index, start_idx, chunk_size) {
                let finished = writer.roll_over()?;
                if registry.commit(&finished)? {
                    job.progress.chunks_committed += 1;
                    dump_metrics.record_chunk_committed();
                    info!(chunk = %finished.display(), completed_chunks = registry.len(), "Chunk committed");
                }
            }

            writer.write_feature(&record)?;
            index += 1;

            job.progress.features_written += 1;
            job.progress.position = index;
            dump_metrics.record_feature();
            progress.record(writer.chunk_index());

            if let Some(pb) = &self.progress_bar {
                pb.set_position(index);
            }
            if progress.should_emit_update() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }

            if self.shutdown_requested() {
                writer.close()?;
                return Ok(AttemptOutcome::Cancelled);
            }
        }

        if let Some(tail) = writer.close()? {
            debug!(chunk = %tail.display(), "Final chunk left unregistered");
        }
        Ok(AttemptOutcome::Completed)
    }

    /// Sleep for `delay`; returns `false` if shutdown interrupted the sleep
    async fn sleep_unless_shutdown(&self, delay: std::time::Duration) -> bool {
        if self.shutdown_requested() {
            return false;
        }
        if let Some(shutdown) = &self.shutdown {
            tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = shutdown.wait_for_shutdown() => false,
            }
        } else {
            tokio::time::sleep(delay).await;
            true
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}
