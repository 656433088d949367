//! Graceful shutdown: committed chunks survive, nothing new is started

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use layer_dumper::downloader::{BackoffPolicy, DumpError, DumpExecutor, DumpJob, JobStatus};
use layer_dumper::output::LayerPaths;
use layer_dumper::shutdown::{ShutdownCoordinator, SharedShutdown};
use layer_dumper::source::{FeatureSource, OpenedSource, SourceError, SourceRequest, SourceResult};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;

use super::support::{chunk_ids, feature, registry_lines, Fault, MemorySource};

/// Source that requests shutdown once the feature with id `trigger` is produced
struct InterruptingSource {
    total: u64,
    trigger: u64,
    shutdown: SharedShutdown,
}

#[async_trait]
impl FeatureSource for InterruptingSource {
    async fn open(&self, request: &SourceRequest) -> SourceResult<OpenedSource> {
        let shutdown = self.shutdown.clone();
        let trigger = self.trigger;
        let features = stream::iter(request.start_offset..self.total).map(move |id| {
            if id == trigger {
                shutdown.request_shutdown();
            }
            Ok::<_, SourceError>(feature(id))
        });

        Ok(OpenedSource {
            features: Box::pin(features),
            total: Some(self.total),
        })
    }

    async fn metadata(&self) -> SourceResult<Value> {
        Ok(json!({"name": "Edificações"}))
    }

    fn describe(&self) -> String {
        "interrupting".to_string()
    }
}

#[tokio::test]
async fn test_shutdown_before_start() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let source = MemorySource::new(4);
    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let err = DumpExecutor::new()
        .with_shutdown(shutdown)
        .execute(&mut job, &source)
        .await
        .unwrap_err();

    assert!(matches!(err, DumpError::Cancelled));
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(source.opens().is_empty());
}

#[tokio::test]
async fn test_shutdown_mid_stream_keeps_committed_chunks() {
    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let shutdown = ShutdownCoordinator::shared();
    let source = InterruptingSource {
        total: 10,
        trigger: 4,
        shutdown: shutdown.clone(),
    };

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let err = DumpExecutor::new()
        .with_shutdown(shutdown)
        .execute(&mut job, &source)
        .await
        .unwrap_err();

    assert!(matches!(err, DumpError::Cancelled));
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.progress.features_written, 5);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 2);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![4]);

    // the next run discards the partial chunk and continues
    let source = MemorySource::new(10);
    let progress = DumpExecutor::new()
        .with_shutdown(ShutdownCoordinator::shared())
        .with_backoff(BackoffPolicy::immediate())
        .execute(&mut DumpJob::new("buildings", dir.path()).with_chunk_size(2), &source)
        .await
        .unwrap();
    assert_eq!(source.opens(), vec![4]);
    assert_eq!(progress.chunks_cleaned, 1);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![4, 5]);
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let source = MemorySource::new(4).always_failing(Fault::Transient);

    let slow = BackoffPolicy {
        multiplier: Duration::from_secs(3600),
        min: Duration::from_secs(3600),
        max: Duration::from_secs(3600),
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        max_attempts: None,
    };

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.request_shutdown();
    });

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let executor = DumpExecutor::new().with_shutdown(shutdown).with_backoff(slow);
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        executor.execute(&mut job, &source),
    )
    .await
    .expect("shutdown should cut the backoff short");

    assert!(matches!(result, Err(DumpError::Cancelled)));
    assert_eq!(source.opens().len(), 1);
    assert_eq!(job.progress.retries, 1);
}
