//! Retry envelope: which failures are retried and where streaming restarts

use layer_dumper::downloader::{BackoffPolicy, DumpError, DumpExecutor, DumpJob, JobStatus};
use layer_dumper::output::LayerPaths;
use layer_dumper::source::SourceError;
use tempfile::TempDir;

use super::support::{chunk_ids, registry_lines, Fault, MemorySource};

fn executor() -> DumpExecutor {
    DumpExecutor::new().with_backoff(BackoffPolicy::immediate())
}

#[tokio::test]
async fn test_transient_failure_restarts_at_committed_boundary() {
    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let source = MemorySource::new(9).fail_at(4, Fault::Transient);

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(3);
    let progress = executor().execute(&mut job, &source).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(source.opens(), vec![0, 3]);
    assert_eq!(progress.retries, 1);
    assert_eq!(progress.position, 9);
    assert_eq!(progress.start_idx, 3);
    // id 3 was written twice: once before the failure, once after the restart
    assert_eq!(progress.features_written, 10);
    assert_eq!(progress.chunks_cleaned, 1);

    assert_eq!(chunk_ids(&paths.chunk_path(0)), vec![0, 1, 2]);
    assert_eq!(chunk_ids(&paths.chunk_path(1)), vec![3, 4, 5]);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![6, 7, 8]);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 2);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let source = MemorySource::new(5).always_failing(Fault::Fatal);

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let err = executor().execute(&mut job, &source).await.unwrap_err();

    assert!(matches!(
        err,
        DumpError::Source(SourceError::Rejected { status: 400, .. })
    ));
    assert_eq!(source.opens().len(), 1);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress.retries, 0);
    assert!(job.progress.error.is_some());
}

#[tokio::test]
async fn test_attempt_limit_reports_exhaustion() {
    let dir = TempDir::new().unwrap();
    let source = MemorySource::new(5).always_failing(Fault::Transient);

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let err = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate().with_max_attempts(3))
        .execute(&mut job, &source)
        .await
        .unwrap_err();

    match err {
        DumpError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("rate limit"), "{last_error}");
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(source.opens().len(), 3);
    assert_eq!(job.progress.retries, 2);
}

#[tokio::test]
async fn test_progress_resets_failure_count() {
    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let source = MemorySource::new(8)
        .fail_at(2, Fault::Transient)
        .fail_at(4, Fault::Transient)
        .fail_at(6, Fault::Transient);

    // every attempt writes something, so two attempts are never consecutive failures
    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let progress = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate().with_max_attempts(2))
        .execute(&mut job, &source)
        .await
        .unwrap();

    assert_eq!(source.opens(), vec![0, 0, 2, 4]);
    assert_eq!(progress.retries, 3);
    assert_eq!(chunk_ids(&paths.chunk_path(3)), vec![6, 7]);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 3);
}

#[tokio::test]
async fn test_metadata_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let source = MemorySource::new(3).failing_metadata(1);

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    executor().execute(&mut job, &source).await.unwrap();

    assert_eq!(source.metadata_calls(), 2);
    assert_eq!(source.opens(), vec![0]);
    assert!(paths.metadata_path().exists());
}

#[tokio::test]
async fn test_metadata_fetched_once_across_retries() {
    let dir = TempDir::new().unwrap();
    let source = MemorySource::new(6)
        .fail_at(3, Fault::Transient)
        .fail_at(4, Fault::Transient);

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    executor().execute(&mut job, &source).await.unwrap();

    assert_eq!(source.opens().len(), 3);
    assert_eq!(source.metadata_calls(), 1);
}

#[tokio::test]
async fn test_unwritable_output_folder_fails_before_streaming() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"occupied").unwrap();

    let source = MemorySource::new(3);
    let mut job = DumpJob::new("buildings", &blocker).with_chunk_size(2);
    let err = executor().execute(&mut job, &source).await.unwrap_err();

    assert!(matches!(err, DumpError::Output(_)));
    assert!(source.opens().is_empty());
    assert_eq!(source.metadata_calls(), 0);
}

#[tokio::test]
async fn test_chunk_write_failure_mid_stream_is_fatal() {
    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    // the second chunk cannot be opened for appending
    std::fs::create_dir(paths.chunk_path(1)).unwrap();

    let source = MemorySource::new(5);
    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let err = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate().with_max_attempts(5))
        .execute(&mut job, &source)
        .await
        .unwrap_err();

    assert!(matches!(err, DumpError::Output(_)), "{err:?}");
    assert_eq!(source.opens().len(), 1);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress.retries, 0);
    assert_eq!(job.progress.features_written, 2);
    // the chunk finished before the failure stays committed
    assert_eq!(registry_lines(&paths.registry_path()).len(), 1);
    assert_eq!(chunk_ids(&paths.chunk_path(0)), vec![0, 1]);
}

#[tokio::test]
async fn test_invalid_job_is_rejected() {
    let dir = TempDir::new().unwrap();
    let source = MemorySource::new(3);

    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(0);
    let err = executor().execute(&mut job, &source).await.unwrap_err();

    assert!(matches!(err, DumpError::ConfigError(_)));
    assert_eq!(job.status, JobStatus::Failed);
    assert!(source.opens().is_empty());
}
