//! Single-file snapshot dumps

use layer_dumper::downloader::{DumpError, SnapshotDumper};
use serde_json::Value;
use tempfile::TempDir;

use super::support::{Fault, MemorySource};

#[tokio::test]
async fn test_snapshot_writes_feature_collection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("buildings.geojson");
    let source = MemorySource::new(5);

    let summary = SnapshotDumper::new()
        .with_page_size(2)
        .dump(&source, &path)
        .await
        .unwrap();

    assert_eq!(summary.features, 5);
    assert_eq!(summary.total, Some(5));
    assert_eq!(summary.metadata_path, dir.path().join("buildings_metadata.json"));
    assert_eq!(source.opens(), vec![0]);

    let collection: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(collection["type"], "FeatureCollection");
    let ids: Vec<u64> = collection["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    let metadata = std::fs::read_to_string(&summary.metadata_path).unwrap();
    assert!(metadata.contains("Edificações"));
}

#[tokio::test]
async fn test_empty_layer_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.geojson");

    let summary = SnapshotDumper::new()
        .dump(&MemorySource::new(0), &path)
        .await
        .unwrap();

    assert_eq!(summary.features, 0);
    let collection: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(collection["features"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_failed_snapshot_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("buildings.geojson");
    let source = MemorySource::new(5).fail_at(3, Fault::Transient);

    let err = SnapshotDumper::new().dump(&source, &path).await.unwrap_err();

    assert!(matches!(err, DumpError::Source(_)));
    assert!(!path.exists());
    // no retry for snapshots
    assert_eq!(source.opens().len(), 1);
}

#[tokio::test]
async fn test_zero_page_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = SnapshotDumper::new()
        .with_page_size(0)
        .dump(&MemorySource::new(1), &dir.path().join("x.geojson"))
        .await
        .unwrap_err();

    assert!(matches!(err, DumpError::ConfigError(_)));
}
