//! End-to-end dumps against a mocked ArcGIS map server

use layer_dumper::catalog::LayerCatalog;
use layer_dumper::downloader::{BackoffPolicy, DumpExecutor, DumpJob};
use layer_dumper::output::LayerPaths;
use layer_dumper::source::arcgis::ArcGisSource;
use serde_json::{json, Value};
use std::ops::Range;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::{chunk_ids, registry_lines};

fn page(ids: Range<u64>, more: bool) -> Value {
    let features: Vec<Value> = ids
        .map(|id| {
            json!({
                "type": "Feature",
                "id": id,
                "geometry": {"type": "Polygon", "coordinates": [[[-49.27, -25.43], [-49.26, -25.43], [-49.26, -25.42], [-49.27, -25.43]]]},
                "properties": {"objectid": id, "nome": "Edificação"}
            })
        })
        .collect();
    json!({"type": "FeatureCollection", "features": features, "exceededTransferLimit": more})
}

async fn mock_layer(server: &MockServer, total: u64, page_size: u64) {
    Mock::given(method("GET"))
        .and(path("/MapServer/72"))
        .and(query_param("f", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 72,
            "name": "Edificações",
            "objectIdField": "objectid",
            "maxRecordCount": 1000
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("returnCountOnly", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": total})))
        .mount(server)
        .await;

    let mut offset = 0;
    while offset < total {
        let end = (offset + page_size).min(total);
        Mock::given(method("GET"))
            .and(path("/MapServer/72/query"))
            .and(query_param("f", "geojson"))
            .and(query_param("resultOffset", offset.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(offset..end, end < total)))
            .mount(server)
            .await;
        offset = end;
    }
}

fn catalog(server: &MockServer) -> LayerCatalog {
    LayerCatalog::from_json(
        &json!({
            "schema_version": "1.0.0",
            "map_servers": {
                "primary": format!("{}/MapServer/", server.uri()),
                "alternate": format!("{}/AltServer/", server.uri())
            },
            "layers": [
                {"name": "buildings", "layer_id": "72", "alt_layer_id": "62", "description": "Buildings"}
            ]
        })
        .to_string(),
    )
    .unwrap()
}

fn source(server: &MockServer) -> ArcGisSource {
    let url = catalog(server).layer_url("buildings", false).unwrap();
    ArcGisSource::new(url, None).unwrap()
}

#[tokio::test]
async fn test_full_dump_from_map_server() {
    let server = MockServer::start().await;
    mock_layer(&server, 7, 3).await;

    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let mut job = DumpJob::new("buildings", dir.path())
        .with_chunk_size(3)
        .with_page_size(3);

    let progress = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate())
        .execute(&mut job, &source(&server))
        .await
        .unwrap();

    assert_eq!(progress.total_features, Some(7));
    assert_eq!(progress.features_written, 7);
    assert!(progress.is_complete());

    assert_eq!(chunk_ids(&paths.chunk_path(0)), vec![0, 1, 2]);
    assert_eq!(chunk_ids(&paths.chunk_path(1)), vec![3, 4, 5]);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![6]);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 2);

    let metadata: Value =
        serde_json::from_str(&std::fs::read_to_string(paths.metadata_path()).unwrap()).unwrap();
    assert_eq!(metadata["name"], "Edificações");

    // each chunk line is a bare feature, not a collection
    let first_line = std::fs::read_to_string(paths.chunk_path(0)).unwrap();
    let feature: Value = serde_json::from_str(first_line.lines().next().unwrap()).unwrap();
    assert_eq!(feature["type"], "Feature");
    assert_eq!(feature["properties"]["nome"], "Edificação");
}

#[tokio::test]
async fn test_rate_limited_page_is_retried() {
    let server = MockServer::start().await;

    // the first request for the second page is throttled
    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("f", "geojson"))
        .and(query_param("resultOffset", "3"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mock_layer(&server, 7, 3).await;

    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let mut job = DumpJob::new("buildings", dir.path())
        .with_chunk_size(3)
        .with_page_size(3);

    let progress = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate())
        .execute(&mut job, &source(&server))
        .await
        .unwrap();

    assert_eq!(progress.retries, 1);
    assert_eq!(chunk_ids(&paths.chunk_path(0)), vec![0, 1, 2]);
    assert_eq!(chunk_ids(&paths.chunk_path(1)), vec![3, 4, 5]);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![6]);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 2);
}

#[tokio::test]
async fn test_rerun_resumes_at_committed_offset() {
    let server = MockServer::start().await;
    mock_layer(&server, 7, 3).await;

    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let executor = DumpExecutor::new().with_backoff(BackoffPolicy::immediate());

    let mut first = DumpJob::new("buildings", dir.path()).with_chunk_size(3).with_page_size(3);
    executor.execute(&mut first, &source(&server)).await.unwrap();

    let mut second = DumpJob::new("buildings", dir.path()).with_chunk_size(3).with_page_size(3);
    let progress = executor.execute(&mut second, &source(&server)).await.unwrap();

    assert_eq!(progress.start_idx, 6);
    assert_eq!(progress.features_written, 1);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![6]);

    let offsets: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(k, _)| k == "resultOffset")
                .map(|(_, v)| v.into_owned())
        })
        .collect();
    assert_eq!(offsets, vec!["0", "3", "6", "6"]);
}

#[tokio::test]
async fn test_missing_layer_service_error_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("f", "geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"code": 404, "message": "Service not found", "details": []}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    mock_layer(&server, 4, 2).await;

    let dir = TempDir::new().unwrap();
    let mut job = DumpJob::new("buildings", dir.path()).with_chunk_size(2);
    let err = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate().with_max_attempts(5))
        .execute(&mut job, &source(&server))
        .await
        .unwrap_err();

    assert!(!err.is_retryable());
    assert!(err.to_string().contains("Service not found"), "{err}");
    assert_eq!(job.progress.retries, 0);
}

#[tokio::test]
async fn test_overloaded_query_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("f", "geojson"))
        .and(query_param("resultOffset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"code": 400, "message": "Failed to execute query.", "details": []}
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mock_layer(&server, 4, 2).await;

    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let mut job = DumpJob::new("buildings", dir.path())
        .with_chunk_size(2)
        .with_page_size(2);
    let progress = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate().with_max_attempts(5))
        .execute(&mut job, &source(&server))
        .await
        .unwrap();

    assert_eq!(progress.retries, 1);
    assert_eq!(chunk_ids(&paths.chunk_path(0)), vec![0, 1]);
    assert_eq!(chunk_ids(&paths.chunk_path(1)), vec![2, 3]);
}

#[tokio::test]
async fn test_html_error_page_is_retried() {
    let server = MockServer::start().await;

    // a proxy answers for the service once, with a 200 and an HTML page
    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("f", "geojson"))
        .and(query_param("resultOffset", "3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html><body><h1>Service temporarily unavailable</h1></body></html>"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mock_layer(&server, 7, 3).await;

    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    let mut job = DumpJob::new("buildings", dir.path())
        .with_chunk_size(3)
        .with_page_size(3);

    let progress = DumpExecutor::new()
        .with_backoff(BackoffPolicy::immediate().with_max_attempts(5))
        .execute(&mut job, &source(&server))
        .await
        .unwrap();

    assert_eq!(progress.retries, 1);
    assert_eq!(progress.position, 7);
    assert_eq!(chunk_ids(&paths.chunk_path(0)), vec![0, 1, 2]);
    assert_eq!(chunk_ids(&paths.chunk_path(1)), vec![3, 4, 5]);
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![6]);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 2);
}
