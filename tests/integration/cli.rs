//! Command-line behaviour of the `layer-dumper` binary

use assert_cmd::Command;
use layer_dumper::output::LayerPaths;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::{chunk_ids, registry_lines};

fn cmd() -> Command {
    Command::cargo_bin("layer-dumper").unwrap()
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_catalog(dir: &Path, server: &MockServer) -> PathBuf {
    let path = dir.join("layers.json");
    let catalog = json!({
        "schema_version": "1.0.0",
        "map_servers": {
            "primary": format!("{}/MapServer/", server.uri()),
            "alternate": format!("{}/AltServer/", server.uri())
        },
        "layers": [
            {"name": "buildings", "layer_id": "72", "alt_layer_id": "62", "description": "Buildings"}
        ]
    });
    std::fs::write(&path, catalog.to_string()).unwrap();
    path
}

async fn mock_small_layer(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/MapServer/72"))
        .and(query_param("f", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Edificações",
            "objectIdField": "objectid"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("returnCountOnly", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 5})))
        .mount(server)
        .await;
    let features: Vec<Value> = (0..5u64)
        .map(|id| json!({"type": "Feature", "id": id, "geometry": null, "properties": {"objectid": id}}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/MapServer/72/query"))
        .and(query_param("f", "geojson"))
        .and(query_param("resultOffset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "FeatureCollection",
            "features": features,
            "exceededTransferLimit": false
        })))
        .mount(server)
        .await;
}

#[test]
fn test_layers_lists_embedded_catalog() {
    let output = cmd().args(["--output-format", "json", "layers"]).output().unwrap();
    assert!(output.status.success());

    let rows: Value = serde_json::from_str(&stdout(&output)).unwrap();
    let buildings = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["layer"] == "buildings")
        .expect("buildings layer listed");
    assert_eq!(buildings["layer_id"], "72");
    assert!(buildings["url"].as_str().unwrap().ends_with("/MapServer/72"));
}

#[test]
fn test_empty_layer_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    cmd()
        .args(["dump", "--layer", "", "--output"])
        .arg(dir.path())
        .assert()
        .code(1);
}

#[test]
fn test_unknown_layer_is_rejected() {
    let dir = TempDir::new().unwrap();
    let output = cmd()
        .args(["dump", "--layer", "parks", "--output"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("parks"));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_zero_chunk_size_is_a_usage_error() {
    cmd().args(["dump", "--chunksize", "0"]).assert().code(2);
}

#[test]
fn test_malformed_param_is_a_usage_error() {
    cmd().args(["dump", "--param", "no-equals-sign"]).assert().code(2);
}

#[test]
fn test_validate_empty_folder() {
    let dir = TempDir::new().unwrap();
    let output = cmd()
        .args(["--output-format", "json", "validate", "--output"])
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["completed_chunks"], 0);
    assert_eq!(report["resume_offset"], 0);
}

#[test]
fn test_validate_reports_missing_chunk() {
    let dir = TempDir::new().unwrap();
    let paths = LayerPaths::new(dir.path(), "buildings");
    std::fs::write(paths.chunk_path(0), "{\"id\":0}\n{\"id\":1}\n").unwrap();
    std::fs::write(
        paths.registry_path(),
        format!(
            "{}\n{}\n",
            paths.chunk_path(0).display(),
            paths.chunk_path(1).display()
        ),
    )
    .unwrap();

    cmd()
        .args(["validate", "--output"])
        .arg(dir.path())
        .assert()
        .code(1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dump_command_end_to_end() {
    let server = MockServer::start().await;
    mock_small_layer(&server).await;

    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(dir.path(), &server);
    let out = dir.path().join("out");

    let output = cmd()
        .args(["--output-format", "json", "--catalog"])
        .arg(&catalog)
        .args(["dump", "--use-alt", "false", "--chunksize", "2", "--outfolderpath"])
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(summary["success"], true);
    assert_eq!(summary["features_written"], 5);
    assert_eq!(summary["chunks_committed"], 2);

    let paths = LayerPaths::new(&out, "buildings");
    assert_eq!(chunk_ids(&paths.chunk_path(2)), vec![4]);
    assert_eq!(registry_lines(&paths.registry_path()).len(), 2);
    assert!(paths.metadata_path().exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metadata_command_writes_document() {
    let server = MockServer::start().await;
    mock_small_layer(&server).await;

    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(dir.path(), &server);

    cmd()
        .arg("--catalog")
        .arg(&catalog)
        .args(["metadata", "--use-alt", "false", "--output"])
        .arg(dir.path())
        .assert()
        .success();

    let text = std::fs::read_to_string(dir.path().join("buildings_metadata.json")).unwrap();
    assert!(text.contains("    \"name\": \"Edificações\""));
}
