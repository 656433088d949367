//! Deterministic file naming for a layer dump
//!
//! Every file of a dump lives directly in the output folder and is prefixed
//! by the layer name:
//!
//! ```text
//! outputs/buildings/
//! ├── buildings_chunk_0.geojsonl
//! ├── buildings_chunk_1.geojsonl
//! ├── buildings_downloaded_registry.txt
//! ├── buildings_metadata.json
//! └── buildings_dump.lock
//! ```

use std::path::{Path, PathBuf};

/// Extension of chunk files
pub const CHUNK_EXTENSION: &str = "geojsonl";

/// Names of the files produced by dumping one layer into one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPaths {
    folder: PathBuf,
    layer: String,
}

impl LayerPaths {
    /// Paths for `layer` inside `folder`
    pub fn new(folder: impl Into<PathBuf>, layer: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            layer: layer.into(),
        }
    }

    /// Output folder
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Layer name
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Chunk file number `index`
    pub fn chunk_path(&self, index: u64) -> PathBuf {
        self.folder
            .join(format!("{}_chunk_{index}.{CHUNK_EXTENSION}", self.layer))
    }

    /// Resume registry
    pub fn registry_path(&self) -> PathBuf {
        self.folder
            .join(format!("{}_downloaded_registry.txt", self.layer))
    }

    /// Layer metadata document
    pub fn metadata_path(&self) -> PathBuf {
        self.folder.join(format!("{}_metadata.json", self.layer))
    }

    /// Advisory lock file
    pub fn lock_path(&self) -> PathBuf {
        self.folder.join(format!("{}_dump.lock", self.layer))
    }

    /// Chunk index encoded in `file_name`, if it names one of this layer's chunks
    ///
    /// Only exact `{layer}_chunk_<n>.geojsonl` names match, so a layer called
    /// `roads` never claims the chunks of `roads_alt`.
    pub fn chunk_index(&self, file_name: &str) -> Option<u64> {
        let rest = file_name.strip_prefix(self.layer.as_str())?;
        let digits = rest
            .strip_prefix("_chunk_")?
            .strip_suffix(CHUNK_EXTENSION)?
            .strip_suffix('.')?;

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// Sibling metadata path of a snapshot file (`out/x.geojson` → `out/x_metadata.json`)
pub fn snapshot_metadata_path(snapshot: &Path) -> PathBuf {
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    snapshot.with_file_name(format!("{stem}_metadata.json"))
}
