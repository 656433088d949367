//! Layer catalog for the supported map servers
//!
//! Maps human layer names (e.g. `buildings`) to the numeric layer ids exposed
//! by the primary and alternate ArcGIS map servers. Layer ids are kept as
//! strings since ids like `"01"` occur and must survive verbatim.

use once_cell::sync::Lazy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Embedded catalog data
const CATALOG_JSON: &str = include_str!("layers.json");

/// Global catalog instance (loaded once)
static CATALOG: Lazy<Result<LayerCatalog, CatalogError>> =
    Lazy::new(|| LayerCatalog::from_json(CATALOG_JSON));

/// Catalog of known layers and the map servers that publish them
#[derive(Debug, Clone)]
pub struct LayerCatalog {
    schema_version: String,
    map_servers: MapServers,
    layers: BTreeMap<String, LayerEntry>,
}

impl LayerCatalog {
    /// Load the embedded catalog
    ///
    /// This is a singleton operation - the catalog is parsed once and cached.
    pub fn load() -> Result<&'static Self, &'static CatalogError> {
        CATALOG.as_ref()
    }

    /// Load the embedded catalog, returning an owned copy
    pub fn load_embedded() -> Result<Self, CatalogError> {
        Self::from_json(CATALOG_JSON)
    }

    /// Load a catalog from a JSON file on disk
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::ParseError(format!("Failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Parse a catalog from a JSON string
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_str(json)
            .map_err(|e| CatalogError::ParseError(format!("Failed to parse catalog: {e}")))?;

        let mut layers = BTreeMap::new();
        for entry in raw.layers {
            if entry.layer_id.trim().is_empty() {
                return Err(CatalogError::ParseError(format!(
                    "Layer {} has an empty layer_id",
                    entry.name
                )));
            }
            layers.insert(entry.name.clone(), entry);
        }

        Ok(Self {
            schema_version: raw.schema_version,
            map_servers: raw.map_servers,
            layers,
        })
    }

    /// Version of the catalog file format
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// All catalog entries, ordered by layer name
    pub fn entries(&self) -> impl Iterator<Item = &LayerEntry> {
        self.layers.values()
    }

    /// Look up a layer by name
    pub fn get(&self, layer: &str) -> Option<&LayerEntry> {
        self.layers.get(layer)
    }

    /// The primary and alternate map-server base URLs
    pub fn map_servers(&self) -> &MapServers {
        &self.map_servers
    }

    /// Resolve the REST endpoint of a layer
    ///
    /// The alternate source uses the alternate map server together with the
    /// layer's alternate id.
    pub fn layer_url(&self, layer: &str, use_alt: bool) -> Result<Url, CatalogError> {
        let entry = self
            .get(layer)
            .ok_or_else(|| CatalogError::UnknownLayer(layer.to_string()))?;

        let (base, layer_id) = if use_alt {
            let alt_id = entry
                .alt_layer_id
                .as_deref()
                .ok_or_else(|| CatalogError::NoAlternate(layer.to_string()))?;
            (self.map_servers.alternate.as_str(), alt_id)
        } else {
            (self.map_servers.primary.as_str(), entry.layer_id.as_str())
        };

        join_layer_url(base, layer_id)
    }
}

/// Join a map-server base URL and a layer id
///
/// The base is treated as a directory: a missing trailing `/` is added so the
/// layer id is appended rather than replacing the last path segment.
pub fn join_layer_url(base: &str, layer_id: &str) -> Result<Url, CatalogError> {
    let mut base = base.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }

    let base = Url::parse(&base)
        .map_err(|e| CatalogError::InvalidUrl(format!("{base}: {e}")))?;
    base.join(layer_id)
        .map_err(|e| CatalogError::InvalidUrl(format!("{base} + {layer_id}: {e}")))
}

/// Base URLs of the map servers in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapServers {
    /// Map server used by default
    pub primary: String,
    /// Map server selected by `use_alt`
    pub alternate: String,
}

/// A single layer in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerEntry {
    name: String,
    layer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alt_layer_id: Option<String>,
    #[serde(default)]
    description: String,
}

impl LayerEntry {
    /// Layer name used on the command line and in output file names
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer id on the primary map server
    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    /// Layer id on the alternate map server, if published there
    pub fn alt_layer_id(&self) -> Option<&str> {
        self.alt_layer_id.as_deref()
    }

    /// Free-form description
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Raw catalog structure for deserialization
#[derive(Debug, Deserialize)]
struct RawCatalog {
    schema_version: String,
    map_servers: MapServers,
    layers: Vec<LayerEntry>,
}

/// Errors that can occur when resolving layers
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Failed to parse catalog JSON
    #[error("catalog parse error: {0}")]
    ParseError(String),

    /// Layer not present in the catalog
    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    /// Layer has no id on the alternate map server
    #[error("layer {0} has no alternate layer id")]
    NoAlternate(String),

    /// URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
