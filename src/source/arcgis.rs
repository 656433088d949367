//! ArcGIS REST map-server adapter
//!
//! Reads a single map-server layer (`.../MapServer/<id>`):
//! - Metadata: `GET <layer>?f=json`
//! - Total count: `GET <layer>/query?where=1=1&returnCountOnly=true&f=json`
//! - Features: `GET <layer>/query?...&f=geojson&resultOffset=..&resultRecordCount=..`
//!
//! Pages are requested ordered by the layer's object-id field when the
//! metadata names one, which is what makes offset-based resume meaningful.

use futures_util::{stream, StreamExt};
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::http::MapServerHttpClient;
use super::pagination::OffsetPager;
use super::{FeatureSource, FeatureStream, OpenedSource, SourceError, SourceRequest, SourceResult};
use crate::FeatureRecord;
use async_trait::async_trait;

/// Field type ArcGIS uses for object ids
const OID_FIELD_TYPE: &str = "esriFieldTypeOID";

/// Feature source backed by one ArcGIS map-server layer
pub struct ArcGisSource {
    layer_url: Url,
    query_url: Url,
    http: MapServerHttpClient,
    timeout: Option<Duration>,
    order_field: OnceCell<Option<String>>,
}

impl ArcGisSource {
    /// Create a source for the layer at `layer_url`
    ///
    /// `timeout` applies to the metadata and count requests; page requests use
    /// the timeout of each [`SourceRequest`].
    pub fn new(layer_url: Url, timeout: Option<Duration>) -> SourceResult<Self> {
        Ok(Self {
            query_url: query_url(&layer_url)?,
            layer_url,
            http: MapServerHttpClient::new()?,
            timeout,
            order_field: OnceCell::new(),
        })
    }

    /// The layer endpoint
    pub fn layer_url(&self) -> &Url {
        &self.layer_url
    }

    /// Ask the service how many features match the query
    pub async fn feature_count(
        &self,
        extra_params: &[(String, String)],
        timeout: Option<Duration>,
    ) -> SourceResult<u64> {
        let params = merge_params(
            vec![
                ("where".to_string(), "1=1".to_string()),
                ("returnCountOnly".to_string(), "true".to_string()),
                ("f".to_string(), "json".to_string()),
            ],
            extra_params,
        );

        let value = self.http.get_json(&self.query_url, &params, timeout).await?;
        value
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SourceError::InvalidResponse(format!("count missing from {value}")))
    }

    /// Object-id field used to order pages, resolved once from the metadata
    async fn order_field(&self) -> SourceResult<Option<String>> {
        let field = self
            .order_field
            .get_or_try_init(|| async {
                let metadata = self.metadata().await?;
                if !supports_pagination(&metadata) {
                    warn!(
                        layer = %self.layer_url,
                        "Layer does not advertise pagination support; offsets may be ignored"
                    );
                }
                Ok::<_, SourceError>(object_id_field(&metadata))
            })
            .await?;
        Ok(field.clone())
    }
}

#[async_trait]
impl FeatureSource for ArcGisSource {
    async fn open(&self, request: &SourceRequest) -> SourceResult<OpenedSource> {
        let total = match self.feature_count(&request.extra_params, request.timeout).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "Feature count unavailable, continuing without total");
                None
            }
        };

        let mut base = vec![
            ("where".to_string(), "1=1".to_string()),
            ("outFields".to_string(), "*".to_string()),
            ("returnGeometry".to_string(), "true".to_string()),
            ("f".to_string(), "geojson".to_string()),
        ];
        if let Some(field) = self.order_field().await? {
            base.push(("orderByFields".to_string(), field));
        }
        let params = merge_params(base, &request.extra_params);

        info!(
            layer = %self.layer_url,
            start_offset = request.start_offset,
            page_size = request.page_size,
            total = ?total,
            "Opening layer query"
        );

        let context = Arc::new(PageContext {
            http: self.http.clone(),
            query_url: self.query_url.clone(),
            params,
            timeout: request.timeout,
        });

        Ok(OpenedSource {
            features: feature_stream(context, OffsetPager::new(request.start_offset, request.page_size)),
            total,
        })
    }

    async fn metadata(&self) -> SourceResult<Value> {
        self.http
            .get_json(&self.layer_url, &[("f".to_string(), "json".to_string())], self.timeout)
            .await
    }

    fn describe(&self) -> String {
        self.layer_url.to_string()
    }
}

/// Everything a page fetch needs, shared by every step of the stream
struct PageContext {
    http: MapServerHttpClient,
    query_url: Url,
    params: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl PageContext {
    async fn fetch_page(&self, pager: &OffsetPager) -> SourceResult<(Vec<FeatureRecord>, Option<bool>)> {
        let mut params = self.params.clone();
        params.extend(pager.page_params()?);

        debug!(offset = pager.next_offset(), "Fetching page");
        let value = self.http.get_json(&self.query_url, &params, self.timeout).await?;
        parse_page(value)
    }
}

/// Lazily page through the layer, one request per consumed page
fn feature_stream(context: Arc<PageContext>, pager: OffsetPager) -> FeatureStream {
    let stream = stream::unfold(pager, move |mut pager| {
        let context = context.clone();

        async move {
            if pager.is_done() {
                return None;
            }

            match context.fetch_page(&pager).await {
                Ok((features, exceeded)) => {
                    pager.advance(features.len(), exceeded);
                    let items: Vec<SourceResult<FeatureRecord>> =
                        features.into_iter().map(Ok).collect();
                    Some((stream::iter(items), pager))
                }
                Err(e) => {
                    pager.finish();
                    Some((stream::iter(vec![Err(e)]), pager))
                }
            }
        }
    })
    .flatten();

    Box::pin(stream)
}

/// Split a GeoJSON query response into records and the "more available" flag
pub fn parse_page(value: Value) -> SourceResult<(Vec<FeatureRecord>, Option<bool>)> {
    let exceeded = value
        .get("exceededTransferLimit")
        .or_else(|| value.get("properties").and_then(|p| p.get("exceededTransferLimit")))
        .and_then(Value::as_bool);

    let features = match value {
        Value::Object(mut map) => match map.remove("features") {
            Some(Value::Array(features)) => features,
            _ => {
                return Err(SourceError::MalformedBody(
                    "query response has no features array".to_string(),
                ))
            }
        },
        other => {
            return Err(SourceError::MalformedBody(format!(
                "query response is not an object: {other}"
            )))
        }
    };

    Ok((features.into_iter().map(FeatureRecord::new).collect(), exceeded))
}

/// Name of the object-id field declared by layer metadata
pub fn object_id_field(metadata: &Value) -> Option<String> {
    if let Some(field) = metadata.get("objectIdField").and_then(Value::as_str) {
        return Some(field.to_string());
    }

    metadata
        .get("fields")
        .and_then(Value::as_array)?
        .iter()
        .find(|f| f.get("type").and_then(Value::as_str) == Some(OID_FIELD_TYPE))
        .and_then(|f| f.get("name").and_then(Value::as_str))
        .map(str::to_string)
}

fn supports_pagination(metadata: &Value) -> bool {
    metadata
        .get("advancedQueryCapabilities")
        .and_then(|c| c.get("supportsPagination"))
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Overlay user-supplied parameters on the defaults, replacing equal keys
pub fn merge_params(
    mut base: Vec<(String, String)>,
    extra: &[(String, String)],
) -> Vec<(String, String)> {
    for (key, value) in extra {
        match base.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => base.push((key.clone(), value.clone())),
        }
    }
    base
}

fn query_url(layer_url: &Url) -> SourceResult<Url> {
    let mut url = layer_url.clone();
    url.path_segments_mut()
        .map_err(|_| SourceError::InvalidUrl(format!("{layer_url} cannot be a base URL")))?
        .pop_if_empty()
        .push("query");
    Ok(url)
}
