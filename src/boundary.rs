//! Boundary-resolution collaborator
//!
//! Maps region identifiers to geometry and precomputed area. `GeostoreClient`
//! talks to the geostore microservice; failures are never retried here.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};

/// What to ask the boundary service for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryLookup {
    Iso { iso: String },
    IsoAndId { iso: String, id1: String },
    IsoAndIds { iso: String, id1: String, id2: String },
    Use { kind: String, id: String },
    ProtectedArea { id: String },
    Hash { hash: String },
}

impl BoundaryLookup {
    /// Path relative to the geostore base URL
    pub fn path(&self) -> String {
        let seg = |s: &str| urlencoding::encode(s).into_owned();
        match self {
            BoundaryLookup::Iso { iso } => format!("/v2/geostore/admin/{}", seg(iso)),
            BoundaryLookup::IsoAndId { iso, id1 } => {
                format!("/v2/geostore/admin/{}/{}", seg(iso), seg(id1))
            }
            BoundaryLookup::IsoAndIds { iso, id1, id2 } => {
                format!("/v2/geostore/admin/{}/{}/{}", seg(iso), seg(id1), seg(id2))
            }
            BoundaryLookup::Use { kind, id } => format!("/v2/geostore/use/{}/{}", seg(kind), seg(id)),
            BoundaryLookup::ProtectedArea { id } => format!("/v2/geostore/wdpa/{}", seg(id)),
            BoundaryLookup::Hash { hash } => format!("/v2/geostore/{}", seg(hash)),
        }
    }
}

impl fmt::Display for BoundaryLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryLookup::Iso { iso } => write!(f, "country {}", iso),
            BoundaryLookup::IsoAndId { iso, id1 } => write!(f, "region {}/{}", iso, id1),
            BoundaryLookup::IsoAndIds { iso, id1, id2 } => write!(f, "region {}/{}/{}", iso, id1, id2),
            BoundaryLookup::Use { kind, id } => write!(f, "{} area {}", kind, id),
            BoundaryLookup::ProtectedArea { id } => write!(f, "protected area {}", id),
            BoundaryLookup::Hash { .. } => write!(f, "Geostore"),
        }
    }
}

/// Geometry and area for a resolved region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryRecord {
    pub area_ha: Option<f64>,
    pub geojson: Option<Value>,
}

#[async_trait]
pub trait BoundaryService: Send + Sync {
    /// Fails with `RegionNotFound` when the identifier is unknown
    async fn lookup(&self, lookup: &BoundaryLookup, api_key: Option<&str>) -> EngineResult<BoundaryRecord>;
}

#[derive(Debug, Deserialize)]
struct GeostoreEnvelope {
    data: GeostoreData,
}

#[derive(Debug, Deserialize)]
struct GeostoreData {
    attributes: GeostoreAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeostoreAttributes {
    #[serde(default)]
    area_ha: Option<f64>,
    #[serde(default)]
    geojson: Option<Value>,
}

/// Geostore microservice client
#[derive(Clone)]
pub struct GeostoreClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeostoreClient {
    pub fn new(base_url: &str, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Boundary(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> EngineResult<Self> {
        Self::new(&config.geostore_url, config.upstream_timeout)
    }
}

#[async_trait]
impl BoundaryService for GeostoreClient {
    async fn lookup(&self, lookup: &BoundaryLookup, api_key: Option<&str>) -> EngineResult<BoundaryRecord> {
        let url = format!("{}{}", self.base_url, lookup.path());
        tracing::debug!("Resolving {} via {}", lookup, url);

        let mut request = self.client.get(&url);
        if let Some(key) = api_key {
            request = request.header("x-api-key", key);
        }

        let resp = request.send().await.map_err(|e| {
            tracing::warn!("Boundary request for {} failed: {}", lookup, e);
            EngineError::Boundary(e.to_string())
        })?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                return Err(EngineError::RegionNotFound(format!("{} not found", lookup)));
            }
            status if !status.is_success() => {
                let text = resp.text().await.unwrap_or_default();
                return Err(EngineError::Boundary(format!("HTTP {}: {}", status.as_u16(), text)));
            }
            _ => {}
        }

        let envelope: GeostoreEnvelope = resp
            .json()
            .await
            .map_err(|e| EngineError::Boundary(format!("Malformed geostore response: {}", e)))?;

        Ok(BoundaryRecord {
            area_ha: envelope.data.attributes.area_ha,
            geojson: envelope.data.attributes.geojson,
        })
    }
}
