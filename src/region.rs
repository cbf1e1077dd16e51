//! Region Resolver
//!
//! A `RegionDescriptor` names what area to compute statistics for. Resolving
//! it yields a `GeometryReference`: the area in hectares (always), plus the
//! geometry for custom shapes and the simplification tolerance for
//! administrative boundaries.
//!
//! Only resolution produces "not found". Everything downstream treats a
//! resolved region as existing, even when no loss rows match.

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::boundary::{BoundaryLookup, BoundaryRecord, BoundaryService};
use crate::error::{EngineError, EngineResult};
use crate::store::{row_f64, SqlStore};
use crate::templates::{self, QueryParams, TemplateKind};

/// Default tolerance (degrees) for `ST_simplify`
pub const BASE_SIMPLIFY: f64 = 0.005;
/// Tolerance for the countries in `LARGE_COUNTRIES`
pub const LARGE_COUNTRY_SIMPLIFY: f64 = 0.05;
pub const LARGE_COUNTRIES: [&str; 6] = ["USA", "RUS", "CAN", "CHN", "BRA", "IDN"];

/// Named land-use categories and their store tables
const USE_TABLES: [(&str, &str); 4] = [
    ("mining", "gfw_mining"),
    ("oilpalm", "gfw_oil_palm"),
    ("fiber", "gfw_wood_fiber"),
    ("logging", "gfw_logging"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum RegionDescriptor {
    Country { iso: String },
    Admin1 { iso: String, id1: String },
    Admin2 { iso: String, id1: String, id2: String },
    LandUse { kind: String, row_id: u64 },
    ProtectedArea { id: u64 },
    /// Previously registered geometry, by geostore hash
    Geostore { hash: String },
    CustomGeometry { geojson: Value },
    Unspecified,
}

impl RegionDescriptor {
    pub fn country(iso: &str) -> Self {
        RegionDescriptor::Country { iso: normalize_iso(iso) }
    }

    pub fn admin1(iso: &str, id1: &str) -> Self {
        RegionDescriptor::Admin1 {
            iso: normalize_iso(iso),
            id1: id1.trim().to_string(),
        }
    }

    pub fn admin2(iso: &str, id1: &str, id2: &str) -> Self {
        RegionDescriptor::Admin2 {
            iso: normalize_iso(iso),
            id1: id1.trim().to_string(),
            id2: id2.trim().to_string(),
        }
    }

    /// Row ids are store primary keys; anything non-numeric names no region
    pub fn land_use(kind: &str, row_id: &str) -> EngineResult<Self> {
        Ok(RegionDescriptor::LandUse {
            kind: kind.trim().to_string(),
            row_id: parse_id(row_id)?,
        })
    }

    pub fn protected_area(id: &str) -> EngineResult<Self> {
        Ok(RegionDescriptor::ProtectedArea { id: parse_id(id)? })
    }

    pub fn geostore(hash: Option<&str>) -> Self {
        match hash.map(str::trim).filter(|h| !h.is_empty()) {
            Some(hash) => RegionDescriptor::Geostore { hash: hash.to_string() },
            None => RegionDescriptor::Unspecified,
        }
    }

    pub fn custom_geometry(geojson: Option<Value>) -> Self {
        match geojson {
            Some(Value::Null) | None => RegionDescriptor::Unspecified,
            Some(geojson) => RegionDescriptor::CustomGeometry { geojson },
        }
    }

    /// Identifier reported back with the statistics
    pub fn region_id(&self) -> Option<String> {
        match self {
            RegionDescriptor::Country { iso } => Some(iso.clone()),
            RegionDescriptor::Admin1 { iso, id1 } => Some(admin1_gid(iso, id1)),
            RegionDescriptor::Admin2 { iso, id1, id2 } => Some(admin2_gid(iso, id1, id2)),
            RegionDescriptor::LandUse { row_id, .. } => Some(row_id.to_string()),
            RegionDescriptor::ProtectedArea { id } => Some(id.to_string()),
            RegionDescriptor::Geostore { hash } => Some(hash.clone()),
            RegionDescriptor::CustomGeometry { .. } | RegionDescriptor::Unspecified => None,
        }
    }
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionDescriptor::Country { iso } => write!(f, "country {}", iso),
            RegionDescriptor::Admin1 { iso, id1 } => write!(f, "admin1 {}/{}", iso, id1),
            RegionDescriptor::Admin2 { iso, id1, id2 } => write!(f, "admin2 {}/{}/{}", iso, id1, id2),
            RegionDescriptor::LandUse { kind, row_id } => write!(f, "use {}/{}", kind, row_id),
            RegionDescriptor::ProtectedArea { id } => write!(f, "wdpa {}", id),
            RegionDescriptor::Geostore { hash } => write!(f, "geostore {}", hash),
            RegionDescriptor::CustomGeometry { .. } => write!(f, "custom geometry"),
            RegionDescriptor::Unspecified => write!(f, "unspecified region"),
        }
    }
}

/// Resolved region
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryReference {
    /// Geometry spliced into geometry templates (custom shapes only)
    pub geometry: Option<Value>,
    pub area_ha: f64,
    /// Only for administrative boundaries
    pub simplify: Option<f64>,
    /// Store table holding land-use polygons
    pub table: Option<String>,
}

/// How land-use and protected-area regions are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Ask the boundary service
    #[default]
    Boundary,
    /// Read the area straight from the store by id, boundary service as fallback
    Direct,
}

impl FromStr for ResolutionMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boundary" => Ok(ResolutionMode::Boundary),
            "direct" => Ok(ResolutionMode::Direct),
            other => Err(EngineError::InvalidInput(format!(
                "Unknown region resolution mode '{}'",
                other
            ))),
        }
    }
}

/// Simplification tolerance for a country's boundary
pub fn simplify_tolerance(iso: &str) -> f64 {
    if LARGE_COUNTRIES.contains(&iso) {
        LARGE_COUNTRY_SIMPLIFY
    } else {
        BASE_SIMPLIFY
    }
}

/// GADM id of a first-level unit: `BRA` + `1` -> `BRA.1_1`
pub fn admin1_gid(iso: &str, id1: &str) -> String {
    format!("{}.{}_1", iso, id1)
}

/// GADM-style id of a second-level unit: `BRA.1_1` + `2` -> `BRA.1_1.2_1`
pub fn admin2_gid(iso: &str, id1: &str, id2: &str) -> String {
    format!("{}.{}_1", admin1_gid(iso, id1), id2)
}

/// Map a land-use kind to its store table.
///
/// Unlisted kinds are used verbatim as the table name, but only when they are
/// plain SQL identifiers.
pub fn use_table(kind: &str) -> EngineResult<String> {
    if let Some((_, table)) = USE_TABLES.iter().find(|(name, _)| *name == kind) {
        return Ok(table.to_string());
    }
    if is_sql_identifier(kind) {
        Ok(kind.to_string())
    } else {
        Err(EngineError::RegionNotFound("Name not found".to_string()))
    }
}

/// Wrap a bare Polygon or Feature into a FeatureCollection; anything else
/// passes through unchanged.
pub fn normalize_geojson(geojson: Value) -> Value {
    let kind = geojson
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);

    match kind.as_deref() {
        Some("polygon") => json!({
            "type": "FeatureCollection",
            "features": [{ "type": "Feature", "geometry": geojson }]
        }),
        Some("feature") => json!({
            "type": "FeatureCollection",
            "features": [geojson]
        }),
        _ => geojson,
    }
}

/// Geometry of the first feature of a normalized collection
pub fn primary_geometry(collection: &Value) -> EngineResult<&Value> {
    collection
        .get("features")
        .and_then(Value::as_array)
        .and_then(|features| features.first())
        .and_then(|feature| feature.get("geometry"))
        .filter(|geometry| geometry.is_object())
        .ok_or_else(|| EngineError::InvalidGeometry("expected a Polygon, Feature or FeatureCollection with at least one feature".to_string()))
}

pub struct RegionResolver {
    boundary: Arc<dyn BoundaryService>,
    store: Arc<dyn SqlStore>,
    mode: ResolutionMode,
}

impl RegionResolver {
    pub fn new(boundary: Arc<dyn BoundaryService>, store: Arc<dyn SqlStore>, mode: ResolutionMode) -> Self {
        Self { boundary, store, mode }
    }

    pub async fn resolve(&self, region: &RegionDescriptor, api_key: Option<&str>) -> EngineResult<GeometryReference> {
        match region {
            RegionDescriptor::Country { iso } => {
                let lookup = BoundaryLookup::Iso { iso: iso.clone() };
                let area_ha = self.boundary_area(&lookup, api_key).await?;
                Ok(admin_reference(area_ha, simplify_tolerance(iso)))
            }
            RegionDescriptor::Admin1 { iso, id1 } => {
                let lookup = BoundaryLookup::IsoAndId { iso: iso.clone(), id1: id1.clone() };
                let area_ha = self.boundary_area(&lookup, api_key).await?;
                Ok(admin_reference(area_ha, simplify_tolerance(iso) / 10.0))
            }
            RegionDescriptor::Admin2 { iso, id1, id2 } => {
                let lookup = BoundaryLookup::IsoAndIds {
                    iso: iso.clone(),
                    id1: id1.clone(),
                    id2: id2.clone(),
                };
                let area_ha = self.boundary_area(&lookup, api_key).await?;
                Ok(admin_reference(area_ha, simplify_tolerance(iso) / 100.0))
            }
            RegionDescriptor::LandUse { kind, row_id } => {
                let table = use_table(kind)?;
                let params = QueryParams {
                    use_table: table.clone(),
                    pid: *row_id,
                    ..Default::default()
                };
                let lookup = BoundaryLookup::Use { kind: kind.clone(), id: row_id.to_string() };
                let area_ha = self
                    .id_area(TemplateKind::LandUseArea, &params, &lookup, api_key)
                    .await?;
                Ok(GeometryReference {
                    geometry: None,
                    area_ha,
                    simplify: None,
                    table: Some(table),
                })
            }
            RegionDescriptor::ProtectedArea { id } => {
                let params = QueryParams { wdpaid: *id, ..Default::default() };
                let lookup = BoundaryLookup::ProtectedArea { id: id.to_string() };
                let area_ha = self
                    .id_area(TemplateKind::ProtectedAreaArea, &params, &lookup, api_key)
                    .await?;
                Ok(GeometryReference {
                    geometry: None,
                    area_ha,
                    simplify: None,
                    table: None,
                })
            }
            RegionDescriptor::Geostore { hash } => {
                let lookup = BoundaryLookup::Hash { hash: hash.clone() };
                let record = self.boundary.lookup(&lookup, api_key).await?;
                let geojson = record
                    .geojson
                    .ok_or_else(|| EngineError::RegionNotFound("Geostore not found".to_string()))?;
                let geometry = primary_geometry(&normalize_geojson(geojson))?.clone();
                let area_ha = match record.area_ha {
                    Some(area) => area,
                    None => self.geometry_area(&geometry).await?,
                };
                Ok(geometry_reference(geometry, area_ha))
            }
            RegionDescriptor::CustomGeometry { geojson } => {
                let geometry = primary_geometry(&normalize_geojson(geojson.clone()))?.clone();
                let area_ha = self.geometry_area(&geometry).await?;
                Ok(geometry_reference(geometry, area_ha))
            }
            RegionDescriptor::Unspecified => {
                Err(EngineError::InvalidInput("GeoJSON param required".to_string()))
            }
        }
    }

    async fn boundary_area(&self, lookup: &BoundaryLookup, api_key: Option<&str>) -> EngineResult<f64> {
        let record = self.boundary.lookup(lookup, api_key).await?;
        self.record_area(lookup, record).await
    }

    /// Area from the record, else computed from its geometry
    async fn record_area(&self, lookup: &BoundaryLookup, record: BoundaryRecord) -> EngineResult<f64> {
        if let Some(area) = record.area_ha {
            return Ok(area);
        }
        match record.geojson {
            Some(geojson) => {
                let geometry = primary_geometry(&normalize_geojson(geojson))
                    .map_err(|_| EngineError::Boundary(format!("{} has an unreadable geometry", lookup)))?
                    .clone();
                self.geometry_area(&geometry).await
            }
            None => Err(EngineError::Boundary(format!("{} has neither area nor geometry", lookup))),
        }
    }

    /// Land-use / protected-area area, by id in the store or via the boundary service
    async fn id_area(
        &self,
        kind: TemplateKind,
        params: &QueryParams,
        lookup: &BoundaryLookup,
        api_key: Option<&str>,
    ) -> EngineResult<f64> {
        if self.mode == ResolutionMode::Direct {
            if let Some(area) = self.store_area(kind, params).await? {
                return Ok(area);
            }
            tracing::debug!("No store area for {}, asking boundary service", lookup);
        }
        self.boundary_area(lookup, api_key).await
    }

    async fn geometry_area(&self, geometry: &Value) -> EngineResult<f64> {
        let params = QueryParams {
            geojson: geometry.to_string(),
            ..Default::default()
        };
        self.store_area(TemplateKind::GeometryArea, &params)
            .await?
            .ok_or_else(|| EngineError::Store("Area query returned no rows".to_string()))
    }

    async fn store_area(&self, kind: TemplateKind, params: &QueryParams) -> EngineResult<Option<f64>> {
        let sql = templates::render(kind, params)?;
        tracing::debug!("{}", sql);
        let rows = self.store.execute(&sql).await?;
        Ok(rows.first().and_then(|row| row_f64(row, "area_ha")))
    }
}

fn admin_reference(area_ha: f64, simplify: f64) -> GeometryReference {
    GeometryReference {
        geometry: None,
        area_ha,
        simplify: Some(simplify),
        table: None,
    }
}

fn geometry_reference(geometry: Value, area_ha: f64) -> GeometryReference {
    GeometryReference {
        geometry: Some(geometry),
        area_ha,
        simplify: None,
        table: None,
    }
}

fn normalize_iso(iso: &str) -> String {
    iso.trim().to_ascii_uppercase()
}

fn parse_id(raw: &str) -> EngineResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| EngineError::RegionNotFound(format!("Region id '{}' not found", raw)))
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
