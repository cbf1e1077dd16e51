//! Query Template Engine
//!
//! One askama template per query kind, rendered against a shared
//! `QueryParams` bag. String values pass through the `sql` filter (quote
//! doubling); the land-use table name is validated before it gets here.
//!
//! Aggregation templates carry an `export` switch: the same joins and filters
//! with an `f.*` row projection and no area grouping. `to_export_form` renders
//! that variant for download links; the aggregation path never uses it.

use askama::Template;

use crate::error::EngineResult;
use crate::region::RegionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Country,
    Admin1,
    Admin2,
    LandUse,
    ProtectedArea,
    Geometry,
    Latest,
    /// Area-only lookups used while resolving regions
    LandUseArea,
    ProtectedAreaArea,
    GeometryArea,
}

impl TemplateKind {
    /// Aggregation template for a region kind (`None` for an unspecified region)
    pub fn for_region(region: &RegionDescriptor) -> Option<Self> {
        match region {
            RegionDescriptor::Country { .. } => Some(TemplateKind::Country),
            RegionDescriptor::Admin1 { .. } => Some(TemplateKind::Admin1),
            RegionDescriptor::Admin2 { .. } => Some(TemplateKind::Admin2),
            RegionDescriptor::LandUse { .. } => Some(TemplateKind::LandUse),
            RegionDescriptor::ProtectedArea { .. } => Some(TemplateKind::ProtectedArea),
            RegionDescriptor::Geostore { .. } | RegionDescriptor::CustomGeometry { .. } => {
                Some(TemplateKind::Geometry)
            }
            RegionDescriptor::Unspecified => None,
        }
    }

    /// Time-varying results must not be cached
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, TemplateKind::Latest)
    }
}

/// Substitution values; each template reads only the fields it names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub iso: String,
    pub id1: String,
    pub id2: String,
    pub simplify: f64,
    pub use_table: String,
    pub pid: u64,
    pub wdpaid: u64,
    pub geojson: String,
    pub begin: String,
    pub end: String,
    pub limit: u32,
}

mod filters {
    /// Double single quotes so the value stays inside its SQL literal
    pub fn sql<T: std::fmt::Display>(value: T) -> ::askama::Result<String> {
        Ok(value.to_string().replace('\'', "''"))
    }
}

#[derive(Template)]
#[template(
    source = "with r as (SELECT date, pais, sup, the_geom FROM gran_chaco_deforestation),
d as (SELECT ST_makevalid(ST_simplify(the_geom, {{ p.simplify }})) AS the_geom, iso, name_0, area_ha FROM gadm36_countries WHERE iso = UPPER('{{ p.iso|sql }}')),
f as (select * from r right join d on ST_intersects(r.the_geom, d.the_geom) AND date >= '{{ p.begin|sql }}'::date
AND date <= '{{ p.end|sql }}'::date)
SELECT {% if export %}f.*{% else %}sum(sup) AS value, MIN(date) as min_date, MAX(date) as max_date, area_ha{% endif %}
FROM f{% if !export %} GROUP BY area_ha{% endif %}",
    ext = "txt"
)]
struct CountryQuery<'a> {
    p: &'a QueryParams,
    export: bool,
}

#[derive(Template)]
#[template(
    source = "with r as (SELECT date, pais, sup, the_geom FROM gran_chaco_deforestation),
d as (SELECT ST_makevalid(ST_simplify(the_geom, {{ p.simplify }})) AS the_geom, name_1, iso, gid_1, name_0, area_ha FROM gadm36_adm1 WHERE iso = UPPER('{{ p.iso|sql }}') AND gid_1 = '{{ p.id1|sql }}'),
f as (select * from r right join d on ST_intersects(r.the_geom, d.the_geom) AND date >= '{{ p.begin|sql }}'::date
AND date <= '{{ p.end|sql }}'::date)
SELECT {% if export %}f.*{% else %}sum(sup) AS value, MIN(date) as min_date, MAX(date) as max_date, area_ha{% endif %}
FROM f{% if !export %} GROUP BY area_ha{% endif %}",
    ext = "txt"
)]
struct Admin1Query<'a> {
    p: &'a QueryParams,
    export: bool,
}

#[derive(Template)]
#[template(
    source = "with r as (SELECT date, pais, sup, the_geom FROM gran_chaco_deforestation),
d as (SELECT ST_makevalid(ST_simplify(the_geom, {{ p.simplify }})) AS the_geom, name_1, iso, gid_1, name_0, gid_2, name_2, area_ha FROM gadm36_adm2 WHERE iso = UPPER('{{ p.iso|sql }}') AND gid_1 = '{{ p.id1|sql }}' AND gid_2 = '{{ p.id2|sql }}'),
f as (select * from r right join d on ST_intersects(r.the_geom, d.the_geom) AND date >= '{{ p.begin|sql }}'::date
AND date <= '{{ p.end|sql }}'::date)
SELECT {% if export %}f.*{% else %}sum(sup) AS value, MIN(date) as min_date, MAX(date) as max_date, area_ha{% endif %}
FROM f{% if !export %} GROUP BY area_ha{% endif %}",
    ext = "txt"
)]
struct Admin2Query<'a> {
    p: &'a QueryParams,
    export: bool,
}

#[derive(Template)]
#[template(
    source = "SELECT {% if export %}f.*{% else %}sum(sup) AS value, MIN(date) as min_date, MAX(date) as max_date, area_ha{% endif %}
FROM {{ p.use_table }} u inner join gran_chaco_deforestation f
on ST_Intersects(f.the_geom, u.the_geom) AND date >= '{{ p.begin|sql }}'::date
AND date <= '{{ p.end|sql }}'::date
WHERE u.cartodb_id = {{ p.pid }}{% if !export %} GROUP BY area_ha{% endif %}",
    ext = "txt"
)]
struct LandUseQuery<'a> {
    p: &'a QueryParams,
    export: bool,
}

#[derive(Template)]
#[template(
    source = "WITH p as (SELECT CASE
    WHEN marine::numeric = 2 then null
    WHEN ST_NPoints(the_geom)<=18000 THEN the_geom
    WHEN ST_NPoints(the_geom) BETWEEN 18000 AND 50000 THEN ST_RemoveRepeatedPoints(the_geom, 0.001)
    ELSE ST_RemoveRepeatedPoints(the_geom, 0.005)
  END as the_geom, gis_area*100 as area_ha FROM wdpa_protected_areas where wdpaid={{ p.wdpaid }})
SELECT {% if export %}f.*{% else %}sum(sup) AS value, MIN(date) as min_date, MAX(date) as max_date, area_ha{% endif %}
FROM gran_chaco_deforestation f inner join p
ON ST_Intersects(f.the_geom, p.the_geom)
AND date >= '{{ p.begin|sql }}'::date
AND date <= '{{ p.end|sql }}'::date{% if !export %} GROUP BY area_ha{% endif %}",
    ext = "txt"
)]
struct ProtectedAreaQuery<'a> {
    p: &'a QueryParams,
    export: bool,
}

#[derive(Template)]
#[template(
    source = "SELECT {% if export %}f.*{% else %}sum(st_area(st_intersection(ST_SetSRID(ST_GeomFromGeoJSON('{{ p.geojson|sql }}'), 4326), f.the_geom), true)/10000) as value, MIN(date) as min_date, MAX(date) as max_date{% endif %}
FROM gran_chaco_deforestation f
WHERE date >= '{{ p.begin|sql }}'::date
  AND date <= '{{ p.end|sql }}'::date
  AND ST_INTERSECTS(ST_SetSRID(ST_GeomFromGeoJSON('{{ p.geojson|sql }}'), 4326), f.the_geom)",
    ext = "txt"
)]
struct GeometryQuery<'a> {
    p: &'a QueryParams,
    export: bool,
}

#[derive(Template)]
#[template(
    source = "SELECT DISTINCT date
FROM gran_chaco_deforestation
WHERE date IS NOT NULL
ORDER BY date DESC
LIMIT {{ p.limit }}",
    ext = "txt"
)]
struct LatestQuery<'a> {
    p: &'a QueryParams,
}

#[derive(Template)]
#[template(source = "select area_ha FROM {{ p.use_table }} WHERE cartodb_id = {{ p.pid }}", ext = "txt")]
struct LandUseAreaQuery<'a> {
    p: &'a QueryParams,
}

#[derive(Template)]
#[template(
    source = "select gis_area*100 as area_ha FROM wdpa_protected_areas WHERE wdpaid = {{ p.wdpaid }}",
    ext = "txt"
)]
struct ProtectedAreaAreaQuery<'a> {
    p: &'a QueryParams,
}

#[derive(Template)]
#[template(
    source = "select ST_Area(ST_SetSRID(ST_GeomFromGeoJSON('{{ p.geojson|sql }}'), 4326), TRUE)/10000 as area_ha",
    ext = "txt"
)]
struct GeometryAreaQuery<'a> {
    p: &'a QueryParams,
}

/// Render the query for `kind`
pub fn render(kind: TemplateKind, params: &QueryParams) -> EngineResult<String> {
    render_form(kind, params, false)
}

/// Render the raw-row variant of an aggregation query. Lookup kinds have no
/// aggregate projection and render as usual.
pub fn to_export_form(kind: TemplateKind, params: &QueryParams) -> EngineResult<String> {
    render_form(kind, params, true)
}

fn render_form(kind: TemplateKind, params: &QueryParams, export: bool) -> EngineResult<String> {
    let p = params;
    let sql = match kind {
        TemplateKind::Country => CountryQuery { p, export }.render()?,
        TemplateKind::Admin1 => Admin1Query { p, export }.render()?,
        TemplateKind::Admin2 => Admin2Query { p, export }.render()?,
        TemplateKind::LandUse => LandUseQuery { p, export }.render()?,
        TemplateKind::ProtectedArea => ProtectedAreaQuery { p, export }.render()?,
        TemplateKind::Geometry => GeometryQuery { p, export }.render()?,
        TemplateKind::Latest => LatestQuery { p }.render()?,
        TemplateKind::LandUseArea => LandUseAreaQuery { p }.render()?,
        TemplateKind::ProtectedAreaArea => ProtectedAreaAreaQuery { p }.render()?,
        TemplateKind::GeometryArea => GeometryAreaQuery { p }.render()?,
    };
    Ok(sql)
}
