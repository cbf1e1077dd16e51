//! Statistics Aggregator
//!
//! One pass per request: resolve the region, render and run its aggregation
//! query, then merge the first row with the resolved area, the period label
//! and the export links.
//!
//! A resolved region with no matching loss rows is a result (`value: 0`),
//! never an error.

use std::sync::Arc;

use crate::boundary::BoundaryService;
use crate::error::{EngineError, EngineResult};
use crate::export::{build_download_urls, DownloadUrls};
use crate::period::{DefaultWindow, Period};
use crate::region::{admin1_gid, admin2_gid, GeometryReference, RegionDescriptor, RegionResolver, ResolutionMode};
use crate::store::{row_f64, row_string, SqlStore};
use crate::templates::{self, QueryParams, TemplateKind};

pub const DEFAULT_LATEST_LIMIT: u32 = 3;
pub const MAX_LATEST_LIMIT: u32 = 100;

/// Loss statistics for one region and period
#[derive(Debug, Clone, PartialEq)]
pub struct StatsResult {
    /// Region identifier (`None` for posted geometries)
    pub id: Option<String>,
    /// Loss area; 0 when nothing matched
    pub value: f64,
    pub min_date: Option<String>,
    pub max_date: Option<String>,
    pub area_ha: f64,
    pub period_label: &'static str,
    pub download_urls: DownloadUrls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestDate {
    pub date: String,
}

pub struct StatsEngine {
    store: Arc<dyn SqlStore>,
    resolver: RegionResolver,
    default_window: DefaultWindow,
}

impl StatsEngine {
    pub fn new(
        store: Arc<dyn SqlStore>,
        boundary: Arc<dyn BoundaryService>,
        mode: ResolutionMode,
        default_window: DefaultWindow,
    ) -> Self {
        Self {
            resolver: RegionResolver::new(boundary, store.clone(), mode),
            store,
            default_window,
        }
    }

    /// Aggregate loss for `region` over the raw `period` parameter
    pub async fn aggregate(
        &self,
        region: &RegionDescriptor,
        period: Option<&str>,
        api_key: Option<&str>,
    ) -> EngineResult<StatsResult> {
        let period = Period::parse(period, self.default_window)?;
        self.aggregate_period(region, &period, api_key).await
    }

    pub async fn aggregate_period(
        &self,
        region: &RegionDescriptor,
        period: &Period,
        api_key: Option<&str>,
    ) -> EngineResult<StatsResult> {
        let kind = TemplateKind::for_region(region)
            .ok_or_else(|| EngineError::InvalidInput("GeoJSON param required".to_string()))?;
        let reference = self.resolver.resolve(region, api_key).await?;
        let params = query_params(region, &reference, period);

        let sql = templates::render(kind, &params)?;
        tracing::debug!("{}", sql);
        let rows = self.store.execute(&sql).await?;

        let download_urls = build_download_urls(self.store.download_endpoint(), kind, &params)?;

        let mut result = StatsResult {
            id: region.region_id(),
            value: 0.0,
            min_date: None,
            max_date: None,
            area_ha: reference.area_ha,
            period_label: period.label,
            download_urls,
        };

        match rows.first() {
            Some(row) => {
                result.value = row_f64(row, "value").unwrap_or(0.0);
                result.min_date = row_string(row, "min_date");
                result.max_date = row_string(row, "max_date");
                if let Some(area) = row_f64(row, "area_ha") {
                    result.area_ha = area;
                }
            }
            None => tracing::debug!("No loss rows for {}", region),
        }

        Ok(result)
    }

    /// Most recent distinct observation dates, newest first
    pub async fn latest(&self, limit: Option<&str>) -> EngineResult<Vec<LatestDate>> {
        let params = QueryParams {
            limit: parse_limit(limit)?,
            ..Default::default()
        };
        let sql = templates::render(TemplateKind::Latest, &params)?;
        tracing::debug!("{}", sql);

        let rows = self.store.execute(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row_string(row, "date"))
            .map(|date| LatestDate { date })
            .collect())
    }
}

fn query_params(region: &RegionDescriptor, reference: &GeometryReference, period: &Period) -> QueryParams {
    let mut params = QueryParams {
        simplify: reference.simplify.unwrap_or_default(),
        geojson: reference
            .geometry
            .as_ref()
            .map(|geometry| geometry.to_string())
            .unwrap_or_default(),
        use_table: reference.table.clone().unwrap_or_default(),
        begin: period.begin_str(),
        end: period.end_str(),
        ..Default::default()
    };

    match region {
        RegionDescriptor::Country { iso } => params.iso = iso.clone(),
        RegionDescriptor::Admin1 { iso, id1 } => {
            params.iso = iso.clone();
            params.id1 = admin1_gid(iso, id1);
        }
        RegionDescriptor::Admin2 { iso, id1, id2 } => {
            params.iso = iso.clone();
            params.id1 = admin1_gid(iso, id1);
            params.id2 = admin2_gid(iso, id1, id2);
        }
        RegionDescriptor::LandUse { row_id, .. } => params.pid = *row_id,
        RegionDescriptor::ProtectedArea { id } => params.wdpaid = *id,
        RegionDescriptor::Geostore { .. }
        | RegionDescriptor::CustomGeometry { .. }
        | RegionDescriptor::Unspecified => {}
    }
    params
}

fn parse_limit(raw: Option<&str>) -> EngineResult<u32> {
    let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => return Ok(DEFAULT_LATEST_LIMIT),
    };
    match raw.parse::<u32>() {
        Ok(limit) if (1..=MAX_LATEST_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(EngineError::InvalidInput(format!(
            "Invalid limit '{}': expected an integer between 1 and {}",
            raw, MAX_LATEST_LIMIT
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{BoundaryLookup, BoundaryRecord};
    use crate::store::Row;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct FixedBoundary {
        area_ha: f64,
        lookups: Mutex<Vec<BoundaryLookup>>,
    }

    #[async_trait]
    impl BoundaryService for FixedBoundary {
        async fn lookup(&self, lookup: &BoundaryLookup, _api_key: Option<&str>) -> EngineResult<BoundaryRecord> {
            self.lookups.lock().unwrap().push(lookup.clone());
            if let BoundaryLookup::Iso { iso } = lookup {
                if iso == "XXX" {
                    return Err(EngineError::RegionNotFound("country XXX not found".into()));
                }
            }
            let geojson = matches!(lookup, BoundaryLookup::Hash { .. }).then(polygon);
            Ok(BoundaryRecord { area_ha: Some(self.area_ha), geojson })
        }
    }

    /// Area queries get `area_ha`, everything else gets `rows`
    struct ScriptedStore {
        rows: Vec<Row>,
        area_ha: f64,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlStore for ScriptedStore {
        async fn execute(&self, sql: &str) -> EngineResult<Vec<Row>> {
            self.queries.lock().unwrap().push(sql.to_string());
            if sql.starts_with("select ") {
                let row = json!({ "area_ha": self.area_ha });
                return Ok(vec![row.as_object().cloned().unwrap()]);
            }
            Ok(self.rows.clone())
        }

        fn download_endpoint(&self) -> &str {
            "https://store.test/api/v2/sql"
        }
    }

    fn engine(rows: Vec<Value>, area_ha: f64) -> (StatsEngine, Arc<ScriptedStore>, Arc<FixedBoundary>) {
        let store = Arc::new(ScriptedStore {
            rows: rows.into_iter().map(|r| r.as_object().cloned().unwrap()).collect(),
            area_ha,
            queries: Mutex::new(Vec::new()),
        });
        let boundary = Arc::new(FixedBoundary { area_ha, lookups: Mutex::new(Vec::new()) });
        let engine = StatsEngine::new(
            store.clone(),
            boundary.clone(),
            ResolutionMode::Boundary,
            DefaultWindow::default(),
        );
        (engine, store, boundary)
    }

    fn polygon() -> Value {
        json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]})
    }

    fn zero_width() -> Period {
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        Period::parse_at(Some("2020-01-01,2020-01-01"), DefaultWindow::default(), day).unwrap()
    }

    #[tokio::test]
    async fn test_admin2_zero_rows_end_to_end() {
        let (engine, store, boundary) = engine(vec![], 4321.0);
        let region = RegionDescriptor::admin2("BRA", "1", "2");

        let result = engine
            .aggregate(&region, Some("2020-01-01,2020-01-02"), None)
            .await
            .unwrap();

        assert_eq!(result.id.as_deref(), Some("BRA.1_1.2_1"));
        assert_relative_eq!(result.value, 0.0);
        assert_relative_eq!(result.area_ha, 4321.0);
        assert_eq!(result.period_label, "Past 24 hours");
        assert!(result.min_date.is_none());

        let queries = store.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains(&format!("ST_simplify(the_geom, {})", 0.05 / 100.0)));
        assert!(queries[0].contains("gid_2 = 'BRA.1_1.2_1'"));
        assert!(queries[0].contains("date >= '2020-01-01'::date"));

        assert_eq!(
            *boundary.lookups.lock().unwrap(),
            vec![BoundaryLookup::IsoAndIds { iso: "BRA".into(), id1: "1".into(), id2: "2".into() }]
        );
    }

    #[tokio::test]
    async fn test_zero_width_period_keeps_resolved_area_for_every_kind() {
        let regions = vec![
            RegionDescriptor::country("FRA"),
            RegionDescriptor::admin1("FRA", "3"),
            RegionDescriptor::admin2("FRA", "3", "4"),
            RegionDescriptor::land_use("mining", "7").unwrap(),
            RegionDescriptor::protected_area("555").unwrap(),
            RegionDescriptor::geostore(Some("abc")),
            RegionDescriptor::custom_geometry(Some(polygon())),
        ];
        for region in regions {
            let (engine, _, _) = engine(vec![], 77.0);
            let result = engine.aggregate_period(&region, &zero_width(), None).await.unwrap();
            assert_relative_eq!(result.area_ha, 77.0);
            assert_relative_eq!(result.value, 0.0);
            assert_eq!(result.period_label, "Past week");
        }
    }

    #[tokio::test]
    async fn test_first_row_is_merged() {
        let row = json!({
            "value": 12.75,
            "min_date": "2020-01-02T00:00:00Z",
            "max_date": "2020-01-05T00:00:00Z",
            "area_ha": 900.0
        });
        let (engine, _, _) = engine(vec![row], 77.0);
        let result = engine
            .aggregate(&RegionDescriptor::country("bra"), Some("2020-01-01,2020-01-08"), None)
            .await
            .unwrap();

        assert_eq!(result.id.as_deref(), Some("BRA"));
        assert_relative_eq!(result.value, 12.75);
        assert_relative_eq!(result.area_ha, 900.0);
        assert_eq!(result.min_date.as_deref(), Some("2020-01-02T00:00:00Z"));
        assert_eq!(result.max_date.as_deref(), Some("2020-01-05T00:00:00Z"));
        assert!(result.download_urls.csv.starts_with("https://store.test/api/v2/sql?q="));
    }

    #[tokio::test]
    async fn test_null_sum_reads_as_zero_with_resolved_area() {
        let row = json!({"value": null, "min_date": null, "max_date": null});
        let (engine, _, _) = engine(vec![row], 10.0);
        let region = RegionDescriptor::land_use("fiber", "3").unwrap();
        let result = engine.aggregate_period(&region, &zero_width(), None).await.unwrap();
        assert_relative_eq!(result.value, 0.0);
        assert_relative_eq!(result.area_ha, 10.0);
    }

    #[tokio::test]
    async fn test_unknown_country_is_not_found_and_skips_store() {
        let (engine, store, _) = engine(vec![], 1.0);
        let err = engine
            .aggregate(&RegionDescriptor::country("xxx"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RegionNotFound(_)));
        assert!(store.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_period_fails_before_any_remote_call() {
        let (engine, store, boundary) = engine(vec![], 1.0);
        let err = engine
            .aggregate(&RegionDescriptor::country("BRA"), Some("2020-02-01,2020-01-01"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(store.queries.lock().unwrap().is_empty());
        assert!(boundary.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_lists_dates() {
        let rows = vec![json!({"date": "2020-03-02T00:00:00Z"}), json!({"date": "2020-03-01T00:00:00Z"})];
        let (engine, store, _) = engine(rows, 1.0);

        let dates = engine.latest(None).await.unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0].date, "2020-03-02T00:00:00Z");
        assert!(store.queries.lock().unwrap()[0].ends_with("LIMIT 3"));
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_LATEST_LIMIT);
        assert_eq!(parse_limit(Some("10")).unwrap(), 10);
        for bad in ["0", "101", "-1", "ten"] {
            assert!(matches!(parse_limit(Some(bad)), Err(EngineError::InvalidInput(_))), "{}", bad);
        }
    }
}
