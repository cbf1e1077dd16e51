// HTTP surface for the loss statistics engine
//
// Routes live under /api/v1/guira-loss. Aggregation responses are cached by
// request URI; latest-date responses never are.

use axum::{
    extract::{rejection::JsonRejection, OriginalUri, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::aggregator::StatsEngine;
use crate::boundary::GeostoreClient;
use crate::config::Config;
use crate::error::EngineError;
use crate::region::RegionDescriptor;
use crate::serializer::{serialize_latest, serialize_loss};
use crate::store::CartoClient;
use crate::templates::TemplateKind;

const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<StatsEngine>,
    pub cache: Cache<String, Value>,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
}

impl AppState {
    /// Build the store and boundary clients from configuration
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        tracing::info!("Initializing store client ({})...", config.store_url);
        let store = Arc::new(CartoClient::from_config(config)?);

        tracing::info!("Initializing geostore client ({})...", config.geostore_url);
        let boundary = Arc::new(GeostoreClient::from_config(config)?);

        let engine = StatsEngine::new(store, boundary, config.resolution, config.default_window);
        Ok(Self::with_engine(engine, config))
    }

    pub fn with_engine(engine: StatsEngine, config: &Config) -> Self {
        tracing::info!("Initializing Moka cache...");
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            engine: Arc::new(engine),
            cache,
            cache_ttl: config.cache_ttl,
            request_timeout: config.request_timeout,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))

        // Registered geometry (GET ?geostore=) or posted GeoJSON (POST)
        .route("/api/v1/guira-loss", get(loss_by_geostore).post(loss_by_geometry))
        .route("/api/v1/guira-loss/latest", get(latest))

        // Administrative boundaries
        .route("/api/v1/guira-loss/admin/:iso", get(loss_by_country))
        .route("/api/v1/guira-loss/admin/:iso/:id1", get(loss_by_admin1))
        .route("/api/v1/guira-loss/admin/:iso/:id1/:id2", get(loss_by_admin2))

        .route("/api/v1/guira-loss/use/:name/:id", get(loss_by_use))
        .route("/api/v1/guira-loss/wdpa/:id", get(loss_by_wdpa))

        // Middleware (applied in reverse order)
        .layer(middleware::from_fn_with_state(state.clone(), enforce_deadline))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Inbound deadline. Dropping the handler future cancels in-flight remote calls.
async fn enforce_deadline(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(state.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!("{} exceeded the {:?} deadline", path, state.request_timeout);
            AppError::Timeout(state.request_timeout).into_response()
        }
    }
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct LossParams {
    period: Option<String>,
    geostore: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestParams {
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeometryBody {
    #[serde(default)]
    geojson: Option<Value>,
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn loss_by_country(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(iso): Path<String>,
    Query(params): Query<LossParams>,
) -> Result<Response, AppError> {
    let region = RegionDescriptor::country(&iso);
    respond_loss(&state, Some(uri.to_string()), region, params.period, &headers).await
}

async fn loss_by_admin1(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path((iso, id1)): Path<(String, String)>,
    Query(params): Query<LossParams>,
) -> Result<Response, AppError> {
    let region = RegionDescriptor::admin1(&iso, &id1);
    respond_loss(&state, Some(uri.to_string()), region, params.period, &headers).await
}

async fn loss_by_admin2(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path((iso, id1, id2)): Path<(String, String, String)>,
    Query(params): Query<LossParams>,
) -> Result<Response, AppError> {
    let region = RegionDescriptor::admin2(&iso, &id1, &id2);
    respond_loss(&state, Some(uri.to_string()), region, params.period, &headers).await
}

async fn loss_by_use(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path((name, id)): Path<(String, String)>,
    Query(params): Query<LossParams>,
) -> Result<Response, AppError> {
    let region = RegionDescriptor::land_use(&name, &id)?;
    respond_loss(&state, Some(uri.to_string()), region, params.period, &headers).await
}

async fn loss_by_wdpa(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<LossParams>,
) -> Result<Response, AppError> {
    let region = RegionDescriptor::protected_area(&id)?;
    respond_loss(&state, Some(uri.to_string()), region, params.period, &headers).await
}

async fn loss_by_geostore(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(params): Query<LossParams>,
) -> Result<Response, AppError> {
    let region = RegionDescriptor::geostore(params.geostore.as_deref());
    respond_loss(&state, Some(uri.to_string()), region, params.period, &headers).await
}

/// Posted geometry; never cached
async fn loss_by_geometry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LossParams>,
    body: Result<Json<GeometryBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = body.map_err(|e| EngineError::InvalidInput(e.body_text()))?;
    let region = RegionDescriptor::custom_geometry(body.geojson);
    respond_loss(&state, None, region, params.period, &headers).await
}

async fn latest(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Result<Response, AppError> {
    tracing::info!("Fetching latest observation dates");
    let dates = state.engine.latest(params.limit.as_deref()).await?;
    let body = serde_json::to_value(serialize_latest(dates)).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(with_cache_control(cache_control(&state, TemplateKind::Latest), body))
}

async fn respond_loss(
    state: &AppState,
    cache_key: Option<String>,
    region: RegionDescriptor,
    period: Option<String>,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let kind = TemplateKind::for_region(&region);
    let cache_key = cache_key.filter(|_| kind.is_some_and(|k| k.is_cacheable()));
    let cache_control = kind.map_or_else(|| "no-cache".to_string(), |k| cache_control(state, k));

    // Check cache
    if let Some(key) = &cache_key {
        if let Some(cached) = state.cache.get(key).await {
            tracing::debug!("Cache hit for {}", key);
            return Ok(with_cache_control(cache_control, cached));
        }
    }

    tracing::info!("Computing loss for {}", region);
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    let result = state.engine.aggregate(&region, period.as_deref(), api_key).await?;
    let body = serde_json::to_value(serialize_loss(result)).map_err(|e| AppError::Internal(e.to_string()))?;

    // Cache result
    if let Some(key) = cache_key {
        state.cache.insert(key, body.clone()).await;
    }

    Ok(with_cache_control(cache_control, body))
}

fn cache_control(state: &AppState, kind: TemplateKind) -> String {
    if kind.is_cacheable() {
        format!("public, max-age={}", state.cache_ttl.as_secs())
    } else {
        "no-cache".to_string()
    }
}

fn with_cache_control(value: String, body: Value) -> Response {
    ([(header::CACHE_CONTROL, value)], Json(body)).into_response()
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Engine(EngineError),
    Timeout(Duration),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Engine(err) => {
                let status = match err {
                    EngineError::RegionNotFound(_) => StatusCode::NOT_FOUND,
                    _ if err.is_client_error() => StatusCode::BAD_REQUEST,
                    _ => {
                        tracing::error!("Request failed: {}", err);
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
            AppError::Timeout(limit) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Request timed out after {:?}", limit),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "errors": [{ "status": status.as_u16(), "detail": message }]
        }));

        (status, body).into_response()
    }
}
