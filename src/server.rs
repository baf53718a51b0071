// ============================================================================
// SECTION 17: HTTP SURFACE
// ============================================================================
// axum router over the telemetry core:
//
//   GET  /sensorData              chart records (cached, downsampled)
//   GET  /sensors                 every registered sensor
//   GET  /sensors/grouped         zone → device → metric with latest values
//   PUT  /sensors/:id             rename, re-unit, move or hide a sensor
//   POST /sensors/ingest          push one reading (off unless enabled)
//   POST /sensors/scan/acinfinity explicit discovery, cloud gateway
//   POST /sensors/scan/ecowitt    explicit discovery, LAN console
//   POST /aci/login               AC Infinity credentials → token
//   GET  /health                  version, uptime, counters
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cache::{CacheStatsSnapshot, CachedRecords};
use crate::chart::{ChartQueryService, ChartRequest};
use crate::config::ConfigSource;
use crate::error::{GatewayError, QueryError, StorageError, TelemetryError, TelemetryResult};
use crate::gateway::ecowitt::validate_device_address;
use crate::gateway::{GatewayClient, GatewayTarget};
use crate::grouping::{GroupedCache, GroupedSensors};
use crate::model::{Sensor, SensorId, SensorKey, SensorSource, SensorUpdate, ZoneId};
use crate::poller::{PollerStats, PollerStatsSnapshot};
use crate::readings::ReadingStore;
use crate::registry::{DiscoverySummary, SensorRegistry};
use crate::storage::TelemetryStorage;
use crate::TELEMETRY_VERSION;

// ----------------------------------------------------------------------------
// 17.1 State
// ----------------------------------------------------------------------------

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<dyn ConfigSource>,
    pub chart: Arc<ChartQueryService>,
    pub grouped: Arc<GroupedCache>,
    pub registry: Arc<SensorRegistry>,
    pub store: ReadingStore,
    pub storage: Arc<dyn TelemetryStorage>,
    pub client: Arc<dyn GatewayClient>,
    pub poller_stats: Arc<PollerStats>,
    pub started_at: Instant,
}

// ----------------------------------------------------------------------------
// 17.2 Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Handler error, rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Server-side failures are logged once, here, tagged by category.
fn log_failure(err: &TelemetryError) {
    if err.is_recoverable() {
        warn!(target: "isley::server", category = err.category(), error = %err, "Request failed");
    } else {
        error!(target: "isley::server", category = err.category(), error = %err, "Request failed");
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Storage(inner) => inner.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        if let StorageError::SensorNotFound { .. } = e {
            return ApiError::NotFound(e.to_string());
        }
        let message = e.to_string();
        log_failure(&TelemetryError::from(e));
        ApiError::Internal(message)
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidAddress { .. } | GatewayError::Rejected { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            other => {
                let message = other.to_string();
                log_failure(&TelemetryError::from(other));
                ApiError::BadGateway(message)
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ----------------------------------------------------------------------------
// 17.3 Read Handlers
// ----------------------------------------------------------------------------

/// GET /sensorData?sensor=&minutes=&start=&end=
async fn sensor_data(
    State(state): State<AppState>,
    Query(request): Query<ChartRequest>,
) -> ApiResult<Json<CachedRecords>> {
    let records = state.chart.handle(&request).await?;
    Ok(Json(records))
}

async fn list_sensors(State(state): State<AppState>) -> ApiResult<Json<Vec<Sensor>>> {
    Ok(Json(state.registry.list().await?))
}

async fn grouped_sensors(State(state): State<AppState>) -> ApiResult<Json<Arc<GroupedSensors>>> {
    Ok(Json(state.grouped.get(state.storage.as_ref()).await?))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub poller: PollerStatsSnapshot,
    pub cache: CacheStatsSnapshot,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: TELEMETRY_VERSION,
        uptime_secs: state.started_at.elapsed().as_secs(),
        poller: state.poller_stats.snapshot(),
        cache: state.chart.cache().stats(),
    })
}

// ----------------------------------------------------------------------------
// 17.4 Sensor Editing & Push Ingest
// ----------------------------------------------------------------------------

/// PUT /sensors/:id
async fn update_sensor(
    State(state): State<AppState>,
    Path(id): Path<SensorId>,
    Json(update): Json<SensorUpdate>,
) -> ApiResult<Json<Sensor>> {
    if update.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }

    let sensor = state.registry.update(id, update).await?;
    // Names and zones show up in both cached views.
    state.grouped.invalidate();
    state.chart.cache().invalidate();
    Ok(Json(sensor))
}

/// One reading pushed by an external script.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// `acinfinity`, `ecowitt` or `api`
    pub source: String,
    pub device: String,
    #[serde(rename = "type")]
    pub metric: String,
    pub value: f64,
    /// Name for a sensor created by this push
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: &'static str,
    pub sensor_id: SensorId,
}

/// POST /sensors/ingest
async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    if !state.config.snapshot().ingest.enabled {
        return Err(ApiError::Forbidden("API ingest is disabled".into()));
    }

    let source = SensorSource::from_wire(request.source.trim())
        .ok_or_else(|| ApiError::BadRequest(format!("unknown source '{}'", request.source)))?;
    let device = request.device.trim();
    let metric = request.metric.trim();
    if device.is_empty() || metric.is_empty() {
        return Err(ApiError::BadRequest("device and type are required".into()));
    }

    let key = SensorKey::new(source, device, metric);
    let name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{} ({}) {}", source, device, metric));
    let unit = request.unit.unwrap_or_default();

    let sensor_id = state.registry.resolve(&key, &name, &unit, request.zone_id).await?;
    state.store.append(sensor_id, request.value).await?;

    info!(target: "isley::server", sensor = %sensor_id, key = %key, "Ingested pushed reading");
    Ok(Json(IngestResponse {
        message: "Sensor data ingested successfully",
        sensor_id,
    }))
}

// ----------------------------------------------------------------------------
// 17.5 Discovery & Login
// ----------------------------------------------------------------------------

/// Body of the discovery endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    /// Console address; ignored by the cloud scan
    #[serde(default)]
    pub server_address: String,
}

async fn discover(
    state: &AppState,
    target: GatewayTarget,
    zone: Option<ZoneId>,
) -> ApiResult<Json<DiscoverySummary>> {
    info!(target: "isley::server", gateway = %target.label(), zone = ?zone, "Scanning for sensors");
    let reports = state.client.fetch(&target).await?;
    let summary = state.registry.discover(&reports, zone).await?;
    state.grouped.invalidate();
    Ok(Json(summary))
}

/// POST /sensors/scan/acinfinity
async fn scan_ac_infinity(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<DiscoverySummary>> {
    let config = state.config.snapshot();
    let gateway = &config.gateways.ac_infinity;
    if gateway.token.is_empty() {
        return Err(ApiError::BadRequest("AC Infinity token is not configured".into()));
    }

    let target = GatewayTarget::AcInfinity {
        base_url: gateway.base_url.clone(),
        token: gateway.token.clone(),
    };
    discover(&state, target, request.zone_id).await
}

/// POST /sensors/scan/ecowitt
async fn scan_ecowitt(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<DiscoverySummary>> {
    let address = request.server_address.trim();
    if !validate_device_address(address) {
        return Err(ApiError::BadRequest(format!(
            "'{}' is not a private address or local hostname",
            address
        )));
    }

    let target = GatewayTarget::EcoWitt {
        address: address.to_string(),
    };
    discover(&state, target, request.zone_id).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
}

/// POST /aci/login
///
/// The token is handed back to the caller, not stored; saving it into
/// `gateways.ac_infinity.token` is the caller's decision.
async fn ac_infinity_login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest("email and password are required".into()));
    }

    let base_url = state.config.snapshot().gateways.ac_infinity.base_url.clone();
    let token = state
        .client
        .ac_infinity_login(&base_url, request.email.trim(), &request.password)
        .await?;
    Ok(Json(LoginResponse { success: true, token }))
}

// ----------------------------------------------------------------------------
// 17.6 Router & Server
// ----------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sensorData", get(sensor_data))
        .route("/sensors", get(list_sensors))
        .route("/sensors/grouped", get(grouped_sensors))
        .route("/sensors/ingest", post(ingest))
        .route("/sensors/:id", put(update_sensor))
        .route("/sensors/scan/acinfinity", post(scan_ac_infinity))
        .route("/sensors/scan/ecowitt", post(scan_ecowitt))
        .route("/aci/login", post(ac_infinity_login))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `bind` and serve until `shutdown` resolves.
pub async fn serve<F>(state: AppState, bind: &str, shutdown: F) -> TelemetryResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| TelemetryError::Internal(format!("invalid bind address '{}': {}", bind, e)))?;
    let listener = TcpListener::bind(addr).await?;
    info!(target: "isley::server", addr = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(target: "isley::server", "HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::config::{ConfigManager, TelemetryConfig, ZoneConfig};
    use crate::gateway::{DeviceReport, MetricSample, MockGatewayClient};
    use crate::poller::Poller;
    use crate::storage::{MemoryStorage, MockTelemetryStorage};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn tent_config() -> TelemetryConfig {
        let mut config = TelemetryConfig::default();
        config.zones = vec![ZoneConfig { id: ZoneId(1), name: "Tent".into() }];
        config
    }

    fn state_with(storage: Arc<dyn TelemetryStorage>, client: MockGatewayClient) -> AppState {
        state_with_config(tent_config(), storage, client)
    }

    fn state_with_config(
        config: TelemetryConfig,
        storage: Arc<dyn TelemetryStorage>,
        client: MockGatewayClient,
    ) -> AppState {
        let config: Arc<dyn ConfigSource> = Arc::new(ConfigManager::new(config));
        let store = ReadingStore::new(storage.clone());
        let cache = Arc::new(QueryCache::new(config.clone()));
        AppState {
            config: config.clone(),
            chart: Arc::new(ChartQueryService::new(store.clone(), cache)),
            grouped: Arc::new(GroupedCache::new(config)),
            registry: Arc::new(SensorRegistry::new(storage.clone())),
            store,
            storage,
            client: Arc::new(client),
            poller_stats: Arc::new(PollerStats::default()),
            started_at: Instant::now(),
        }
    }

    fn put_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_sensor_data_validation_is_400() {
        let app = router(state_with(Arc::new(MemoryStorage::new()), MockGatewayClient::new()));

        let (status, body) = call(app.clone(), get_request("/sensorData")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "sensor parameter is required");

        let (status, body) = call(app, get_request("/sensorData?sensor=7")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Either minutes or start and end dates must be provided");
    }

    #[tokio::test]
    async fn test_storage_failure_is_500() {
        let mut storage = MockTelemetryStorage::new();
        storage
            .expect_query_readings()
            .returning(|_, _| Err(StorageError::ReadFailed { message: "disk on fire".into() }));
        let app = router(state_with(Arc::new(storage), MockGatewayClient::new()));

        let (status, body) = call(app, get_request("/sensorData?sensor=7&minutes=60")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_scan_then_chart_and_group() {
        let storage = Arc::new(MemoryStorage::new());
        let mut client = MockGatewayClient::new();
        client.expect_fetch().times(1).returning(|target| {
            assert_eq!(target, &GatewayTarget::EcoWitt { address: "192.168.1.40".into() });
            Ok(vec![DeviceReport {
                source: SensorSource::EcoWitt,
                device: "192.168.1.40".into(),
                samples: vec![
                    MetricSample::new("WH25.InTemp", 72.5, "EC (192.168.1.40) InTemp", "°F"),
                    MetricSample::new("Soil.1", 55.0, "Pot A", "%"),
                ],
            }])
        });
        let state = state_with(storage.clone(), client);
        let app = router(state.clone());

        let (status, body) = call(
            app.clone(),
            post_json("/sensors/scan/ecowitt", json!({"zone_id": 1, "server_address": "192.168.1.40"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], 2);

        let sensors = state.registry.list().await.unwrap();
        let soil = sensors.iter().find(|s| s.key.metric == "Soil.1").unwrap();
        storage.insert_reading(soil.id, 55.0, chrono::Utc::now()).await.unwrap();

        let (status, body) = call(app.clone(), get_request(&format!("/sensorData?sensor={}&minutes=60", soil.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["value"], 55.0);
        assert_eq!(body[0]["sensor_name"], "Pot A");

        let (status, body) = call(app, get_request("/sensors/grouped")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Tent"]["192.168.1.40"]["Soil.1"][0]["value"], 55.0);
        assert_eq!(body["Tent"]["192.168.1.40"]["WH25.InTemp"][0]["value"], Value::Null);
    }

    #[tokio::test]
    async fn test_scan_rejects_public_address() {
        let mut client = MockGatewayClient::new();
        client.expect_fetch().never();
        let app = router(state_with(Arc::new(MemoryStorage::new()), client));

        let (status, _) = call(
            app,
            post_json("/sensors/scan/ecowitt", json!({"server_address": "8.8.8.8"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cloud_scan_requires_token() {
        let mut client = MockGatewayClient::new();
        client.expect_fetch().never();
        let app = router(state_with(Arc::new(MemoryStorage::new()), client));

        let (status, body) = call(app, post_json("/sensors/scan/acinfinity", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "AC Infinity token is not configured");
    }

    #[tokio::test]
    async fn test_unreachable_console_is_502() {
        let mut client = MockGatewayClient::new();
        client
            .expect_fetch()
            .returning(|_| Err(GatewayError::transport("ecowitt@console", "connection refused")));
        let app = router(state_with(Arc::new(MemoryStorage::new()), client));

        let (status, _) = call(app, post_json("/sensors/scan/ecowitt", json!({"server_address": "console"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state_with(Arc::new(MemoryStorage::new()), MockGatewayClient::new()));
        let (status, body) = call(app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], TELEMETRY_VERSION);
        assert_eq!(body["poller"]["cycles"], 0);
    }

    #[tokio::test]
    async fn test_poll_created_sensor_joins_overview_once_zoned() {
        let storage = Arc::new(MemoryStorage::new());
        let mut config = tent_config();
        config.gateways.ecowitt.enabled = true;
        config.gateways.ecowitt.devices = vec!["192.168.1.40".into()];

        let mut client = MockGatewayClient::new();
        client.expect_fetch().times(1).returning(|_| {
            Ok(vec![DeviceReport {
                source: SensorSource::EcoWitt,
                device: "192.168.1.40".into(),
                samples: vec![MetricSample::new("Soil.1", 55.0, "EC (192.168.1.40) Soil 1", "%")],
            }])
        });
        let poller_client = Arc::new(client);
        let state = state_with_config(config.clone(), storage.clone(), MockGatewayClient::new());
        let poller = Poller::new(
            Arc::new(ConfigManager::new(config)),
            poller_client,
            state.registry.clone(),
            state.store.clone(),
        );
        assert_eq!(poller.run_cycle().await.samples_written, 1);
        let app = router(state.clone());

        // Unzoned after polling, so not in the overview
        let (status, body) = call(app.clone(), get_request("/sensors/grouped")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let id = state.registry.list().await.unwrap()[0].id;
        let (status, body) = call(
            app.clone(),
            put_json(
                &format!("/sensors/{}", id),
                json!({"name": "Pot A", "unit": "%", "zone_id": 1, "visible": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Pot A");
        assert_eq!(body["zone_id"], 1);

        // The edit drops the cached overview
        let (_, body) = call(app.clone(), get_request("/sensors/grouped")).await;
        let soil = &body["Tent"]["192.168.1.40"]["Soil.1"][0];
        assert_eq!(soil["name"], "Pot A");
        assert_eq!(soil["value"], 55.0);
        assert_eq!(soil["trend"], "flat");

        // Hidden again
        call(
            app.clone(),
            put_json(
                &format!("/sensors/{}", id),
                json!({"name": "Pot A", "unit": "%", "zone_id": 1, "visible": false}),
            ),
        )
        .await;
        let (_, body) = call(app, get_request("/sensors/grouped")).await;
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn test_update_unknown_or_unnamed_sensor() {
        let app = router(state_with(Arc::new(MemoryStorage::new()), MockGatewayClient::new()));

        let (status, _) = call(
            app.clone(),
            put_json("/sensors/42", json!({"name": "x", "unit": "", "visible": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(app, put_json("/sensors/42", json!({"name": " ", "unit": "", "visible": true}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_is_forbidden_until_enabled() {
        let storage = Arc::new(MemoryStorage::new());
        let app = router(state_with(storage.clone(), MockGatewayClient::new()));

        let (status, body) = call(
            app,
            post_json("/sensors/ingest", json!({"source": "api", "device": "pi", "type": "co2", "value": 800.0})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "API ingest is disabled");
        assert_eq!(storage.sensor_count(), 0);
    }

    #[tokio::test]
    async fn test_ingest_resolves_then_appends() {
        let storage = Arc::new(MemoryStorage::new());
        let mut config = tent_config();
        config.ingest.enabled = true;
        let app = router(state_with_config(config, storage.clone(), MockGatewayClient::new()));

        let push = |value: f64| {
            post_json(
                "/sensors/ingest",
                json!({"source": "api", "device": "pi", "type": "co2", "value": value, "unit": "ppm", "zone_id": 1}),
            )
        };
        let (status, first) = call(app.clone(), push(800.0)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["message"], "Sensor data ingested successfully");
        let (_, second) = call(app.clone(), push(820.0)).await;
        assert_eq!(first["sensor_id"], second["sensor_id"]);

        assert_eq!(storage.sensor_count(), 1);
        assert_eq!(storage.reading_count(), 2);
        let key = SensorKey::new(SensorSource::Api, "pi", "co2");
        let id = storage.find_sensor(&key).await.unwrap().unwrap();
        let sensor = storage.sensor(id).await.unwrap().unwrap();
        assert_eq!(sensor.name, "api (pi) co2");
        assert_eq!(sensor.unit, "ppm");
        assert_eq!(sensor.zone_id, Some(ZoneId(1)));
        assert_eq!(storage.latest_reading(id).await.unwrap().unwrap().value, 820.0);

        let (status, _) = call(
            app,
            post_json("/sensors/ingest", json!({"source": "mqtt", "device": "pi", "type": "co2", "value": 1.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_returns_token() {
        let mut client = MockGatewayClient::new();
        client
            .expect_ac_infinity_login()
            .times(1)
            .returning(|base_url, email, _| {
                assert_eq!(base_url, crate::DEFAULT_AC_INFINITY_BASE_URL);
                assert_eq!(email, "grower@example.com");
                Ok("ey123".to_string())
            });
        let app = router(state_with(Arc::new(MemoryStorage::new()), client));

        let (status, body) = call(
            app,
            post_json("/aci/login", json!({"email": " grower@example.com ", "password": "s3cret"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "token": "ey123"}));
    }

    #[tokio::test]
    async fn test_rejected_login_is_400() {
        let mut client = MockGatewayClient::new();
        client.expect_ac_infinity_login().times(1).returning(|_, _, _| {
            Err(GatewayError::Rejected {
                gateway: "acinfinity".into(),
                message: "Incorrect password".into(),
            })
        });
        let app = router(state_with(Arc::new(MemoryStorage::new()), client));

        let (status, body) = call(
            app.clone(),
            post_json("/aci/login", json!({"email": "grower@example.com", "password": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Incorrect password"));

        let (status, _) = call(app, post_json("/aci/login", json!({"email": "", "password": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
