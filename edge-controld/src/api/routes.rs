use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use crate::error::FleetError;
use crate::fleet_manager::FleetHandle;
use shared::protocol::{HeartbeatRequest, RegisterRequest, RouteStreamRequest};
use shared::types::{EdgeServer, RoutingInfo, StatsSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub fleet: FleetHandle,
    pub fingerprint_rx: watch::Receiver<String>,
    /// Mount point of the edge routes, e.g. "/edge"
    pub prefix: String,
}

#[derive(Serialize)]
pub struct ServerResponse {
    pub success: bool,
    pub message: &'static str,
    pub server: EdgeServer,
}

#[derive(Serialize)]
pub struct ServersResponse {
    pub success: bool,
    pub servers: Vec<EdgeServer>,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStreamResponse {
    pub success: bool,
    pub message: &'static str,
    pub stream_id: String,
    pub server_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrouteResponse {
    pub success: bool,
    pub message: &'static str,
    pub stream_id: String,
}

#[derive(Serialize)]
pub struct RoutingResponse {
    pub success: bool,
    pub routing: RoutingInfo,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: StatsSnapshot,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub services: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServersQuery {
    pub region: Option<String>,
    pub include_inactive: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestServerQuery {
    pub region: Option<String>,
    pub preferred_server: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let edge = Router::new()
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/servers", get(list_servers))
        .route("/servers/hash", get(get_fingerprint))
        .route("/best-server/:stream_id", get(best_server))
        .route("/route-stream", post(route_stream))
        .route("/route-stream/:stream_id", axum::routing::delete(unroute))
        .route("/stream-routing/:stream_id", get(stream_routing))
        .route("/stats", get(stats));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest(&state.prefix, edge)
        .fallback(endpoint_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn invalid_body(rejection: JsonRejection) -> FleetError {
    FleetError::Validation(rejection.body_text())
}

fn invalid_query(rejection: QueryRejection) -> FleetError {
    FleetError::Validation(rejection.body_text())
}

/// Query values are optional filters; an empty value means "not given".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes"))
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<ServerResponse>, FleetError> {
    let Json(request) = payload.map_err(invalid_body)?;
    let server = state.fleet.register(request).await?;
    Ok(Json(ServerResponse {
        success: true,
        message: "Edge server registered successfully",
        server,
    }))
}

async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<ServerResponse>, FleetError> {
    let Json(request) = payload.map_err(invalid_body)?;
    let server = state.fleet.heartbeat(request).await?;
    Ok(Json(ServerResponse {
        success: true,
        message: "Heartbeat received",
        server,
    }))
}

async fn list_servers(
    State(state): State<AppState>,
    query: Result<Query<ServersQuery>, QueryRejection>,
) -> Result<Json<ServersResponse>, FleetError> {
    let Query(params) = query.map_err(invalid_query)?;
    let include_inactive = parse_flag(params.include_inactive.as_deref());
    let servers = state
        .fleet
        .list_servers(non_empty(params.region), include_inactive)
        .await?;
    Ok(Json(ServersResponse {
        success: true,
        count: servers.len(),
        servers,
    }))
}

async fn get_fingerprint(State(state): State<AppState>) -> String {
    state.fingerprint_rx.borrow().clone()
}

async fn best_server(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    query: Result<Query<BestServerQuery>, QueryRejection>,
) -> Result<Json<ServerResponse>, FleetError> {
    let Query(params) = query.map_err(invalid_query)?;
    let selection = state
        .fleet
        .select_best(
            stream_id,
            non_empty(params.region),
            non_empty(params.preferred_server),
        )
        .await?;
    Ok(Json(ServerResponse {
        success: true,
        message: selection.reason.message(),
        server: selection.server,
    }))
}

async fn route_stream(
    State(state): State<AppState>,
    payload: Result<Json<RouteStreamRequest>, JsonRejection>,
) -> Result<Json<RouteStreamResponse>, FleetError> {
    let Json(request) = payload.map_err(invalid_body)?;
    let route = state.fleet.route_stream(request).await?;
    Ok(Json(RouteStreamResponse {
        success: true,
        message: "Stream routed successfully",
        stream_id: route.stream_id,
        server_id: route.server_id,
    }))
}

async fn unroute(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<UnrouteResponse>, FleetError> {
    let existed = state.fleet.unroute(stream_id.clone()).await?;
    Ok(Json(UnrouteResponse {
        success: true,
        message: if existed {
            "Stream routing removed"
        } else {
            "Stream was not routed"
        },
        stream_id,
    }))
}

async fn stream_routing(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<RoutingResponse>, FleetError> {
    let routing = state.fleet.routing(stream_id).await?;
    Ok(Json(RoutingResponse {
        success: true,
        routing,
    }))
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, FleetError> {
    let stats = state.fleet.stats().await?;
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        services: json!({ "edge": "active" }),
    })
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Edge fleet control plane",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "edge": state.prefix,
            "health": "/health",
        },
    }))
}

async fn endpoint_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Endpoint not found",
        })),
    )
}
