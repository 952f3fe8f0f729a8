use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::bridge::BridgeSummary;
use crate::engine::EngineHandle;
use crate::error::BridgeError;
use crate::registry::DeviceId;
use crate::registry::LocationId;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    bridge: BridgeSummary,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: DeviceId,
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    #[serde(default)]
    limit_to_one: bool,
    #[serde(default)]
    device: Option<DeviceId>,
}

#[derive(Debug, Deserialize)]
struct DiscoverRequest {
    device: DeviceId,
}

#[derive(Debug, Deserialize)]
struct PlaceholderRequest {
    name: String,
    #[serde(default)]
    location: Option<LocationId>,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    name: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: EngineHandle,
}

/// Maps bridge errors onto HTTP statuses.
struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::Validation { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Conflict(_) => StatusCode::CONFLICT,
            BridgeError::Lookup(_) => StatusCode::NOT_FOUND,
            BridgeError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BridgeError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let bridge = state.engine.summary().await?;

    Ok((
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            bridge,
        }),
    ))
}

#[tracing::instrument(skip(state))]
async fn list_devices(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.devices().await?))
}

#[tracing::instrument(skip(state))]
async fn add_placeholder(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceholderRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = state.engine.add_placeholder(req.name, req.location).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[tracing::instrument(skip(state))]
async fn allow_joining(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .allow_joining(req.limit_to_one, req.device)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
async fn block_joining(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.engine.block_joining().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
async fn discover(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscoverRequest>,
) -> ApiResult<StatusCode> {
    state.engine.discover(req.device).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state))]
async fn refresh_devices(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.engine.request_device_list().await?;
    Ok(StatusCode::ACCEPTED)
}

#[tracing::instrument(skip(state))]
async fn rename_device(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<StatusCode> {
    if state.engine.rename_device(name, req.name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::CONFLICT)
    }
}

#[tracing::instrument(skip(state))]
async fn remove_device(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.remove_device(name).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Create the API router with all endpoints
pub fn create_router(engine: EngineHandle) -> Router {
    let state = Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        engine,
    });
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/devices", get(list_devices).post(add_placeholder))
        .route("/v1/devices/refresh", post(refresh_devices))
        .route("/v1/devices/:name", axum::routing::delete(remove_device))
        .route("/v1/devices/:name/rename", post(rename_device))
        .route("/v1/join", post(allow_joining).delete(block_joining))
        .route("/v1/discover", post(discover))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    engine: EngineHandle,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(engine);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
