//! Axum route handlers for the registry server.
//!
//! # Routes
//!
//! - `GET /health`: `{"status": "ok", ...}`
//! - `POST /agents`: register, returns `{"agent_id"}`
//! - `GET /agents`: every record, tombstones included
//! - `GET /agents/:agent_id`: one live record
//! - `DELETE /agents/:agent_id`: deregister (idempotent)
//! - `POST /agents/:agent_id/heartbeat`: refresh liveness
//! - `GET /capabilities/:capability/agents`: active providers, ascending id

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::A2AError;
use crate::registry::{
    AgentRecord, RegistrationRequest, RegistrationResponse, RegistryErrorBody, RegistryStore,
};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RegistryStore>,
}

impl AppState {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self { store }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(RegistryStore::default()))
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/agents", post(register_handler).get(list_handler))
        .route("/agents/:agent_id", get(get_agent_handler).delete(deregister_handler))
        .route("/agents/:agent_id/heartbeat", post(heartbeat_handler))
        .route("/capabilities/:capability/agents", get(resolve_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Registry error rendered as `{"error": {"kind", "message", "subject"}}`.
struct ApiError(A2AError);

impl From<A2AError> for ApiError {
    fn from(err: A2AError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            A2AError::NoAgentFound { .. } | A2AError::UnknownAgent { .. } => StatusCode::NOT_FOUND,
            A2AError::Registration(_) | A2AError::Validation(_) | A2AError::Decode(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(RegistryErrorBody::from_error(&self.0))).into_response()
    }
}

/// GET /health: liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "agentlink-registry",
        "agents": state.store.active_count(),
    }))
}

/// POST /agents: register or refresh an agent.
async fn register_handler(
    State(state): State<AppState>,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let Json(request) = body.map_err(|e| A2AError::Registration(e.body_text()))?;
    let agent_id = state.store.register(request)?;
    Ok((StatusCode::CREATED, Json(RegistrationResponse { agent_id })))
}

/// GET /agents: every record.
async fn list_handler(State(state): State<AppState>) -> Json<Vec<AgentRecord>> {
    Json(state.store.list())
}

/// GET /agents/:agent_id
async fn get_agent_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentRecord>, ApiError> {
    Ok(Json(state.store.get(&agent_id)?))
}

/// DELETE /agents/:agent_id
async fn deregister_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.deregister(&agent_id)?;
    Ok(Json(json!({})))
}

/// POST /agents/:agent_id/heartbeat
async fn heartbeat_handler(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.heartbeat(&agent_id)?;
    Ok(Json(json!({})))
}

/// GET /capabilities/:capability/agents
async fn resolve_handler(
    State(state): State<AppState>,
    Path(capability): Path<String>,
) -> Result<Json<Vec<AgentRecord>>, ApiError> {
    Ok(Json(state.store.resolve(&capability)?))
}
