//! Axum routes for the flow engine service.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::FlowError;
use crate::reconciler::{SwitchRulesDiff, SwitchSync};
use crate::rules::build_rules;
use crate::store::{GraphStore, GraphTransaction, PostgresGraphStore};
use crate::types::{Cookie, Flow, FlowCommand, FlowKey, FlowPair, Isl, IslInfo, SwitchId};
use crate::FLOW_PATH_SCHEMA_VERSION;

use super::middleware::record_switch_sync;
use super::state::{ServiceState, StoreHealth};

/// Type alias for the service state with PostgresGraphStore.
pub type AppState = ServiceState<PostgresGraphStore>;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response to a flow store: the stored key and the rules to install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFlowResponse {
    /// Key of the stored record.
    pub flow: FlowKey,
    /// Install commands for the flow, in install order.
    pub commands: Vec<FlowCommand>,
}

/// Response to a flow removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFlowResponse {
    /// Whether a record was deleted.
    pub deleted: bool,
}

/// Switches to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureSwitchesRequest {
    /// Switch ids; existing switches are left untouched.
    pub switch_ids: Vec<SwitchId>,
}

/// Cookies a switch reports, in display form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRulesRequest {
    /// Reported rule cookies (`0x…`).
    pub cookies: Vec<String>,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub flow_path_schema_version: u32,
    /// Database connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHealth>,
}

/// Database health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub pool_size: u32,
    pub pool_idle: usize,
    pub pool_max: u32,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub details: Option<String>,
}

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// HTTP status for an engine error.
pub fn status_for(error: &FlowError) -> StatusCode {
    match error {
        FlowError::PathInconsistency(_) => StatusCode::BAD_REQUEST,
        FlowError::NotFound { .. } => StatusCode::NOT_FOUND,
        FlowError::DirectionMismatch { .. } => StatusCode::CONFLICT,
        FlowError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        FlowError::CorruptRecord(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn flow_error(error: FlowError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(code = error.code(), error = %error, "Flow engine failure");
    } else {
        tracing::warn!(code = error.code(), error = %error, "Request rejected");
    }
    (status, Json(ErrorResponse::new(error.code(), error.to_string())))
}

fn parse_cookie(raw: &str) -> Result<Cookie, ApiError> {
    Cookie::parse_display(raw).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("INVALID_COOKIE", e.to_string()).with_details(raw.to_string())),
        )
    })
}

fn parse_cookies(raw: &[String]) -> Result<Vec<Cookie>, ApiError> {
    raw.iter().map(|c| parse_cookie(c)).collect()
}

// ============================================================================
// Route Handlers
// ============================================================================

/// List every flow, paired by direction.
async fn list_flows_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
) -> ApiResult<Vec<FlowPair>> {
    state.lookup.list_flows(None).await.map(Json).map_err(flow_error)
}

/// Store a flow and return its install commands.
async fn store_flow_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(flow): Json<Flow>,
) -> ApiResult<StoreFlowResponse> {
    state.flows.store_flow(&flow, None).await.map_err(flow_error)?;
    let commands = build_rules(&flow).map_err(flow_error)?;
    tracing::info!(
        flowid = %flow.flowid,
        cookie = %flow.cookie,
        commands = commands.len(),
        "Flow stored"
    );
    Ok(Json(StoreFlowResponse { flow: flow.key(), commands }))
}

/// Fetch one flow direction.
async fn get_flow_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Path((flowid, cookie)): Path<(String, String)>,
) -> ApiResult<Flow> {
    let cookie = parse_cookie(&cookie)?;
    state.lookup.get_flow(&flowid, cookie, None).await.map(Json).map_err(flow_error)
}

/// Remove one flow direction; lookup and removal share a transaction.
async fn remove_flow_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Path((flowid, cookie)): Path<(String, String)>,
) -> ApiResult<RemoveFlowResponse> {
    let cookie = parse_cookie(&cookie)?;
    let mut tx = state.store.begin().await.map_err(|e| flow_error(FlowError::from_store(e)))?;

    let removed = async {
        let flow = state.lookup.get_flow(&flowid, cookie, Some(&mut tx)).await?;
        state.flows.remove_flow(&flow, Some(&mut tx)).await
    }
    .await;

    match removed {
        Ok(deleted) => {
            tx.commit().await.map_err(|e| flow_error(FlowError::from_store(e)))?;
            tracing::info!(flowid = %flowid, cookie = %cookie, "Flow removed");
            Ok(Json(RemoveFlowResponse { deleted }))
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(flow_error(e))
        }
    }
}

/// Fetch the sibling record of a flow direction.
async fn counterpart_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Path((flowid, cookie)): Path<(String, String)>,
) -> ApiResult<Flow> {
    let cookie = parse_cookie(&cookie)?;
    let flow = state.lookup.get_flow(&flowid, cookie, None).await.map_err(flow_error)?;
    state.lookup.find_counterpart(&flow, None).await.map(Json).map_err(flow_error)
}

/// Install commands for a stored flow.
async fn flow_rules_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Path((flowid, cookie)): Path<(String, String)>,
) -> ApiResult<Vec<FlowCommand>> {
    let cookie = parse_cookie(&cookie)?;
    let flow = state.lookup.get_flow(&flowid, cookie, None).await.map_err(flow_error)?;
    build_rules(&flow).map(Json).map_err(flow_error)
}

/// Create switches.
async fn ensure_switches_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(request): Json<EnsureSwitchesRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .topology
        .ensure_switches(&request.switch_ids, None)
        .await
        .map_err(flow_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create an ISL and return its stored state.
async fn ensure_isl_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Json(link): Json<IslInfo>,
) -> ApiResult<Isl> {
    let mut tx = state.store.begin().await.map_err(|e| flow_error(FlowError::from_store(e)))?;
    let result = async {
        state.topology.ensure_isl(&link, Some(&mut tx)).await?;
        state.topology.get_isl(&link.key, Some(&mut tx)).await
    }
    .await;

    match result {
        Ok(Some(isl)) => {
            tx.commit().await.map_err(|e| flow_error(FlowError::from_store(e)))?;
            Ok(Json(isl))
        }
        Ok(None) => {
            // merge_isl guarantees the row inside the same transaction
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(flow_error(FlowError::CorruptRecord(format!("ISL {} missing after merge", link.key))))
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(flow_error(e))
        }
    }
}

/// Diff reported switch rules against stored state.
async fn validate_switch_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(switch_id): Path<String>,
    Json(request): Json<SwitchRulesRequest>,
) -> ApiResult<SwitchRulesDiff> {
    let reported = parse_cookies(&request.cookies)?;
    state
        .reconciler
        .diff(&SwitchId::new(switch_id), &reported, None)
        .await
        .map(Json)
        .map_err(flow_error)
}

/// Diff reported switch rules and build commands for the missing ones.
async fn sync_switch_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
    Path(switch_id): Path<String>,
    Json(request): Json<SwitchRulesRequest>,
) -> ApiResult<SwitchSync> {
    let reported = parse_cookies(&request.cookies)?;
    let switch_id = SwitchId::new(switch_id);
    let sync = state
        .reconciler
        .sync(&switch_id, &reported, None)
        .await
        .map_err(flow_error)?;
    record_switch_sync(
        switch_id.as_str(),
        sync.diff.missing_rules.len(),
        sync.diff.excess_rules.len(),
        sync.repair.commands.len(),
    );
    Ok(Json(sync))
}

/// Health check endpoint (detailed).
async fn health_handler<S: StoreHealth>(State(state): State<Arc<ServiceState<S>>>) -> Json<HealthResponse> {
    let db_healthy = state.store.is_healthy().await;
    let database = state.store.pool_stats().map(|stats| DatabaseHealth {
        connected: db_healthy,
        pool_size: stats.size,
        pool_idle: stats.idle,
        pool_max: stats.max,
    });

    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        flow_path_schema_version: FLOW_PATH_SCHEMA_VERSION,
        database,
    })
}

/// Liveness probe endpoint. Does not check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the store answers, 503 otherwise.
async fn readiness_handler<S: StoreHealth>(
    State(state): State<Arc<ServiceState<S>>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.store.is_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
                details: Some("Database connection failed".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the flow engine service.
pub fn create_router<S: StoreHealth>(state: ServiceState<S>) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Flows
        .route("/api/flows", get(list_flows_handler::<S>).put(store_flow_handler::<S>))
        .route(
            "/api/flows/:flowid/:cookie",
            get(get_flow_handler::<S>).delete(remove_flow_handler::<S>),
        )
        .route("/api/flows/:flowid/:cookie/counterpart", get(counterpart_handler::<S>))
        .route("/api/flows/:flowid/:cookie/rules", get(flow_rules_handler::<S>))
        // Topology
        .route("/api/switches", post(ensure_switches_handler::<S>))
        .route("/api/isls", post(ensure_isl_handler::<S>))
        // Switch rule reconciliation
        .route("/api/switches/:switch_id/validate", post(validate_switch_handler::<S>))
        .route("/api/switches/:switch_id/sync", post(sync_switch_handler::<S>))
        // Health checks
        .route("/health", get(health_handler::<S>))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler::<S>))
        .with_state(state)
}
