//! HTTP API over a running [`PresenceMonitor`].
//!
//! - `GET /api/presence` current snapshot
//! - `POST /api/set-occupancy` set the operator override
//! - `DELETE /api/override` clear it
//! - `POST /api/reset` override to zero
//! - `GET /api/debug/state` per-channel readings and faults
//! - `POST /api/admin/restart` bearer-gated restart
//! - `GET /health`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use presenza_core::{
    AdminGate, ChannelId, ChannelReading, CoreError, OverrideState, PresenceMonitor,
    RestartRequester,
};

/// Actor recorded for overrides set through the API without `set_by`.
const API_ACTOR: &str = "api";

#[derive(Clone)]
pub struct AppState {
    pub monitor: PresenceMonitor,
    pub gate: Arc<dyn AdminGate>,
    pub restart: Arc<dyn RestartRequester>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/presence", get(presence))
        .route("/api/set-occupancy", post(set_occupancy))
        .route("/api/override", delete(clear_override))
        .route("/api/reset", post(reset))
        .route("/api/debug/state", get(debug_state))
        .route("/api/admin/restart", post(admin_restart))
        .with_state(state)
}

// ── Restart ──────────────────────────────────────────────────────────

/// Restart by shutting down cleanly; `serve` then exits with
/// [`RESTART`](crate::error::exit_code::RESTART) for the supervisor.
#[derive(Debug, Default)]
pub struct ShutdownRestart {
    token: CancellationToken,
    requested: AtomicBool,
}

impl ShutdownRestart {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            requested: AtomicBool::new(false),
        }
    }

    pub fn was_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl RestartRequester for ShutdownRestart {
    fn request_restart(&self, reason: &str) {
        info!(reason, "restart requested");
        self.requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }
}

// ── Errors ───────────────────────────────────────────────────────────

/// JSON error reply: `{ "error": <message> }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput { message } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            other => {
                warn!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": if state.monitor.is_running() { "ok" } else { "stopping" },
        "channels": state.monitor.channels().len(),
    }))
}

async fn presence(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.current_snapshot())
}

#[derive(Debug, Serialize)]
struct OverrideReply {
    #[serde(rename = "override")]
    active: Option<OverrideState>,
    presenti_totali: u32,
}

async fn set_occupancy(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<OverrideReply>, ApiError> {
    let Json(body) = payload?;
    let occupancy = body.get("occupancy").ok_or_else(|| {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "missing field 'occupancy'")
    })?;
    let actor = body
        .get("set_by")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(API_ACTOR);

    let (set, snapshot) = state.monitor.overrides().set_from_json(occupancy, actor).await?;
    Ok(Json(OverrideReply {
        active: Some(set),
        presenti_totali: snapshot.effective_total,
    }))
}

async fn clear_override(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (previous, snapshot) = state.monitor.overrides().clear_override().await?;
    Ok(Json(json!({
        "cleared": previous,
        "presenti_totali": snapshot.effective_total,
    })))
}

async fn reset(State(state): State<AppState>) -> Result<Json<OverrideReply>, ApiError> {
    let (set, snapshot) = state.monitor.overrides().reset().await?;
    Ok(Json(OverrideReply {
        active: Some(set),
        presenti_totali: snapshot.effective_total,
    }))
}

#[derive(Debug, Serialize)]
struct DebugState {
    running: bool,
    presenti_totali: u32,
    live_total: u32,
    override_policy: String,
    interval_ms: u128,
    stale_after_ms: u128,
    /// The override shaping the total, as in `/api/presence`.
    #[serde(rename = "override")]
    active_override: Option<OverrideState>,
    /// The override the controller holds, even if the policy ignores it.
    stored_override: Option<OverrideState>,
    polled: Vec<ChannelId>,
    channels: Vec<ChannelReading>,
    warnings: Vec<String>,
}

async fn debug_state(State(state): State<AppState>) -> Json<DebugState> {
    let monitor = &state.monitor;
    let snapshot = monitor.current_snapshot();
    let config = monitor.config();
    Json(DebugState {
        running: monitor.is_running(),
        presenti_totali: snapshot.effective_total,
        live_total: snapshot.live_total,
        override_policy: config.override_policy.to_string(),
        interval_ms: config.polling.interval.as_millis(),
        stale_after_ms: config.polling.stale_after().as_millis(),
        active_override: snapshot.active_override.clone(),
        stored_override: monitor.active_override().await,
        polled: monitor.channels().to_vec(),
        channels: snapshot.channels.values().cloned().collect(),
        warnings: monitor.warnings().to_vec(),
    })
}

async fn admin_restart(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if !state.gate.is_authorized(bearer) {
        warn!("restart refused: bad or missing admin token");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"));
    }
    state.restart.request_restart("admin api");
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "restarting" }))))
}
