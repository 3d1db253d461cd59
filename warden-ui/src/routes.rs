//! HTTP route handlers for the monitor API.

use std::fs;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use warden::core::phase::{self, LockState};
use warden::io::config::{WardenConfig, load_config};
use warden::io::enforcer::read_rules;
use warden::io::store::FileStore;
use warden::lockout;
use warden::registry::RuleRegistry;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/store", get(get_store))
        .route("/rules", get(get_rules))
        .route("/config", get(get_config))
}

async fn health() -> &'static str {
    "ok"
}

/// Computed lockout status for badge rendering.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub badge: String,
    pub state: String,
    pub remaining_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub reason: Option<String>,
    pub custom_text: Option<String>,
    pub focus_mode: String,
    pub active_rule_ids: Vec<u32>,
}

/// Assemble the status payload from the store and config on disk.
pub fn status_payload(state: &AppState) -> anyhow::Result<StatusPayload> {
    let config = load_config(&state.config_path())?;
    let store = FileStore::new(state.store_path());
    let snapshot = lockout::snapshot(&store)?;
    let now_ms = Utc::now().timestamp_millis();

    let registry = RuleRegistry::new(&store, config.mutex.clone(), config.rule_start_id);
    let active = registry.get_active()?;

    Ok(StatusPayload {
        badge: phase::badge(now_ms, &snapshot, config.relax_minutes),
        state: state_name(phase::classify(now_ms, &snapshot, config.relax_minutes)).to_owned(),
        remaining_ms: phase::remaining_ms(now_ms, &snapshot),
        until_ms: snapshot.until_ms,
        reason: snapshot.reason,
        custom_text: snapshot.custom_text,
        focus_mode: snapshot.focus_mode.as_str().to_owned(),
        active_rule_ids: active.into_iter().collect(),
    })
}

fn state_name(state: LockState) -> &'static str {
    match state {
        LockState::Idle => "idle",
        LockState::Active => "active",
        LockState::RelaxPhase => "relax",
        LockState::FocusPhase => "focus",
        LockState::Expired => "expired",
    }
}

/// GET /api/status - computed badge, state, and countdown.
async fn get_status(State(state): State<AppState>) -> Result<Json<StatusPayload>, StatusCode> {
    status_payload(&state).map(Json).map_err(|err| {
        warn!(error = %format!("{err:#}"), "status payload failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/store - raw store contents. A missing store reads as empty.
async fn get_store(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let path = state.store_path();
    if !path.exists() {
        return Ok(Json(Value::Object(serde_json::Map::new())));
    }
    let contents = fs::read_to_string(&path).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(value))
}

/// GET /api/rules - enforcer rulesets and installed rules.
async fn get_rules(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let rules = read_rules(&state.rules_path()).map_err(|err| {
        warn!(error = %format!("{err:#}"), "rules read failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    serde_json::to_value(rules)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// GET /api/config - effective configuration (defaults filled in).
async fn get_config(State(state): State<AppState>) -> Result<Json<WardenConfig>, StatusCode> {
    load_config(&state.config_path()).map(Json).map_err(|err| {
        warn!(error = %format!("{err:#}"), "config read failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
