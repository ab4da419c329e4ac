use axum::{Json, extract::State};
use tracing::info;

use super::super::AppState;

pub async fn enable_scheduling(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduling.enable();
    info!("Trigger scheduling enabled");
    Json(serde_json::json!({ "success": true, "enabled": true }))
}

pub async fn disable_scheduling(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduling.disable();
    info!("Trigger scheduling disabled");
    Json(serde_json::json!({ "success": true, "enabled": false }))
}

pub async fn scheduling_enabled(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "enabled": state.scheduling.is_enabled()
    }))
}
