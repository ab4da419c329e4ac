use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use crate::core::agents::AgentHandle;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::store::now_ts;

pub async fn register_agent(
    State(state): State<AppState>,
    Json(handle): Json<AgentHandle>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let agent = state.agents.register(handle, now_ts()).await?;
    Ok(Json(serde_json::json!({ "success": true, "agent": agent })))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(handle): Json<AgentHandle>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let agent = state.agents.heartbeat(handle, now_ts()).await?;
    Ok(Json(serde_json::json!({ "success": true, "agent": agent })))
}

#[derive(Deserialize)]
pub struct HeartbeatQuery {
    agent_id: String,
    #[serde(default)]
    tenant_id: Option<String>,
}

/// Liveness ping for agents that only send their id; capabilities stay as registered.
pub async fn heartbeat_ping(
    State(state): State<AppState>,
    Query(query): Query<HeartbeatQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let known = state
        .agents
        .get(&query.agent_id)
        .await
        .ok_or_else(|| ControlPlaneError::not_found("agent", query.agent_id.clone()))?;
    let handle = AgentHandle {
        tenant_id: query.tenant_id,
        ..known.handle
    };
    let agent = state.agents.heartbeat(handle, now_ts()).await?;
    Ok(Json(serde_json::json!({ "success": true, "agent": agent })))
}

pub async fn list_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let agents = state.agents.list().await;
    Json(serde_json::json!({
        "success": true,
        "agents": agents
    }))
}
