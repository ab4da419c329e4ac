//! The pull protocol: agents list, claim, hand back and report jobs.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use crate::core::agents::AgentHandle;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::jobs::{JobReport, JobStatus};

pub async fn list_job_requests(
    State(state): State<AppState>,
    Json(handle): Json<AgentHandle>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let requests = state.dispatcher.list_job_requests(&handle).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "requests": requests
    })))
}

#[derive(Deserialize)]
pub struct ClaimQuery {
    job_id: String,
    agent_id: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

pub async fn accept_job_request(
    State(state): State<AppState>,
    Query(query): Query<ClaimQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let job = state
        .dispatcher
        .accept(&query.job_id, &query.agent_id, query.tenant_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "job": job })))
}

pub async fn reject_job_request(
    State(state): State<AppState>,
    Query(query): Query<ClaimQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(JobStatus::from_status(&raw.to_ascii_uppercase()).ok_or_else(|| {
            ControlPlaneError::InvalidRequest(format!("unknown job status '{raw}'"))
        })?),
    };
    let job = state
        .dispatcher
        .reject(&query.job_id, &query.agent_id, status, query.tenant_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "job": job })))
}

pub async fn report_jobs(
    State(state): State<AppState>,
    Json(reports): Json<Vec<JobReport>>,
) -> Json<serde_json::Value> {
    let acks = state.dispatcher.report(reports).await;
    Json(serde_json::json!({ "success": true, "acks": acks }))
}
