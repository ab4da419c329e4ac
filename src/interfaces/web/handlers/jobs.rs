use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::super::AppState;
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::jobs::{JobFilter, JobStatus, NewJob, RetryOptions};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Query-string form of [`JobFilter`]; `status` takes a comma-separated list.
#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    integration_id: Option<String>,
    #[serde(default)]
    controller_name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    trigger_id: Option<String>,
    #[serde(default)]
    created_after: Option<i64>,
    #[serde(default)]
    created_before: Option<i64>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
}

pub(crate) fn parse_statuses(raw: Option<&str>) -> ControlPlaneResult<Vec<JobStatus>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            JobStatus::from_status(&s.to_ascii_uppercase())
                .ok_or_else(|| ControlPlaneError::InvalidRequest(format!("unknown job status '{s}'")))
        })
        .collect()
}

pub(crate) fn page_params(page: Option<usize>, page_size: Option<usize>) -> (usize, usize) {
    let size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page.unwrap_or(0), size)
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let filter = JobFilter {
        statuses: parse_statuses(query.status.as_deref())?,
        tenant_id: query.tenant_id,
        integration_id: query.integration_id,
        controller_name: query.controller_name,
        parent_id: query.parent_id,
        trigger_id: query.trigger_id,
        created_after: query.created_after,
        created_before: query.created_before,
    };
    let (page, page_size) = page_params(query.page, query.page_size);
    let jobs = state.dispatcher.filter_jobs(&filter, page, page_size).await?;
    Ok(Json(serde_json::json!({ "success": true, "jobs": jobs })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    /// Create the job `UNASSIGNED`; it waits for `PUT /api/jobs/{id}/schedule`.
    #[serde(default)]
    hold: bool,
}

pub async fn submit_job(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    Json(new): Json<NewJob>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let job = if query.hold {
        state.dispatcher.create(new).await?
    } else {
        state.dispatcher.submit(new).await?
    };
    Ok(Json(serde_json::json!({ "success": true, "job": job })))
}

pub async fn schedule_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let job = state.dispatcher.schedule(&job_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "job": job })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let job = state.dispatcher.require_job(&job_id).await?;
    let triggered_by = state.store.triggered_job_by_job_id(&job_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "job": job,
        "triggered_by": triggered_by
    })))
}

pub async fn list_sub_jobs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let children = state.dispatcher.list_sub_jobs(&job_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "jobs": children })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryQuery {
    #[serde(default)]
    clear_intermediate_state: bool,
    #[serde(default)]
    clear_errors: bool,
    #[serde(default)]
    tenant_id: Option<String>,
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<RetryQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    if let Some(declared) = query.tenant_id.as_deref() {
        let job = state.dispatcher.require_job(&job_id).await?;
        if job.tenant_id.as_deref() != Some(declared) {
            return Err(ControlPlaneError::TenantMismatch {
                declared: declared.to_string(),
                actual: job.tenant_id.unwrap_or_default(),
            });
        }
    }
    let options = RetryOptions {
        clear_intermediate_state: query.clear_intermediate_state,
        clear_errors: query.clear_errors,
    };
    let job = state.dispatcher.retry(&job_id, options).await?;
    Ok(Json(serde_json::json!({ "success": true, "job": job })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_case_insensitively() {
        let parsed = parse_statuses(Some("scheduled, FAILURE")).unwrap();
        assert_eq!(parsed, vec![JobStatus::Scheduled, JobStatus::Failure]);
        assert!(parse_statuses(None).unwrap().is_empty());
        assert!(parse_statuses(Some("DONE")).is_err());
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_params(None, None), (0, DEFAULT_PAGE_SIZE));
        assert_eq!(page_params(Some(2), Some(0)), (2, 1));
        assert_eq!(page_params(None, Some(10_000)), (0, MAX_PAGE_SIZE));
    }
}
