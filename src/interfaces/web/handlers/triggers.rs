use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::info;

use super::super::AppState;
use super::jobs::{page_params, parse_statuses};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::results::ResultOptions;
use crate::core::store::{
    NewTrigger, Trigger, TriggerFilter, TriggeredJobFilter, validate_frequency,
};

async fn require_trigger(state: &AppState, trigger_id: &str) -> ControlPlaneResult<Trigger> {
    state
        .store
        .get_trigger(trigger_id)
        .await?
        .ok_or_else(|| ControlPlaneError::not_found("trigger", trigger_id))
}

pub async fn list_triggers(
    State(state): State<AppState>,
    Query(filter): Query<TriggerFilter>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let triggers = state.store.list_triggers(&filter).await?;
    Ok(Json(serde_json::json!({ "success": true, "triggers": triggers })))
}

pub async fn create_trigger(
    State(state): State<AppState>,
    Json(new): Json<NewTrigger>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    new.validate().map_err(ControlPlaneError::InvalidRequest)?;
    let trigger = state.store.create_trigger(&new).await?;
    info!(
        trigger_id = %trigger.id,
        trigger_type = %trigger.trigger_type,
        tenant_id = ?trigger.tenant_id,
        frequency_minutes = trigger.frequency_minutes,
        "Trigger created"
    );
    Ok(Json(serde_json::json!({ "success": true, "trigger": trigger })))
}

pub async fn get_trigger(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let trigger = require_trigger(&state, &trigger_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "trigger": trigger })))
}

pub async fn delete_trigger(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    if !state.store.delete_trigger(&trigger_id).await? {
        return Err(ControlPlaneError::not_found("trigger", trigger_id));
    }
    info!(trigger_id = %trigger_id, "Trigger deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Bulk delete. An empty filter is refused rather than wiping every trigger.
pub async fn delete_triggers(
    State(state): State<AppState>,
    Query(filter): Query<TriggerFilter>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    if filter.is_empty() {
        return Err(ControlPlaneError::InvalidRequest(
            "refusing to delete triggers without a tenant_id, integration_id or trigger_type filter".into(),
        ));
    }
    let deleted = state.store.delete_triggers(&filter).await?;
    info!(deleted, filter = ?filter, "Triggers deleted");
    Ok(Json(serde_json::json!({ "success": true, "deleted": deleted })))
}

#[derive(Deserialize)]
pub struct FrequencyRequest {
    frequency_minutes: i64,
}

pub async fn update_frequency(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Json(payload): Json<FrequencyRequest>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    validate_frequency(payload.frequency_minutes).map_err(ControlPlaneError::InvalidRequest)?;
    if !state
        .store
        .update_trigger_frequency(&trigger_id, payload.frequency_minutes)
        .await?
    {
        return Err(ControlPlaneError::not_found("trigger", trigger_id));
    }
    let trigger = require_trigger(&state, &trigger_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "trigger": trigger })))
}

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Json(metadata): Json<serde_json::Value>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    if !state.store.update_trigger_metadata(&trigger_id, &metadata).await? {
        return Err(ControlPlaneError::not_found("trigger", trigger_id));
    }
    let trigger = require_trigger(&state, &trigger_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "trigger": trigger })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
}

pub async fn list_iterations(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    require_trigger(&state, &trigger_id).await?;
    let (page, page_size) = page_params(query.page, query.page_size);
    let iterations = state
        .store
        .iterations_by_trigger(&trigger_id, page, page_size)
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "iterations": iterations })))
}

/// Query-string form of [`TriggeredJobFilter`]; `status` takes a comma-separated list.
#[derive(Debug, Default, Deserialize)]
pub struct TriggeredJobsQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    partial: Option<bool>,
    #[serde(default)]
    after: Option<i64>,
    #[serde(default)]
    not_before: Option<i64>,
    #[serde(default)]
    before: Option<i64>,
    #[serde(default)]
    below_max_attempts: Option<i64>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
}

impl TriggeredJobsQuery {
    fn filter(&self) -> ControlPlaneResult<TriggeredJobFilter> {
        let mut filter =
            TriggeredJobFilter::default().statuses(&parse_statuses(self.status.as_deref())?);
        if let Some(partial) = self.partial {
            filter = filter.partial(partial);
        }
        if let Some(ts) = self.after {
            filter = filter.after_exclusive(ts);
        }
        if let Some(ts) = self.not_before {
            filter = filter.not_before(ts);
        }
        if let Some(ts) = self.before {
            filter = filter.before_inclusive(ts);
        }
        if let Some(max) = self.below_max_attempts {
            filter = filter.below_max_attempts_or(max);
        }
        Ok(filter)
    }
}

/// Raw iteration links of a trigger, newest first.
pub async fn list_triggered_jobs(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Query(query): Query<TriggeredJobsQuery>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    require_trigger(&state, &trigger_id).await?;
    let filter = query.filter()?;
    let (page, page_size) = page_params(query.page, query.page_size);
    let links = state
        .store
        .filter_triggered_jobs(&trigger_id, &filter, page, page_size)
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "triggered_jobs": links })))
}

pub async fn iteration_results(
    State(state): State<AppState>,
    Path((trigger_id, iteration_id)): Path<(String, String)>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let results = state.results.at_iteration(&trigger_id, &iteration_id).await?;
    Ok(Json(serde_json::json!({ "success": true, "results": results })))
}

/// Which window `/results` answers for. The rest of the query string is read as
/// [`ResultOptions`].
#[derive(Debug, Default, Deserialize)]
pub struct ResultWindow {
    #[serde(default)]
    iteration_id: Option<String>,
    #[serde(default)]
    last_n_jobs: Option<usize>,
    #[serde(default)]
    before: Option<i64>,
}

pub async fn trigger_results(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Query(window): Query<ResultWindow>,
    Query(options): Query<ResultOptions>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let results = match (&window.iteration_id, window.last_n_jobs) {
        (Some(_), Some(_)) => {
            return Err(ControlPlaneError::InvalidRequest(
                "iteration_id and last_n_jobs are mutually exclusive".into(),
            ));
        }
        (Some(iteration_id), None) => state.results.since(&trigger_id, iteration_id, &options).await?,
        (None, Some(n)) => {
            state
                .results
                .last_n(&trigger_id, n, window.before, &options)
                .await?
        }
        (None, None) => state.results.latest(&trigger_id, &options).await?,
    };
    Ok(Json(serde_json::json!({ "success": true, "results": results })))
}

pub async fn latest_trigger_results(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    Query(options): Query<ResultOptions>,
) -> ControlPlaneResult<Json<serde_json::Value>> {
    let results = state.results.latest(&trigger_id, &options).await?;
    Ok(Json(serde_json::json!({ "success": true, "results": results })))
}
