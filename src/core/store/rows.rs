use rusqlite::Row;
use rusqlite::types::Type;
use serde_json::Value;

use super::types::{Trigger, TriggeredJob};
use crate::core::jobs::{Job, JobStatus};

pub(super) const JOB_COLUMNS: &str = "id, controller_name, query_json, tenant_id, integration_id, reserved, \
     tags_json, status, level, parent_id, attempt_count, attempt_max, agent_id, result_json, \
     error_json, ingestion_failures_json, intermediate_state_json, callback_url, created_at, \
     status_changed_at";

pub(super) const TRIGGER_COLUMNS: &str = "id, tenant_id, integration_id, trigger_type, frequency_minutes, \
     metadata_json, callback_url, iteration_id, iteration_ts, settings_json, created_at";

pub(super) const TRIGGERED_JOB_COLUMNS: &str =
    "tj.job_id, tj.trigger_id, tj.iteration_id, tj.iteration_ts, tj.partial, tj.created_at";

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(super) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
    }
}

fn json_array_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<Value>> {
    match json_column(row, idx)? {
        Some(Value::Array(items)) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<JobStatus> {
    let raw: String = row.get(idx)?;
    JobStatus::from_status(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown job status '{raw}'").into(),
        )
    })
}

pub(super) fn to_json_text(value: &Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(super) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let tags = json_array_column(row, 6)?
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    Ok(Job {
        id: row.get(0)?,
        controller_name: row.get(1)?,
        query: json_column(row, 2)?.unwrap_or(Value::Null),
        tenant_id: row.get(3)?,
        integration_id: row.get(4)?,
        reserved: row.get::<_, i64>(5)? != 0,
        tags,
        status: status_column(row, 7)?,
        level: row.get(8)?,
        parent_id: row.get(9)?,
        attempt_count: row.get(10)?,
        attempt_max: row.get(11)?,
        agent_id: row.get(12)?,
        result: json_column(row, 13)?,
        error: json_column(row, 14)?,
        ingestion_failures: json_array_column(row, 15)?,
        intermediate_state: json_column(row, 16)?,
        callback_url: row.get(17)?,
        created_at: row.get(18)?,
        status_changed_at: row.get(19)?,
    })
}

pub(super) fn trigger_from_row(row: &Row<'_>) -> rusqlite::Result<Trigger> {
    Ok(Trigger {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        integration_id: row.get(2)?,
        trigger_type: row.get(3)?,
        frequency_minutes: row.get(4)?,
        metadata: json_column(row, 5)?.unwrap_or(Value::Null),
        callback_url: row.get(6)?,
        iteration_id: row.get(7)?,
        iteration_ts: row.get(8)?,
        settings: json_column(row, 9)?.unwrap_or(Value::Null),
        created_at: row.get(10)?,
    })
}

pub(super) fn triggered_job_from_row(row: &Row<'_>) -> rusqlite::Result<TriggeredJob> {
    Ok(TriggeredJob {
        job_id: row.get(0)?,
        trigger_id: row.get(1)?,
        iteration_id: row.get(2)?,
        iteration_ts: row.get(3)?,
        partial: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

/// Accumulates `AND`-joined predicates with positional parameters.
#[derive(Default)]
pub(super) struct Conditions {
    clauses: Vec<String>,
    values: Vec<rusqlite::types::Value>,
}

impl Conditions {
    pub(super) fn push(&mut self, clause: impl Into<String>, value: impl Into<rusqlite::types::Value>) {
        self.clauses.push(clause.into());
        self.values.push(value.into());
    }

    pub(super) fn push_raw(&mut self, clause: impl Into<String>) {
        self.clauses.push(clause.into());
    }

    /// Adds `column IN (?, ?, ...)`. An empty set matches nothing.
    pub(super) fn push_in<I, V>(&mut self, column: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<rusqlite::types::Value>,
    {
        let before = self.values.len();
        self.values.extend(values.into_iter().map(Into::into));
        let count = self.values.len() - before;
        if count == 0 {
            self.clauses.push("0".to_string());
        } else {
            let marks = vec!["?"; count].join(", ");
            self.clauses.push(format!("{column} IN ({marks})"));
        }
    }

    pub(super) fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(super) fn values(&self) -> &[rusqlite::types::Value] {
        &self.values
    }
}
