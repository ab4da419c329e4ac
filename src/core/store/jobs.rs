use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::{Value, json};

use super::rows::{Conditions, JOB_COLUMNS, job_from_row, to_json_text};
use super::types::Page;
use super::{ControlPlaneStore, now_ts};
use crate::core::jobs::{
    Job, JobFilter, JobReport, JobStatus, NewJob, RequestScope, RetryOptions, can_transition,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Job),
    NotFound,
    /// Someone else got there first, or the job left `SCHEDULED`.
    Conflict { status: JobStatus },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectOutcome {
    Rejected(Job),
    NotFound,
    NotHeld { status: JobStatus },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Applied { status: JobStatus },
    UnknownJob,
    AlreadyFinal { status: JobStatus },
    NotClaimant { holder: Option<String> },
    InvalidTransition { from: JobStatus, to: JobStatus },
    /// The row changed between read and write.
    Superseded,
}

pub(super) fn load_job(db: &Connection, job_id: &str) -> rusqlite::Result<Option<Job>> {
    db.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![job_id],
        job_from_row,
    )
    .optional()
}

pub(super) fn insert_job(
    db: &Connection,
    new: &NewJob,
    status: JobStatus,
    now: i64,
) -> Result<Job> {
    let mut tenant_id = new.tenant_id.clone();
    let mut integration_id = new.integration_id.clone();
    let mut level = 0;
    if let Some(parent_id) = &new.parent_id {
        let Some(parent) = load_job(db, parent_id)? else {
            bail!("parent job {parent_id} does not exist");
        };
        level = parent.level + 1;
        tenant_id = tenant_id.or(parent.tenant_id);
        integration_id = integration_id.or(parent.integration_id);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let tags = serde_json::to_string(&new.tags)?;
    db.execute(
        "INSERT INTO jobs (id, controller_name, query_json, tenant_id, integration_id, reserved,
             tags_json, status, level, parent_id, attempt_count, attempt_max,
             intermediate_state_json, callback_url, created_at, status_changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?14, ?14)",
        params![
            id,
            new.controller_name,
            to_json_text(&new.query),
            tenant_id,
            integration_id,
            new.reserved,
            tags,
            status.as_str(),
            level,
            new.parent_id,
            new.attempt_max,
            new.intermediate_state.as_ref().and_then(to_json_text),
            new.callback_url,
            now,
        ],
    )
    .with_context(|| format!("inserting job for controller {}", new.controller_name))?;

    load_job(db, &id)?.context("job vanished right after insert")
}

/// Appends the failures of attempt number `attempt`. Each object is stamped with
/// the attempt it belongs to, so only a replay of the same attempt's report is dropped.
fn merge_failures(existing: &[Value], incoming: &[Value], attempt: i64) -> Vec<Value> {
    let mut merged = existing.to_vec();
    for failure in incoming {
        let mut failure = failure.clone();
        if let Value::Object(fields) = &mut failure {
            fields.entry("attempt").or_insert(json!(attempt));
        }
        if !merged.contains(&failure) {
            merged.push(failure);
        }
    }
    merged
}

fn opt_json(value: &Option<Value>) -> Option<String> {
    value.as_ref().and_then(to_json_text)
}

impl ControlPlaneStore {
    pub async fn create_job(&self, new: &NewJob) -> Result<Job> {
        let db = self.db.lock().await;
        insert_job(&db, new, JobStatus::Unassigned, now_ts())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let db = self.db.lock().await;
        Ok(load_job(&db, job_id)?)
    }

    /// Moves an `UNASSIGNED` job into the claimable pool.
    pub async fn schedule_job(&self, job_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET status = 'SCHEDULED', status_changed_at = ?1
             WHERE id = ?2 AND status = 'UNASSIGNED'",
            params![now_ts(), job_id],
        )?;
        Ok(rows > 0)
    }

    /// Claimable jobs visible to an agent, oldest first.
    pub async fn list_job_requests(&self, scope: &RequestScope) -> Result<Vec<Job>> {
        let mut conditions = Conditions::default();
        conditions.push_raw("status = 'SCHEDULED'");
        conditions.push_in("controller_name", scope.controller_names.iter().cloned());
        if let Some(tenant_id) = &scope.tenant_id {
            conditions.push("tenant_id = ?", tenant_id.clone());
        }
        if !scope.integration_ids.is_empty() {
            conditions.push_in("integration_id", scope.integration_ids.iter().cloned());
        }
        if !scope.reserved {
            conditions.push_raw("reserved = 0");
        }

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs{} ORDER BY created_at ASC, rowid ASC LIMIT {}",
            conditions.where_sql(),
            scope.limit
        );
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(conditions.values()), job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Atomically claims a `SCHEDULED` job. At most one caller wins.
    pub async fn accept_job(&self, job_id: &str, agent_id: &str) -> Result<ClaimOutcome> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET status = 'ACCEPTED', agent_id = ?1, status_changed_at = ?2
             WHERE id = ?3 AND status = 'SCHEDULED'",
            params![agent_id, now_ts(), job_id],
        )?;
        let job = load_job(&db, job_id)?;
        Ok(match (rows, job) {
            (1, Some(job)) => ClaimOutcome::Claimed(job),
            (_, None) => ClaimOutcome::NotFound,
            (_, Some(job)) => ClaimOutcome::Conflict { status: job.status },
        })
    }

    /// Hands a held job back. Only the current holder may reject.
    pub async fn reject_job(
        &self,
        job_id: &str,
        agent_id: &str,
        status: JobStatus,
    ) -> Result<RejectOutcome> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET status = ?1, agent_id = NULL, status_changed_at = ?2
             WHERE id = ?3 AND status = 'ACCEPTED' AND agent_id = ?4",
            params![status.as_str(), now_ts(), job_id, agent_id],
        )?;
        let job = load_job(&db, job_id)?;
        Ok(match (rows, job) {
            (1, Some(job)) => RejectOutcome::Rejected(job),
            (_, None) => RejectOutcome::NotFound,
            (_, Some(job)) => RejectOutcome::NotHeld { status: job.status },
        })
    }

    /// Folds an agent report into the stored job.
    ///
    /// Reports never claim: only [`accept_job`](Self::accept_job) moves a job into
    /// `ACCEPTED`, and once there only the holder's reports are applied.
    /// Requeueing an accepted job bumps `attempt_count`; once a job's own
    /// `attempt_max` is reached the requeue becomes a terminal `FAILURE`.
    pub async fn apply_report(&self, report: &JobReport) -> Result<ReportOutcome> {
        let db = self.db.lock().await;
        let Some(job) = load_job(&db, &report.job_id)? else {
            return Ok(ReportOutcome::UnknownJob);
        };
        if job.status.is_final() {
            return Ok(ReportOutcome::AlreadyFinal { status: job.status });
        }
        // an accepted job only hears from its holder; anonymous reports never touch it
        let from_claimant = match job.status {
            JobStatus::Accepted => job.agent_id.is_some() && report.agent_id == job.agent_id,
            _ => report.agent_id.is_none() || report.agent_id == job.agent_id,
        };
        if !from_claimant {
            return Ok(ReportOutcome::NotClaimant {
                holder: job.agent_id,
            });
        }
        if !can_transition(job.status, report.status) {
            return Ok(ReportOutcome::InvalidTransition {
                from: job.status,
                to: report.status,
            });
        }

        let now = now_ts();
        let mut target = report.status;
        let releases = job.status == JobStatus::Accepted
            && matches!(
                target,
                JobStatus::Scheduled | JobStatus::Unassigned | JobStatus::Failure
            );
        let attempt_count = if releases {
            job.attempt_count + 1
        } else {
            job.attempt_count
        };
        let mut error = report.error.clone().or_else(|| job.error.clone());
        if target == JobStatus::Scheduled
            && let Some(max) = job.attempt_max
            && attempt_count >= max
        {
            target = JobStatus::Failure;
            error = Some(json!({
                "message": "max attempts reached",
                "attempts": attempt_count,
                "last_error": report.error,
            }));
        }

        let agent_id = match target {
            JobStatus::Scheduled | JobStatus::Unassigned => None,
            _ => job.agent_id.clone(),
        };
        let result = report.result.clone().or_else(|| job.result.clone());
        let state = report
            .intermediate_state
            .clone()
            .or_else(|| job.intermediate_state.clone());
        let failures = merge_failures(
            &job.ingestion_failures,
            &report.ingestion_failures,
            job.attempt_count + 1,
        );
        let changed_at = if target != job.status {
            now
        } else {
            job.status_changed_at
        };

        let rows = db.execute(
            "UPDATE jobs SET status = ?1, attempt_count = ?2, agent_id = ?3, result_json = ?4,
                 error_json = ?5, ingestion_failures_json = ?6, intermediate_state_json = ?7,
                 status_changed_at = ?8
             WHERE id = ?9 AND status = ?10",
            params![
                target.as_str(),
                attempt_count,
                agent_id,
                opt_json(&result),
                opt_json(&error),
                serde_json::to_string(&failures)?,
                opt_json(&state),
                changed_at,
                job.id,
                job.status.as_str(),
            ],
        )?;
        if rows == 0 {
            return Ok(ReportOutcome::Superseded);
        }
        Ok(ReportOutcome::Applied { status: target })
    }

    /// Resets a job to `SCHEDULED` with a fresh attempt budget.
    pub async fn retry_job(&self, job_id: &str, options: RetryOptions) -> Result<Option<Job>> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET status = 'SCHEDULED', attempt_count = 0, agent_id = NULL,
                 status_changed_at = ?1,
                 intermediate_state_json = CASE WHEN ?2 THEN NULL ELSE intermediate_state_json END,
                 error_json = CASE WHEN ?3 THEN NULL ELSE error_json END,
                 ingestion_failures_json = CASE WHEN ?3 THEN '[]' ELSE ingestion_failures_json END
             WHERE id = ?4",
            params![
                now_ts(),
                options.clear_intermediate_state,
                options.clear_errors,
                job_id
            ],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Ok(load_job(&db, job_id)?)
    }

    pub async fn filter_jobs(
        &self,
        filter: &JobFilter,
        page: usize,
        page_size: usize,
    ) -> Result<Page<Job>> {
        let mut conditions = Conditions::default();
        if !filter.statuses.is_empty() {
            conditions.push_in(
                "status",
                filter.statuses.iter().map(|s| s.as_str().to_string()),
            );
        }
        if let Some(tenant_id) = &filter.tenant_id {
            conditions.push("tenant_id = ?", tenant_id.clone());
        }
        if let Some(integration_id) = &filter.integration_id {
            conditions.push("integration_id = ?", integration_id.clone());
        }
        if let Some(controller) = &filter.controller_name {
            conditions.push("controller_name = ?", controller.clone());
        }
        if let Some(parent_id) = &filter.parent_id {
            conditions.push("parent_id = ?", parent_id.clone());
        }
        if let Some(trigger_id) = &filter.trigger_id {
            conditions.push(
                "id IN (SELECT job_id FROM triggered_jobs WHERE trigger_id = ?)",
                trigger_id.clone(),
            );
        }
        if let Some(after) = filter.created_after {
            conditions.push("created_at > ?", after);
        }
        if let Some(before) = filter.created_before {
            conditions.push("created_at <= ?", before);
        }

        let where_sql = conditions.where_sql();
        let db = self.db.lock().await;
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM jobs{where_sql}"),
            params_from_iter(conditions.values()),
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs{where_sql}
             ORDER BY created_at DESC, rowid DESC LIMIT {page_size} OFFSET {}",
            Page::<Job>::offset(page, page_size)
        ))?;
        let records = stmt
            .query_map(params_from_iter(conditions.values()), job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            records,
            total: total.max(0) as usize,
            page,
            page_size,
        })
    }

    pub async fn list_sub_jobs(&self, parent_id: &str) -> Result<Vec<Job>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE parent_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![parent_id], job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
