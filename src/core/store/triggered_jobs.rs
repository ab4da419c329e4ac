use anyhow::Result;
use rusqlite::{OptionalExtension, params, params_from_iter};

use super::ControlPlaneStore;
use super::jobs::load_job;
use super::rows::{Conditions, TRIGGERED_JOB_COLUMNS, triggered_job_from_row};
use super::types::{Iteration, Page, TriggeredJob, TriggeredJobFilter};
use crate::core::jobs::Job;

const TRIGGERED_JOB_FROM: &str = "triggered_jobs tj JOIN jobs j ON j.id = tj.job_id";
const NEWEST_FIRST: &str = "tj.iteration_ts DESC, tj.created_at DESC, tj.rowid DESC";

fn filter_conditions(trigger_id: &str, filter: &TriggeredJobFilter) -> Conditions {
    let mut conditions = Conditions::default();
    conditions.push("tj.trigger_id = ?", trigger_id.to_string());
    if !filter.statuses.is_empty() {
        conditions.push_in(
            "j.status",
            filter.statuses.iter().map(|s| s.as_str().to_string()),
        );
    }
    if let Some(partial) = filter.partial {
        conditions.push("tj.partial = ?", partial);
    }
    if let Some(after) = filter.after_exclusive {
        conditions.push("tj.iteration_ts > ?", after);
    }
    if let Some(from) = filter.not_before {
        conditions.push("tj.iteration_ts >= ?", from);
    }
    if let Some(before) = filter.before_inclusive {
        conditions.push("tj.iteration_ts <= ?", before);
    }
    if let Some(default_max) = filter.below_max_attempts_or {
        conditions.push("j.attempt_count < COALESCE(j.attempt_max, ?)", default_max);
    }
    conditions
}

impl ControlPlaneStore {
    /// Links for one trigger, newest iteration first.
    pub async fn filter_triggered_jobs(
        &self,
        trigger_id: &str,
        filter: &TriggeredJobFilter,
        page: usize,
        page_size: usize,
    ) -> Result<Page<TriggeredJob>> {
        let conditions = filter_conditions(trigger_id, filter);
        let where_sql = conditions.where_sql();
        let db = self.db.lock().await;
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM {TRIGGERED_JOB_FROM}{where_sql}"),
            params_from_iter(conditions.values()),
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGERED_JOB_COLUMNS} FROM {TRIGGERED_JOB_FROM}{where_sql}
             ORDER BY {NEWEST_FIRST} LIMIT {page_size} OFFSET {}",
            Page::<TriggeredJob>::offset(page, page_size)
        ))?;
        let records = stmt
            .query_map(params_from_iter(conditions.values()), triggered_job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            records,
            total: total.max(0) as usize,
            page,
            page_size,
        })
    }

    pub async fn latest_triggered_job(
        &self,
        trigger_id: &str,
        filter: &TriggeredJobFilter,
    ) -> Result<Option<TriggeredJob>> {
        let page = self.filter_triggered_jobs(trigger_id, filter, 0, 1).await?;
        Ok(page.records.into_iter().next())
    }

    /// Matching links joined with their jobs, newest iteration first.
    pub async fn triggered_job_results(
        &self,
        trigger_id: &str,
        filter: &TriggeredJobFilter,
        limit: Option<usize>,
    ) -> Result<Vec<(TriggeredJob, Job)>> {
        let conditions = filter_conditions(trigger_id, filter);
        let limit_sql = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGERED_JOB_COLUMNS} FROM {TRIGGERED_JOB_FROM}{}
             ORDER BY {NEWEST_FIRST}{limit_sql}",
            conditions.where_sql()
        ))?;
        let links = stmt
            .query_map(params_from_iter(conditions.values()), triggered_job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut out = Vec::with_capacity(links.len());
        for link in links {
            if let Some(job) = load_job(&db, &link.job_id)? {
                out.push((link, job));
            }
        }
        Ok(out)
    }

    pub async fn triggered_jobs_by_iteration(&self, iteration_id: &str) -> Result<Vec<TriggeredJob>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGERED_JOB_COLUMNS} FROM triggered_jobs tj
             WHERE tj.iteration_id = ?1 ORDER BY tj.created_at ASC, tj.rowid ASC"
        ))?;
        let rows = stmt.query_map(params![iteration_id], triggered_job_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn triggered_job_by_job_id(&self, job_id: &str) -> Result<Option<TriggeredJob>> {
        let db = self.db.lock().await;
        Ok(db
            .query_row(
                &format!("SELECT {TRIGGERED_JOB_COLUMNS} FROM triggered_jobs tj WHERE tj.job_id = ?1"),
                params![job_id],
                triggered_job_from_row,
            )
            .optional()?)
    }

    /// Distinct iterations of a trigger, newest first.
    pub async fn iterations_by_trigger(
        &self,
        trigger_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Page<Iteration>> {
        let db = self.db.lock().await;
        let total: i64 = db.query_row(
            "SELECT COUNT(DISTINCT iteration_id) FROM triggered_jobs WHERE trigger_id = ?1",
            params![trigger_id],
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT iteration_id, MAX(iteration_ts), COUNT(*) FROM triggered_jobs
             WHERE trigger_id = ?1 GROUP BY iteration_id
             ORDER BY MAX(iteration_ts) DESC LIMIT {page_size} OFFSET {}",
            Page::<Iteration>::offset(page, page_size)
        ))?;
        let records = stmt
            .query_map(params![trigger_id], |row| {
                Ok(Iteration {
                    iteration_id: row.get(0)?,
                    iteration_ts: row.get(1)?,
                    job_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            records,
            total: total.max(0) as usize,
            page,
            page_size,
        })
    }
}
