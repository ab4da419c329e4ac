use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;

use super::jobs::insert_job;
use super::rows::{Conditions, TRIGGER_COLUMNS, to_json_text, trigger_from_row};
use super::types::{NewTrigger, Trigger, TriggerFilter};
use super::{ControlPlaneStore, now_ts};
use crate::core::jobs::{Job, JobStatus, NewJob};

fn load_trigger(db: &Connection, trigger_id: &str) -> rusqlite::Result<Option<Trigger>> {
    db.query_row(
        &format!("SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = ?1"),
        params![trigger_id],
        trigger_from_row,
    )
    .optional()
}

fn trigger_conditions(filter: &TriggerFilter) -> Conditions {
    let mut conditions = Conditions::default();
    if let Some(tenant_id) = &filter.tenant_id {
        conditions.push("tenant_id = ?", tenant_id.clone());
    }
    if let Some(integration_id) = &filter.integration_id {
        conditions.push("integration_id = ?", integration_id.clone());
    }
    if let Some(trigger_type) = &filter.trigger_type {
        conditions.push("trigger_type = ?", trigger_type.clone());
    }
    conditions
}

/// A job planned for one trigger iteration.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub job: NewJob,
    pub partial: bool,
}

impl ControlPlaneStore {
    pub async fn create_trigger(&self, new: &NewTrigger) -> Result<Trigger> {
        if let Err(reason) = new.validate() {
            bail!(reason);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO triggers (id, tenant_id, integration_id, trigger_type, frequency_minutes,
                 metadata_json, callback_url, settings_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.tenant_id,
                new.integration_id,
                new.trigger_type,
                new.frequency_minutes,
                to_json_text(&new.metadata),
                new.callback_url,
                to_json_text(&new.settings),
                now_ts(),
            ],
        )
        .with_context(|| format!("inserting {} trigger", new.trigger_type))?;
        load_trigger(&db, &id)?.context("trigger vanished right after insert")
    }

    pub async fn get_trigger(&self, trigger_id: &str) -> Result<Option<Trigger>> {
        let db = self.db.lock().await;
        Ok(load_trigger(&db, trigger_id)?)
    }

    pub async fn list_triggers(&self, filter: &TriggerFilter) -> Result<Vec<Trigger>> {
        let conditions = trigger_conditions(filter);
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers{} ORDER BY created_at ASC, rowid ASC",
            conditions.where_sql()
        ))?;
        let rows = stmt.query_map(params_from_iter(conditions.values()), trigger_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Triggers whose frequency window has elapsed since their last iteration.
    pub async fn due_triggers(&self, now: i64) -> Result<Vec<Trigger>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers
             WHERE iteration_ts IS NULL OR ?1 - iteration_ts >= frequency_minutes * 60
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![now], trigger_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn update_trigger_frequency(&self, trigger_id: &str, minutes: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE triggers SET frequency_minutes = ?1 WHERE id = ?2",
            params![minutes, trigger_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn update_trigger_metadata(&self, trigger_id: &str, metadata: &Value) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE triggers SET metadata_json = ?1 WHERE id = ?2",
            params![to_json_text(metadata), trigger_id],
        )?;
        Ok(rows > 0)
    }

    /// Deletes a trigger along with its iteration links. Jobs are kept.
    pub async fn delete_trigger(&self, trigger_id: &str) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM triggered_jobs WHERE trigger_id = ?1",
            params![trigger_id],
        )?;
        let rows = tx.execute("DELETE FROM triggers WHERE id = ?1", params![trigger_id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    pub async fn delete_triggers(&self, filter: &TriggerFilter) -> Result<usize> {
        if filter.is_empty() {
            bail!("refusing to delete triggers without a filter");
        }
        let conditions = trigger_conditions(filter);
        let where_sql = conditions.where_sql();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM triggered_jobs WHERE trigger_id IN (SELECT id FROM triggers{where_sql})"
            ),
            params_from_iter(conditions.values()),
        )?;
        let rows = tx.execute(
            &format!("DELETE FROM triggers{where_sql}"),
            params_from_iter(conditions.values()),
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Inserts the jobs of one iteration and links them to the trigger.
    ///
    /// Runs in a single transaction so a failed iteration leaves nothing behind.
    /// Jobs are created `SCHEDULED`, claimable as soon as the transaction commits.
    pub async fn create_iteration_jobs(
        &self,
        trigger_id: &str,
        iteration_id: &str,
        iteration_ts: i64,
        planned: &[PlannedJob],
    ) -> Result<Vec<Job>> {
        let now = now_ts();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut jobs = Vec::with_capacity(planned.len());
        for plan in planned {
            let job = insert_job(&tx, &plan.job, JobStatus::Scheduled, now)?;
            tx.execute(
                "INSERT INTO triggered_jobs (job_id, trigger_id, iteration_id, iteration_ts, partial, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![job.id, trigger_id, iteration_id, iteration_ts, plan.partial, now],
            )?;
            jobs.push(job);
        }
        tx.commit()
            .with_context(|| format!("committing iteration {iteration_id}"))?;
        Ok(jobs)
    }

    /// Moves the trigger's iteration pointer forward. Never moves it backwards.
    pub async fn advance_trigger_iteration(
        &self,
        trigger_id: &str,
        iteration_id: &str,
        iteration_ts: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE triggers SET iteration_id = ?1, iteration_ts = ?2
             WHERE id = ?3 AND (iteration_ts IS NULL OR iteration_ts <= ?2)",
            params![iteration_id, iteration_ts, trigger_id],
        )?;
        Ok(rows > 0)
    }
}
