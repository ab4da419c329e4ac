mod plan;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

use crate::core::store::{ControlPlaneStore, Trigger};

use plan::plan_jobs;

/// Process-wide on/off switch for trigger firing. Shared by the tick job and the API.
#[derive(Clone)]
pub struct SchedulingSwitch(Arc<AtomicBool>);

impl SchedulingSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredIteration {
    pub trigger_id: String,
    pub iteration_id: String,
    pub iteration_ts: i64,
    pub job_ids: Vec<String>,
}

/// Turns due triggers into scheduled jobs.
#[derive(Clone)]
pub struct TriggerScheduler {
    store: ControlPlaneStore,
    switch: SchedulingSwitch,
    default_attempt_max: Option<i64>,
}

impl TriggerScheduler {
    pub fn new(store: ControlPlaneStore, switch: SchedulingSwitch, default_attempt_max: Option<i64>) -> Self {
        Self {
            store,
            switch,
            default_attempt_max,
        }
    }

    /// One scheduling pass. A trigger that fails to fire is logged and left
    /// due, so the next pass tries it again.
    pub async fn run_once(&self, now: i64) -> Result<Vec<FiredIteration>> {
        if !self.switch.is_enabled() {
            debug!("Scheduling disabled, skipping tick");
            return Ok(Vec::new());
        }

        let due = self.store.due_triggers(now).await?;
        let mut fired = Vec::with_capacity(due.len());
        for trigger in due {
            match self.fire(&trigger, now).await {
                Ok(iteration) => fired.push(iteration),
                Err(e) => {
                    error!(trigger_id = %trigger.id, error = %format!("{e:#}"), "Trigger failed to fire")
                }
            }
        }
        Ok(fired)
    }

    /// Creates one iteration for `trigger` at `now`, regardless of whether it is due.
    ///
    /// The iteration pointer only moves after the jobs are committed, so a crash
    /// in between re-fires the trigger instead of skipping a window.
    pub async fn fire(&self, trigger: &Trigger, now: i64) -> Result<FiredIteration> {
        let iteration_id = uuid::Uuid::new_v4().to_string();
        let planned = plan_jobs(trigger, now, self.default_attempt_max);
        let jobs = self
            .store
            .create_iteration_jobs(&trigger.id, &iteration_id, now, &planned)
            .await
            .with_context(|| format!("creating jobs for trigger {}", trigger.id))?;
        self.store
            .advance_trigger_iteration(&trigger.id, &iteration_id, now)
            .await?;

        info!(
            trigger_id = %trigger.id,
            trigger_type = %trigger.trigger_type,
            iteration_id = %iteration_id,
            jobs = jobs.len(),
            "Trigger fired"
        );
        Ok(FiredIteration {
            trigger_id: trigger.id.clone(),
            iteration_id,
            iteration_ts: now,
            job_ids: jobs.into_iter().map(|j| j.id).collect(),
        })
    }
}
