use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::jobs::{Job, JobStatus};
use crate::core::store::{ControlPlaneStore, Trigger, TriggeredJob, TriggeredJobFilter};

fn default_true() -> bool {
    true
}

/// Options shared by every result query. Field names match the query string.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultOptions {
    /// `true`: newest iteration only. `false`: everything back to the newest full scan.
    #[serde(default)]
    pub partial: bool,
    #[serde(default = "default_true")]
    pub only_successful_results: bool,
    /// When false, jobs whose result is explicitly empty are left out.
    #[serde(default)]
    pub allow_empty_results: bool,
    #[serde(default = "default_true", rename = "include_job_result_field")]
    pub include_result: bool,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl Default for ResultOptions {
    fn default() -> Self {
        Self {
            partial: false,
            only_successful_results: true,
            allow_empty_results: false,
            include_result: true,
            page: None,
            page_size: None,
        }
    }
}

impl ResultOptions {
    fn status_filter(&self) -> TriggeredJobFilter {
        let statuses: &[JobStatus] = if self.only_successful_results {
            &[JobStatus::Success]
        } else {
            &[JobStatus::Success, JobStatus::Failure]
        };
        TriggeredJobFilter::default().statuses(statuses)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggeredJobResult {
    #[serde(flatten)]
    pub job: Job,
    pub iteration_id: String,
    pub iteration_ts: i64,
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerResults {
    pub trigger_id: String,
    pub trigger_type: String,
    pub tenant_id: Option<String>,
    pub integration_id: Option<String>,
    pub iteration_id: Option<String>,
    pub partial: bool,
    pub jobs: Vec<TriggeredJobResult>,
    pub has_next: bool,
}

fn is_explicitly_empty(result: Option<&Value>) -> bool {
    match result {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Read side of trigger history: which job results make up "the data" of a trigger.
#[derive(Clone)]
pub struct TriggerResultAggregator {
    store: ControlPlaneStore,
}

impl TriggerResultAggregator {
    pub fn new(store: ControlPlaneStore) -> Self {
        Self { store }
    }

    async fn trigger(&self, trigger_id: &str) -> ControlPlaneResult<Trigger> {
        self.store
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("trigger", trigger_id))
    }

    async fn iteration_ts(&self, trigger_id: &str, iteration_id: &str) -> ControlPlaneResult<i64> {
        self.store
            .triggered_jobs_by_iteration(iteration_id)
            .await?
            .into_iter()
            .find(|link| link.trigger_id == trigger_id)
            .map(|link| link.iteration_ts)
            .ok_or_else(|| ControlPlaneError::not_found("iteration", iteration_id))
    }

    /// Lower bound of a "latest" window ending at `upper`.
    async fn window_start(
        &self,
        trigger_id: &str,
        options: &ResultOptions,
        upper: Option<i64>,
    ) -> ControlPlaneResult<Option<i64>> {
        let mut filter = options.status_filter();
        filter.before_inclusive = upper;
        if !options.partial {
            filter = filter.partial(false);
        }
        let newest = self.store.latest_triggered_job(trigger_id, &filter).await?;
        Ok(newest.map(|link| link.iteration_ts))
    }

    async fn collect(
        &self,
        trigger_id: &str,
        filter: &TriggeredJobFilter,
        limit: Option<usize>,
    ) -> ControlPlaneResult<Vec<(TriggeredJob, Job)>> {
        Ok(self.store.triggered_job_results(trigger_id, filter, limit).await?)
    }

    async fn windowed(
        &self,
        trigger: Trigger,
        options: &ResultOptions,
        upper: Option<i64>,
        iteration_id: Option<String>,
    ) -> ControlPlaneResult<TriggerResults> {
        let start = self.window_start(&trigger.id, options, upper).await?;
        let mut filter = options.status_filter();
        filter.before_inclusive = upper;
        let rows = match start {
            Some(ts) if options.partial => {
                filter.not_before = Some(ts);
                filter.before_inclusive = Some(ts);
                self.collect(&trigger.id, &filter, None).await?
            }
            Some(ts) => {
                filter.not_before = Some(ts);
                self.collect(&trigger.id, &filter, None).await?
            }
            // no full scan yet: everything that matches
            None if !options.partial => self.collect(&trigger.id, &filter, None).await?,
            None => Vec::new(),
        };
        // a partial window is one timestamp; keep a single iteration if two share it
        let rows = if options.partial {
            let newest = rows.first().map(|(link, _)| link.iteration_id.clone());
            rows.into_iter()
                .filter(|(link, _)| Some(&link.iteration_id) == newest.as_ref())
                .collect()
        } else {
            rows
        };
        Ok(self.assemble(trigger, options, rows, iteration_id))
    }

    /// Results of the newest iteration, or of everything back to the newest full scan.
    pub async fn latest(
        &self,
        trigger_id: &str,
        options: &ResultOptions,
    ) -> ControlPlaneResult<TriggerResults> {
        let trigger = self.trigger(trigger_id).await?;
        let iteration_id = trigger.iteration_id.clone();
        self.windowed(trigger, options, None, iteration_id).await
    }

    /// Like [`latest`](Self::latest), as it looked right after `iteration_id` ran.
    pub async fn since(
        &self,
        trigger_id: &str,
        iteration_id: &str,
        options: &ResultOptions,
    ) -> ControlPlaneResult<TriggerResults> {
        let trigger = self.trigger(trigger_id).await?;
        let upper = self.iteration_ts(trigger_id, iteration_id).await?;
        self.windowed(trigger, options, Some(upper), Some(iteration_id.to_string()))
            .await
    }

    /// The newest `n` matching jobs at or before `before`.
    pub async fn last_n(
        &self,
        trigger_id: &str,
        n: usize,
        before: Option<i64>,
        options: &ResultOptions,
    ) -> ControlPlaneResult<TriggerResults> {
        let trigger = self.trigger(trigger_id).await?;
        let mut filter = options.status_filter();
        filter.before_inclusive = before;
        let rows = self.collect(trigger_id, &filter, Some(n)).await?;
        let iteration_id = rows.first().map(|(link, _)| link.iteration_id.clone());
        Ok(self.assemble(trigger, options, rows, iteration_id))
    }

    /// Every job of one iteration, whatever its status.
    pub async fn at_iteration(
        &self,
        trigger_id: &str,
        iteration_id: &str,
    ) -> ControlPlaneResult<TriggerResults> {
        let trigger = self.trigger(trigger_id).await?;
        let links: Vec<TriggeredJob> = self
            .store
            .triggered_jobs_by_iteration(iteration_id)
            .await?
            .into_iter()
            .filter(|link| link.trigger_id == trigger_id)
            .collect();
        if links.is_empty() {
            return Err(ControlPlaneError::not_found("iteration", iteration_id));
        }
        let mut rows = Vec::with_capacity(links.len());
        for link in links {
            if let Some(job) = self.store.get_job(&link.job_id).await? {
                rows.push((link, job));
            }
        }
        let options = ResultOptions {
            allow_empty_results: true,
            ..ResultOptions::default()
        };
        Ok(self.assemble(trigger, &options, rows, Some(iteration_id.to_string())))
    }

    fn assemble(
        &self,
        trigger: Trigger,
        options: &ResultOptions,
        rows: Vec<(TriggeredJob, Job)>,
        iteration_id: Option<String>,
    ) -> TriggerResults {
        let mut jobs: Vec<TriggeredJobResult> = rows
            .into_iter()
            .filter(|(_, job)| options.allow_empty_results || !is_explicitly_empty(job.result.as_ref()))
            .map(|(link, mut job)| {
                if !options.include_result {
                    job.result = None;
                }
                TriggeredJobResult {
                    job,
                    iteration_id: link.iteration_id,
                    iteration_ts: link.iteration_ts,
                    partial: link.partial,
                }
            })
            .collect();

        let mut has_next = false;
        if let Some(page_size) = options.page_size.filter(|size| *size > 0) {
            let page = options.page.unwrap_or(0);
            let start = page.saturating_mul(page_size).min(jobs.len());
            let end = start.saturating_add(page_size).min(jobs.len());
            has_next = end < jobs.len();
            jobs = jobs.drain(start..end).collect();
        }
        debug!(trigger_id = %trigger.id, jobs = jobs.len(), has_next, "Assembled trigger results");

        TriggerResults {
            trigger_id: trigger.id,
            trigger_type: trigger.trigger_type,
            tenant_id: trigger.tenant_id,
            integration_id: trigger.integration_id,
            iteration_id,
            partial: options.partial,
            jobs,
            has_next,
        }
    }
}
