use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use super::types::{Job, JobFilter, JobReport, JobRequest, JobStatus, NewJob, RetryOptions};
use crate::core::agents::{AgentHandle, AgentRegistry};
use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::store::{ClaimOutcome, ControlPlaneStore, Page, RejectOutcome, ReportOutcome};

/// Per-job acknowledgement returned for a report batch.
pub type ReportAck = BTreeMap<String, bool>;

/// The pull protocol agents speak, plus the operator calls that mutate jobs.
#[derive(Clone)]
pub struct JobDispatcher {
    store: ControlPlaneStore,
    agents: AgentRegistry,
    max_requests_per_poll: usize,
    default_attempt_max: Option<i64>,
}

fn ensure_tenant(declared: Option<&str>, job: &Job) -> ControlPlaneResult<()> {
    let Some(declared) = declared else {
        return Ok(());
    };
    if job.tenant_id.as_deref() == Some(declared) {
        return Ok(());
    }
    Err(ControlPlaneError::TenantMismatch {
        declared: declared.to_string(),
        actual: job.tenant_id.clone().unwrap_or_default(),
    })
}

impl JobDispatcher {
    pub fn new(
        store: ControlPlaneStore,
        agents: AgentRegistry,
        max_requests_per_poll: usize,
        default_attempt_max: Option<i64>,
    ) -> Self {
        Self {
            store,
            agents,
            max_requests_per_poll,
            default_attempt_max,
        }
    }

    pub async fn list_job_requests(&self, handle: &AgentHandle) -> ControlPlaneResult<Vec<JobRequest>> {
        if let Some(known) = self.agents.get(&handle.agent_id).await
            && let Some(pinned) = known.handle.tenant_id
            && handle.tenant_id.as_ref() != Some(&pinned)
        {
            return Err(ControlPlaneError::TenantMismatch {
                declared: handle.tenant_id.clone().unwrap_or_default(),
                actual: pinned,
            });
        }
        let scope = handle.request_scope(self.max_requests_per_poll);
        let jobs = self.store.list_job_requests(&scope).await?;
        debug!(agent_id = %handle.agent_id, count = jobs.len(), "Listed job requests");
        Ok(jobs.into_iter().map(JobRequest::from).collect())
    }

    /// First writer wins. Losers get `ClaimConflict`.
    pub async fn accept(
        &self,
        job_id: &str,
        agent_id: &str,
        tenant_id: Option<&str>,
    ) -> ControlPlaneResult<Job> {
        let job = self.require_job(job_id).await?;
        ensure_tenant(tenant_id, &job)?;
        match self.store.accept_job(job_id, agent_id).await? {
            ClaimOutcome::Claimed(job) => {
                info!(job_id = %job_id, agent_id = %agent_id, "Job accepted");
                Ok(job)
            }
            ClaimOutcome::NotFound => Err(ControlPlaneError::not_found("job", job_id)),
            ClaimOutcome::Conflict { status } => {
                debug!(job_id = %job_id, agent_id = %agent_id, %status, "Lost claim race");
                Err(ControlPlaneError::ClaimConflict {
                    job_id: job_id.to_string(),
                })
            }
        }
    }

    pub async fn reject(
        &self,
        job_id: &str,
        agent_id: &str,
        status: Option<JobStatus>,
        tenant_id: Option<&str>,
    ) -> ControlPlaneResult<Job> {
        let status = status.unwrap_or(JobStatus::Scheduled);
        if !matches!(
            status,
            JobStatus::Scheduled | JobStatus::Unassigned | JobStatus::Failure
        ) {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "cannot reject a job into {status}"
            )));
        }
        let job = self.require_job(job_id).await?;
        ensure_tenant(tenant_id, &job)?;
        match self.store.reject_job(job_id, agent_id, status).await? {
            RejectOutcome::Rejected(job) => {
                info!(job_id = %job_id, agent_id = %agent_id, %status, "Job rejected by agent");
                Ok(job)
            }
            RejectOutcome::NotFound => Err(ControlPlaneError::not_found("job", job_id)),
            RejectOutcome::NotHeld { .. } => Err(ControlPlaneError::ClaimConflict {
                job_id: job_id.to_string(),
            }),
        }
    }

    /// Applies a batch of reports. Each entry is acknowledged independently;
    /// stale and duplicate reports are acknowledged without touching the job.
    pub async fn report(&self, reports: Vec<JobReport>) -> ReportAck {
        let mut acks = ReportAck::new();
        for report in reports {
            let job_id = report.job_id.clone();
            let ack = match self.report_one(&report).await {
                Ok(()) => true,
                Err(ControlPlaneError::MalformedReport { job_id }) => {
                    warn!(job_id = %job_id, "Discarded report for unknown job");
                    true
                }
                Err(e @ ControlPlaneError::TenantMismatch { .. }) => {
                    warn!(job_id = %job_id, error = %e, "Refused cross-tenant report");
                    false
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to apply job report");
                    false
                }
            };
            acks.insert(job_id, ack);
        }
        acks
    }

    async fn report_one(&self, report: &JobReport) -> ControlPlaneResult<()> {
        if let Some(declared) = report.tenant_id.as_deref()
            && let Some(job) = self.store.get_job(&report.job_id).await?
        {
            ensure_tenant(Some(declared), &job)?;
        }
        let job_id = report.job_id.as_str();
        match self.store.apply_report(report).await? {
            ReportOutcome::Applied { status } => {
                if status == report.status {
                    debug!(job_id = %job_id, %status, "Applied job report");
                } else {
                    warn!(job_id = %job_id, reported = %report.status, %status, "Job out of attempts");
                }
                if status.is_final() {
                    info!(job_id = %job_id, %status, "Job finalized");
                }
                Ok(())
            }
            ReportOutcome::UnknownJob => Err(ControlPlaneError::MalformedReport {
                job_id: job_id.to_string(),
            }),
            ReportOutcome::AlreadyFinal { status } => {
                debug!(job_id = %job_id, %status, "Ignored report for finalized job");
                Ok(())
            }
            ReportOutcome::NotClaimant { holder } => {
                warn!(
                    job_id = %job_id,
                    reporter = ?report.agent_id,
                    holder = ?holder,
                    "Ignored report from non-claimant agent"
                );
                Ok(())
            }
            ReportOutcome::InvalidTransition { from, to } => {
                warn!(job_id = %job_id, %from, %to, "Ignored report with invalid transition");
                Ok(())
            }
            ReportOutcome::Superseded => {
                debug!(job_id = %job_id, "Report lost a race with another update");
                Ok(())
            }
        }
    }

    /// Creates an `UNASSIGNED` job. Agents do not see it until it is scheduled.
    pub async fn create(&self, mut new: NewJob) -> ControlPlaneResult<Job> {
        if new.controller_name.trim().is_empty() {
            return Err(ControlPlaneError::InvalidRequest(
                "controller_name must not be empty".into(),
            ));
        }
        if let Some(parent_id) = &new.parent_id {
            self.require_job(parent_id).await?;
        }
        if new.attempt_max.is_none() {
            new.attempt_max = self.default_attempt_max;
        }
        let job = self.store.create_job(&new).await?;
        info!(job_id = %job.id, controller = %job.controller_name, "Job created");
        Ok(job)
    }

    /// Creates a job and puts it straight into the claimable pool.
    pub async fn submit(&self, new: NewJob) -> ControlPlaneResult<Job> {
        let job = self.create(new).await?;
        self.schedule(&job.id).await
    }

    /// `UNASSIGNED` to `SCHEDULED`; any other status is left alone.
    pub async fn schedule(&self, job_id: &str) -> ControlPlaneResult<Job> {
        if self.store.schedule_job(job_id).await? {
            info!(job_id = %job_id, "Job scheduled");
        }
        self.require_job(job_id).await
    }

    pub async fn retry(&self, job_id: &str, options: RetryOptions) -> ControlPlaneResult<Job> {
        let job = self
            .store
            .retry_job(job_id, options)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("job", job_id))?;
        info!(
            job_id = %job_id,
            clear_intermediate_state = options.clear_intermediate_state,
            clear_errors = options.clear_errors,
            "Job reset for retry"
        );
        Ok(job)
    }

    pub async fn require_job(&self, job_id: &str) -> ControlPlaneResult<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("job", job_id))
    }

    pub async fn filter_jobs(
        &self,
        filter: &JobFilter,
        page: usize,
        page_size: usize,
    ) -> ControlPlaneResult<Page<Job>> {
        Ok(self.store.filter_jobs(filter, page, page_size).await?)
    }

    pub async fn list_sub_jobs(&self, parent_id: &str) -> ControlPlaneResult<Vec<Job>> {
        self.require_job(parent_id).await?;
        Ok(self.store.list_sub_jobs(parent_id).await?)
    }
}
