use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Unassigned,
    Scheduled,
    Accepted,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Unassigned => "UNASSIGNED",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Accepted => "ACCEPTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "UNASSIGNED" => Some(JobStatus::Unassigned),
            "SCHEDULED" => Some(JobStatus::Scheduled),
            "ACCEPTED" => Some(JobStatus::Accepted),
            "SUCCESS" => Some(JobStatus::Success),
            "FAILURE" => Some(JobStatus::Failure),
            _ => None,
        }
    }

    /// Finalized jobs only move again through an explicit retry.
    pub fn is_final(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of ingestion work as stored by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub controller_name: String,
    pub query: Value,
    pub tenant_id: Option<String>,
    pub integration_id: Option<String>,
    pub reserved: bool,
    pub tags: Vec<String>,
    pub status: JobStatus,
    pub level: i64,
    pub parent_id: Option<String>,
    pub attempt_count: i64,
    pub attempt_max: Option<i64>,
    pub agent_id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub ingestion_failures: Vec<Value>,
    pub intermediate_state: Option<Value>,
    pub callback_url: Option<String>,
    pub created_at: i64,
    pub status_changed_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    pub controller_name: String,
    #[serde(default)]
    pub query: Value,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub attempt_max: Option<i64>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub intermediate_state: Option<Value>,
}

/// What an agent sees when it polls for work. The full job comes back on accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
    pub controller_name: String,
}

impl From<Job> for JobRequest {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            controller_name: job.controller_name,
        }
    }
}

/// Progress or outcome pushed by an agent for a job it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub intermediate_state: Option<Value>,
    #[serde(default)]
    pub ingestion_failures: Vec<Value>,
}

impl JobReport {
    pub fn progress(job_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            agent_id: Some(agent_id.into()),
            tenant_id: None,
            status: JobStatus::Accepted,
            result: None,
            error: None,
            intermediate_state: None,
            ingestion_failures: Vec::new(),
        }
    }
}

/// Which scheduled jobs a polling agent is allowed to see.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    pub controller_names: Vec<String>,
    pub tenant_id: Option<String>,
    pub integration_ids: Vec<String>,
    pub reserved: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub controller_name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub created_after: Option<i64>,
    #[serde(default)]
    pub created_before: Option<i64>,
}

/// Options for resetting a job back to `SCHEDULED`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RetryOptions {
    #[serde(default)]
    pub clear_intermediate_state: bool,
    #[serde(default)]
    pub clear_errors: bool,
}
