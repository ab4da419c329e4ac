use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::jobs::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    pub fn offset(page: usize, page_size: usize) -> usize {
        page.saturating_mul(page_size)
    }
}

/// A recurring schedule that produces ingestion jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub tenant_id: Option<String>,
    pub integration_id: Option<String>,
    pub trigger_type: String,
    pub frequency_minutes: i64,
    pub metadata: Value,
    pub callback_url: Option<String>,
    /// Most recent iteration; `None` until the trigger fires for the first time.
    pub iteration_id: Option<String>,
    pub iteration_ts: Option<i64>,
    pub settings: Value,
    pub created_at: i64,
}

impl Trigger {
    /// Triggers without a tenant are global; their jobs go to reserved agents only.
    pub fn reserved(&self) -> bool {
        self.tenant_id.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTrigger {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    pub trigger_type: String,
    pub frequency_minutes: i64,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub settings: Value,
}

impl NewTrigger {
    pub fn validate(&self) -> Result<(), String> {
        if self.trigger_type.trim().is_empty() {
            return Err("trigger_type must not be empty".into());
        }
        validate_frequency(self.frequency_minutes)
    }
}

pub fn validate_frequency(minutes: i64) -> Result<(), String> {
    if minutes <= 0 {
        return Err(format!("frequency must be positive, got {minutes}"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerFilter {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<String>,
}

impl TriggerFilter {
    pub fn is_empty(&self) -> bool {
        self.tenant_id.is_none() && self.integration_id.is_none() && self.trigger_type.is_none()
    }
}

/// Link between a job and the trigger iteration that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredJob {
    pub job_id: String,
    pub trigger_id: String,
    pub iteration_id: String,
    pub iteration_ts: i64,
    pub partial: bool,
    pub created_at: i64,
}

/// Narrows triggered-job lookups. Unset fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggeredJobFilter {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    /// Exact match on the partial flag of the link.
    #[serde(default)]
    pub partial: Option<bool>,
    #[serde(default)]
    pub after_exclusive: Option<i64>,
    #[serde(default)]
    pub not_before: Option<i64>,
    #[serde(default)]
    pub before_inclusive: Option<i64>,
    /// Keep jobs whose attempt count is below their own max, or this value when unset.
    #[serde(default)]
    pub below_max_attempts_or: Option<i64>,
}

impl TriggeredJobFilter {
    pub fn statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }

    pub fn after_exclusive(mut self, ts: i64) -> Self {
        self.after_exclusive = Some(ts);
        self
    }

    pub fn not_before(mut self, ts: i64) -> Self {
        self.not_before = Some(ts);
        self
    }

    pub fn before_inclusive(mut self, ts: i64) -> Self {
        self.before_inclusive = Some(ts);
        self
    }

    pub fn below_max_attempts_or(mut self, default_max: i64) -> Self {
        self.below_max_attempts_or = Some(default_max);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration_id: String,
    pub iteration_ts: i64,
    pub job_count: i64,
}
