use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Checkpoint, ProgressReporter, RecordSink, ScanQuery, Stage, StageContext, StageError};
use crate::core::jobs::{JobReport, JobStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub records: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed {
        checkpoint: Checkpoint,
        summary: RunSummary,
    },
    /// Some category hit a transient error; the job should be requeued.
    Resumable {
        checkpoint: Checkpoint,
        summary: RunSummary,
        failures: Vec<Value>,
    },
    Failed {
        checkpoint: Checkpoint,
        summary: RunSummary,
        error: Value,
    },
}

impl StageOutcome {
    #[cfg(test)]
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            Self::Completed { checkpoint, .. }
            | Self::Resumable { checkpoint, .. }
            | Self::Failed { checkpoint, .. } => checkpoint,
        }
    }

    /// The report an agent sends once the attempt is over.
    pub fn into_report(self, job_id: &str, agent_id: &str) -> JobReport {
        let mut report = JobReport::progress(job_id, agent_id);
        match self {
            Self::Completed {
                checkpoint,
                summary,
            } => {
                report.status = JobStatus::Success;
                report.result = serde_json::to_value(&summary).ok();
                report.intermediate_state = Some(checkpoint.to_value());
            }
            Self::Resumable {
                checkpoint,
                summary,
                failures,
            } => {
                report.status = JobStatus::Scheduled;
                report.result = serde_json::to_value(&summary).ok();
                report.intermediate_state = Some(checkpoint.to_value());
                report.ingestion_failures = failures;
            }
            Self::Failed {
                checkpoint,
                summary,
                error,
            } => {
                report.status = JobStatus::Failure;
                report.result = serde_json::to_value(&summary).ok();
                report.error = Some(error);
                report.intermediate_state = Some(checkpoint.to_value());
            }
        }
        report
    }
}

/// Runs a controller's stages in order, resuming from a job's checkpoint.
#[derive(Clone)]
pub struct StageRunner {
    controller: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRunner {
    pub fn new(controller: impl Into<String>, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            controller: controller.into(),
            stages,
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(
        &self,
        job_id: &str,
        query: &Value,
        intermediate_state: Option<&Value>,
        sink: &dyn RecordSink,
        reporter: &dyn ProgressReporter,
    ) -> StageOutcome {
        let mut checkpoint = Checkpoint::parse(intermediate_state);
        let resumed = checkpoint.completed_stages();
        if !resumed.is_empty() {
            info!(job_id = %job_id, completed = ?resumed, "Resuming from checkpoint");
        }
        let mut summary = RunSummary::default();
        let query = match ScanQuery::decode(query) {
            Ok(query) => query,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Job query does not decode");
                return StageOutcome::Failed {
                    checkpoint,
                    summary,
                    error: json!({"message": format!("malformed query: {e}")}),
                };
            }
        };
        let ctx = StageContext {
            job_id: job_id.to_string(),
            query,
        };

        let mut failures = Vec::new();
        let mut blocked: HashSet<Option<String>> = HashSet::new();
        for stage in &self.stages {
            let name = stage.name();
            let category = stage.category().map(str::to_string);
            if let Some(wanted) = &ctx.query.job_category
                && category.as_deref() != Some(wanted.as_str())
            {
                continue;
            }
            if blocked.contains(&category) {
                summary.skipped.push(name.to_string());
                continue;
            }
            if checkpoint.is_completed(name) {
                debug!(job_id = %job_id, stage = %name, "Stage already completed");
                summary.skipped.push(name.to_string());
                continue;
            }
            // Flag-disabled stages stay incomplete so re-enabling the flag picks them up.
            if let Some(flag) = stage.flag()
                && !flag.enabled(&ctx.query.integration_metadata, &ctx.query.ingestion_flags)
            {
                debug!(job_id = %job_id, stage = %name, flag = %flag.name, "Stage disabled by flag");
                summary.skipped.push(name.to_string());
                continue;
            }
            if stage.onboarding_only() && !ctx.query.is_onboarding() {
                summary.skipped.push(name.to_string());
                continue;
            }

            match self
                .run_stage(stage.as_ref(), &ctx, &mut checkpoint, &mut summary, sink, reporter)
                .await
            {
                Ok(()) => {
                    checkpoint.mark_completed(name);
                    persist(job_id, &checkpoint, reporter).await;
                    summary.executed.push(name.to_string());
                    info!(job_id = %job_id, stage = %name, "Stage completed");
                }
                Err(StageError::Retryable(message)) => {
                    warn!(job_id = %job_id, stage = %name, category = ?category, %message, "Stage failed, will resume");
                    failures.push(json!({
                        "stage": name,
                        "category": category,
                        "message": message,
                        "cursor": checkpoint.cursor(name),
                    }));
                    blocked.insert(category);
                }
                Err(StageError::Fatal(message)) => {
                    error!(job_id = %job_id, stage = %name, %message, "Stage failed fatally");
                    return StageOutcome::Failed {
                        checkpoint,
                        summary,
                        error: json!({"stage": name, "message": message}),
                    };
                }
            }
        }

        if failures.is_empty() {
            StageOutcome::Completed {
                checkpoint,
                summary,
            }
        } else {
            StageOutcome::Resumable {
                checkpoint,
                summary,
                failures,
            }
        }
    }

    /// Pages through one stage. The cursor about to be fetched is persisted
    /// first, so a crash resumes at the last page not yet written.
    async fn run_stage(
        &self,
        stage: &dyn Stage,
        ctx: &StageContext,
        checkpoint: &mut Checkpoint,
        summary: &mut RunSummary,
        sink: &dyn RecordSink,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        let name = stage.name();
        let mut cursor = checkpoint.cursor(name);
        loop {
            checkpoint.set_cursor(name, cursor.clone());
            persist(&ctx.job_id, checkpoint, reporter).await;

            let page = stage.run(ctx, cursor.clone()).await?;
            if !page.records.is_empty() {
                sink.write(&ctx.job_id, name, &page.records)
                    .await
                    .map_err(|e| StageError::Retryable(format!("storing {name} records: {e:#}")))?;
                *summary.records.entry(name.to_string()).or_default() += page.records.len();
            }
            if page.done || page.next_cursor.is_none() {
                return Ok(());
            }
            cursor = page.next_cursor;
        }
    }
}

async fn persist(job_id: &str, checkpoint: &Checkpoint, reporter: &dyn ProgressReporter) {
    if let Err(e) = reporter.checkpoint(job_id, &checkpoint.to_value()).await {
        warn!(job_id = %job_id, error = %e, "Failed to persist checkpoint");
    }
}
