mod checkpoint;
mod flags;
mod query;
mod registry;
mod runner;

pub use checkpoint::Checkpoint;
pub use flags::StageFlag;
pub use query::ScanQuery;
pub use registry::ControllerRegistry;
pub use runner::StageRunner;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Transient; the job is requeued and resumes from its checkpoint.
    #[error("retryable stage failure: {0}")]
    Retryable(String),
    /// The job fails and stays failed until an operator retries it.
    #[error("fatal stage failure: {0}")]
    Fatal(String),
}

/// One page of a stage's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePage {
    pub records: Vec<Value>,
    pub next_cursor: Option<Value>,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct StageContext {
    pub job_id: String,
    pub query: ScanQuery,
}

/// An independently checkpointable unit of work within a controller.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Stages sharing a category fail together; other categories keep going.
    fn category(&self) -> Option<&str> {
        None
    }

    fn flag(&self) -> Option<&StageFlag> {
        None
    }

    /// Only runs on the first scan of an integration.
    fn onboarding_only(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &StageContext, cursor: Option<Value>) -> Result<StagePage, StageError>;
}

/// Where fetched records go.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, job_id: &str, stage: &str, records: &[Value]) -> anyhow::Result<()>;
}

/// Persists checkpoints while a job runs.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn checkpoint(&self, job_id: &str, state: &Value) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests;
