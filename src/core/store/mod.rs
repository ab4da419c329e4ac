mod jobs;
mod rows;
mod triggered_jobs;
mod triggers;
pub mod types;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

pub use jobs::{ClaimOutcome, RejectOutcome, ReportOutcome};
pub use triggers::PlannedJob;
pub use types::{
    NewTrigger, Page, Trigger, TriggerFilter, TriggeredJob, TriggeredJobFilter, validate_frequency,
};

/// Durable state of the control plane: jobs, triggers and the links between them.
///
/// Cloning is cheap; all clones share one connection. Every status change is issued
/// as a single conditional `UPDATE` keyed on the current status, so the store stays
/// correct even when several control-plane instances point at the same database file.
#[derive(Clone)]
pub struct ControlPlaneStore {
    db: Arc<Mutex<Connection>>,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        controller_name TEXT NOT NULL,
        query_json TEXT,
        tenant_id TEXT,
        integration_id TEXT,
        reserved INTEGER NOT NULL DEFAULT 0,
        tags_json TEXT NOT NULL DEFAULT '[]',
        status TEXT NOT NULL,
        level INTEGER NOT NULL DEFAULT 0,
        parent_id TEXT,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        attempt_max INTEGER,
        agent_id TEXT,
        result_json TEXT,
        error_json TEXT,
        ingestion_failures_json TEXT NOT NULL DEFAULT '[]',
        intermediate_state_json TEXT,
        callback_url TEXT,
        created_at INTEGER NOT NULL,
        status_changed_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_parent_id ON jobs(parent_id)",
    "CREATE TABLE IF NOT EXISTS triggers (
        id TEXT PRIMARY KEY,
        tenant_id TEXT,
        integration_id TEXT,
        trigger_type TEXT NOT NULL,
        frequency_minutes INTEGER NOT NULL CHECK (frequency_minutes > 0),
        metadata_json TEXT,
        callback_url TEXT,
        iteration_id TEXT,
        iteration_ts INTEGER,
        settings_json TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS triggered_jobs (
        job_id TEXT PRIMARY KEY,
        trigger_id TEXT NOT NULL,
        iteration_id TEXT NOT NULL,
        iteration_ts INTEGER NOT NULL,
        partial INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_triggered_jobs_trigger_ts ON triggered_jobs(trigger_id, iteration_ts)",
    "CREATE INDEX IF NOT EXISTS idx_triggered_jobs_iteration ON triggered_jobs(iteration_id)",
];

impl ControlPlaneStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating database directory {}", parent.display()))?;
            NativePlatform::restrict_dir_permissions(parent);
        }

        let db = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        NativePlatform::restrict_file_permissions(path);
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        for stmt in SCHEMA {
            db.execute(stmt, []).context("creating control plane schema")?;
        }
        info!("Control plane store ready");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
