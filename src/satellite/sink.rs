use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::core::stages::RecordSink;

/// Appends records as JSON lines under `<root>/<job_id>/<stage>.jsonl`.
pub struct JsonLinesSink {
    root: PathBuf,
}

impl JsonLinesSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn stage_path(&self, job_id: &str, stage: &str) -> PathBuf {
        self.root.join(job_id).join(format!("{stage}.jsonl"))
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write(&self, job_id: &str, stage: &str, records: &[Value]) -> Result<()> {
        let path = self.stage_path(job_id, stage);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
