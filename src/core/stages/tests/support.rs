use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::stages::{
    ProgressReporter, RecordSink, Stage, StageContext, StageError, StageFlag, StagePage,
};

#[derive(Clone, Copy)]
pub enum FailMode {
    Never,
    RetryableAt(u64),
    FatalAt(u64),
}

/// Emits one record per page; cursors are page numbers.
pub struct CountingStage {
    pub name: String,
    pub category: Option<String>,
    pub flag: Option<StageFlag>,
    pub onboarding_only: bool,
    pub pages: u64,
    pub fail: FailMode,
    pub calls: Arc<AtomicUsize>,
    pub seen_cursors: Arc<Mutex<Vec<Option<Value>>>>,
}

impl CountingStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            category: None,
            flag: None,
            onboarding_only: false,
            pages: 1,
            fail: FailMode::Never,
            calls: Arc::new(AtomicUsize::new(0)),
            seen_cursors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn pages(mut self, pages: u64) -> Self {
        self.pages = pages;
        self
    }

    pub fn fail(mut self, fail: FailMode) -> Self {
        self.fail = fail;
        self
    }

    pub fn flag(mut self, flag: StageFlag) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn onboarding_only(mut self) -> Self {
        self.onboarding_only = true;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Stage for CountingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    fn flag(&self) -> Option<&StageFlag> {
        self.flag.as_ref()
    }

    fn onboarding_only(&self) -> bool {
        self.onboarding_only
    }

    async fn run(&self, _ctx: &StageContext, cursor: Option<Value>) -> Result<StagePage, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_cursors.lock().unwrap().push(cursor.clone());
        let page = cursor.as_ref().and_then(Value::as_u64).unwrap_or(0);
        match self.fail {
            FailMode::RetryableAt(at) if at == page => {
                return Err(StageError::Retryable(format!("{} rate limited", self.name)));
            }
            FailMode::FatalAt(at) if at == page => {
                return Err(StageError::Fatal(format!("{} unauthorized", self.name)));
            }
            _ => {}
        }
        let next = page + 1;
        Ok(StagePage {
            records: vec![json!({"stage": self.name, "page": page})],
            next_cursor: (next < self.pages).then(|| json!(next)),
            done: next >= self.pages,
        })
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub writes: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&self, _job_id: &str, stage: &str, records: &[Value]) -> anyhow::Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((stage.to_string(), records.len()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub states: Mutex<Vec<Value>>,
}

#[async_trait]
impl ProgressReporter for RecordingReporter {
    async fn checkpoint(&self, _job_id: &str, state: &Value) -> anyhow::Result<()> {
        self.states.lock().unwrap().push(state.clone());
        Ok(())
    }
}

pub fn stages(list: Vec<CountingStage>) -> (Vec<Arc<dyn Stage>>, Vec<Arc<AtomicUsize>>) {
    let counters = list.iter().map(CountingStage::calls).collect();
    let stages = list
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn Stage>)
        .collect();
    (stages, counters)
}

pub fn counts(counters: &[Arc<AtomicUsize>]) -> Vec<usize> {
    counters.iter().map(|c| c.load(Ordering::SeqCst)).collect()
}
