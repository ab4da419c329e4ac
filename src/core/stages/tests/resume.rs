use async_trait::async_trait;
use serde_json::{Value, json};

use super::support::{
    CountingStage, FailMode, MemorySink, RecordingReporter, counts, stages,
};
use crate::core::agents::AgentRegistry;
use crate::core::jobs::{JobDispatcher, JobReport, JobStatus, NewJob, RetryOptions};
use crate::core::stages::runner::StageOutcome;
use crate::core::stages::{Checkpoint, ProgressReporter, StageRunner};
use crate::core::store::ControlPlaneStore;

fn five_stages() -> Vec<CountingStage> {
    ["stage1", "stage2", "stage3", "stage4", "stage5"]
        .into_iter()
        .map(CountingStage::new)
        .collect()
}

#[tokio::test]
async fn resumes_after_completed_stages() {
    let (list, counters) = stages(five_stages());
    let runner = StageRunner::new("jira-controller", list);
    let state = json!({
        "stages": {
            "stage1": {"completed": true},
            "stage2": {"completed": true}
        }
    });

    let outcome = runner
        .run(
            "job-1",
            &json!({}),
            Some(&state),
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;

    assert_eq!(counts(&counters), vec![0, 0, 1, 1, 1]);
    let StageOutcome::Completed { checkpoint, summary } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.executed, vec!["stage3", "stage4", "stage5"]);
    assert_eq!(summary.skipped, vec!["stage1", "stage2"]);
    assert_eq!(checkpoint.completed_stages().len(), 5);
}

#[tokio::test]
async fn pagination_resumes_from_persisted_cursor() {
    let stage = CountingStage::new("commits").pages(4);
    let seen = stage.seen_cursors.clone();
    let (list, counters) = stages(vec![stage]);
    let runner = StageRunner::new("jira-controller", list);
    let state = json!({"stages": {"commits": {"completed": false, "cursor": 2}}});
    let sink = MemorySink::default();
    let reporter = RecordingReporter::default();

    runner
        .run("job-1", &json!({}), Some(&state), &sink, &reporter)
        .await;

    assert_eq!(counts(&counters), vec![2]);
    assert_eq!(*seen.lock().unwrap(), vec![Some(json!(2)), Some(json!(3))]);

    // each fetch is preceded by a checkpoint carrying the cursor it is about to use
    let states = reporter.states.lock().unwrap();
    let cursors: Vec<Value> = states
        .iter()
        .map(|s| s["stages"]["commits"]["cursor"].clone())
        .collect();
    assert_eq!(cursors, vec![json!(2), json!(3), Value::Null]);
    assert_eq!(states.last().unwrap()["stages"]["commits"]["completed"], true);
    assert_eq!(sink.writes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn fatal_failure_stops_remaining_stages() {
    let list = vec![
        CountingStage::new("stage1"),
        CountingStage::new("stage2").fail(FailMode::FatalAt(0)),
        CountingStage::new("stage3").category("other"),
    ];
    let (list, counters) = stages(list);
    let runner = StageRunner::new("jira-controller", list);

    let outcome = runner
        .run(
            "job-1",
            &json!({}),
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;

    assert_eq!(counts(&counters), vec![1, 1, 0]);
    let StageOutcome::Failed { checkpoint, error, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(error["stage"], "stage2");
    assert!(checkpoint.is_completed("stage1"));
    assert!(!checkpoint.is_completed("stage2"));
}

#[tokio::test]
async fn malformed_query_fails_without_running() {
    let (list, counters) = stages(five_stages());
    let runner = StageRunner::new("jira-controller", list);
    let outcome = runner
        .run(
            "job-1",
            &json!({"from": "last tuesday"}),
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;
    assert!(matches!(outcome, StageOutcome::Failed { .. }));
    assert_eq!(counts(&counters), vec![0; 5]);
}

/// Pushes checkpoints through the dispatcher the way a satellite does over HTTP.
struct DispatchReporter {
    dispatcher: JobDispatcher,
    agent_id: String,
}

#[async_trait]
impl ProgressReporter for DispatchReporter {
    async fn checkpoint(&self, job_id: &str, state: &Value) -> anyhow::Result<()> {
        let mut report = JobReport::progress(job_id, &self.agent_id);
        report.intermediate_state = Some(state.clone());
        let acks = self.dispatcher.report(vec![report]).await;
        anyhow::ensure!(acks.get(job_id) == Some(&true), "checkpoint not acknowledged");
        Ok(())
    }
}

#[tokio::test]
async fn retryable_failure_requeues_with_checkpoint() {
    let store = ControlPlaneStore::open_in_memory().unwrap();
    let dispatcher = JobDispatcher::new(store, AgentRegistry::new(300), 25, None);
    let job = dispatcher
        .submit(NewJob {
            controller_name: "jira-controller".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let job = dispatcher.accept(&job.id, "agent-a", None).await.unwrap();
    assert_eq!(job.attempt_count, 0);
    assert!(job.ingestion_failures.is_empty());

    let mut list = five_stages();
    list[2] = CountingStage::new("stage3").fail(FailMode::RetryableAt(0));
    let (list, _) = stages(list);
    let runner = StageRunner::new("jira-controller", list);
    let reporter = DispatchReporter {
        dispatcher: dispatcher.clone(),
        agent_id: "agent-a".into(),
    };

    let outcome = runner
        .run(
            &job.id,
            &job.query,
            job.intermediate_state.as_ref(),
            &MemorySink::default(),
            &reporter,
        )
        .await;
    assert!(matches!(outcome, StageOutcome::Resumable { .. }));
    let acks = dispatcher
        .report(vec![outcome.into_report(&job.id, "agent-a")])
        .await;
    assert_eq!(acks.get(&job.id), Some(&true));

    let requeued = dispatcher.require_job(&job.id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Scheduled);
    assert_eq!(requeued.attempt_count, 1);
    assert_eq!(requeued.ingestion_failures.len(), 1);
    assert_eq!(requeued.ingestion_failures[0]["stage"], "stage3");
    let checkpoint = Checkpoint::parse(requeued.intermediate_state.as_ref());
    assert!(checkpoint.is_completed("stage1"));
    assert!(checkpoint.is_completed("stage2"));
    assert!(!checkpoint.is_completed("stage3"));

    // retry without clearing keeps progress; clearing wipes it
    let kept = dispatcher
        .retry(&job.id, RetryOptions::default())
        .await
        .unwrap();
    assert_eq!(
        Checkpoint::parse(kept.intermediate_state.as_ref()).completed_stages(),
        vec!["stage1".to_string(), "stage2".to_string()]
    );
    let cleared = dispatcher
        .retry(
            &job.id,
            RetryOptions {
                clear_intermediate_state: true,
                clear_errors: false,
            },
        )
        .await
        .unwrap();
    assert!(
        Checkpoint::parse(cleared.intermediate_state.as_ref())
            .completed_stages()
            .is_empty()
    );
}
