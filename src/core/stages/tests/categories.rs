use serde_json::json;

use super::support::{CountingStage, FailMode, MemorySink, RecordingReporter, counts, stages};
use crate::core::stages::runner::StageOutcome;
use crate::core::stages::{StageFlag, StageRunner};

#[tokio::test]
async fn retryable_failure_only_blocks_its_own_category() {
    let list = vec![
        CountingStage::new("commits").category("scm"),
        CountingStage::new("prs").category("scm").fail(FailMode::RetryableAt(1)).pages(3),
        CountingStage::new("tags").category("scm"),
        CountingStage::new("pipelines").category("cicd"),
    ];
    let (list, counters) = stages(list);
    let runner = StageRunner::new("ado-controller", list);

    let outcome = runner
        .run(
            "job-1",
            &json!({}),
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;

    assert_eq!(counts(&counters), vec![1, 2, 0, 1]);
    let StageOutcome::Resumable {
        checkpoint,
        summary,
        failures,
    } = outcome
    else {
        panic!("expected resumable outcome, got {outcome:?}");
    };
    assert_eq!(summary.executed, vec!["commits", "pipelines"]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["stage"], "prs");
    assert_eq!(failures[0]["category"], "scm");
    // the failing page is where the next attempt picks up
    assert_eq!(checkpoint.cursor("prs"), Some(json!(1)));
    assert!(!checkpoint.is_completed("tags"));
}

#[tokio::test]
async fn job_category_selects_stages() {
    let list = vec![
        CountingStage::new("commits").category("scm"),
        CountingStage::new("pipelines").category("cicd"),
        CountingStage::new("work_items").category("boards"),
    ];
    let (list, counters) = stages(list);
    let runner = StageRunner::new("ado-controller", list);

    runner
        .run(
            "job-1",
            &json!({"job_category": "cicd"}),
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;

    assert_eq!(counts(&counters), vec![0, 1, 0]);
}

#[tokio::test]
async fn flag_disabled_stage_runs_once_re_enabled() {
    let build = || {
        vec![
            CountingStage::new("commits"),
            CountingStage::new("prs").flag(StageFlag::opt_out("fetch_prs")),
            CountingStage::new("releases").flag(StageFlag::opt_in("fetch_releases")),
        ]
    };

    let (list, counters) = stages(build());
    let runner = StageRunner::new("ado-controller", list);
    let disabled = json!({"ingestion_flags": {"fetch_prs": false}});
    let outcome = runner
        .run(
            "job-1",
            &disabled,
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;
    assert_eq!(counts(&counters), vec![1, 0, 0]);
    let checkpoint = outcome.checkpoint().clone();
    assert!(checkpoint.is_completed("commits"));
    assert!(!checkpoint.is_completed("prs"));
    assert!(!checkpoint.is_completed("releases"));

    let (list, counters) = stages(build());
    let runner = StageRunner::new("ado-controller", list);
    let enabled = json!({"integration_metadata": {"fetch_releases": true}});
    let state = checkpoint.to_value();
    runner
        .run(
            "job-1",
            &enabled,
            Some(&state),
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;
    assert_eq!(counts(&counters), vec![0, 1, 1]);
}

#[tokio::test]
async fn onboarding_only_stages_skip_incremental_scans() {
    let build = || {
        vec![
            CountingStage::new("commits"),
            CountingStage::new("tags").onboarding_only(),
        ]
    };

    let (list, counters) = stages(build());
    StageRunner::new("ado-controller", list)
        .run(
            "job-1",
            &json!({"from": 100, "to": 200}),
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;
    assert_eq!(counts(&counters), vec![1, 0]);

    let (list, counters) = stages(build());
    StageRunner::new("ado-controller", list)
        .run(
            "job-1",
            &json!({"to": 200}),
            None,
            &MemorySink::default(),
            &RecordingReporter::default(),
        )
        .await;
    assert_eq!(counts(&counters), vec![1, 1]);
}
