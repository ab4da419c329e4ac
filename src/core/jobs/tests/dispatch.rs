use serde_json::json;

use crate::core::agents::{AgentHandle, AgentRegistry};
use crate::core::error::ControlPlaneError;
use crate::core::jobs::{JobDispatcher, JobFilter, JobReport, JobStatus, NewJob};
use crate::core::store::ControlPlaneStore;

fn dispatcher() -> JobDispatcher {
    let store = ControlPlaneStore::open_in_memory().unwrap();
    JobDispatcher::new(store, AgentRegistry::new(300), 25, Some(5))
}

fn acme_job(controller: &str) -> NewJob {
    NewJob {
        controller_name: controller.into(),
        tenant_id: Some("acme".into()),
        integration_id: Some("int-1".into()),
        ..Default::default()
    }
}

fn agent(agent_id: &str, tenant: Option<&str>, controllers: &[&str]) -> AgentHandle {
    AgentHandle {
        agent_id: agent_id.into(),
        tenant_id: tenant.map(str::to_string),
        controller_names: controllers.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn submit_schedules_and_applies_default_attempt_max() {
    let dispatcher = dispatcher();
    let job = dispatcher.submit(acme_job("jira-controller")).await.unwrap();
    assert_eq!(job.status, JobStatus::Scheduled);
    assert_eq!(job.attempt_max, Some(5));

    let err = dispatcher
        .submit(NewJob {
            controller_name: " ".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::InvalidRequest(_)));
}

#[tokio::test]
async fn scheduling_twice_creates_no_duplicates() {
    let dispatcher = dispatcher();
    let job = dispatcher.create(acme_job("jira-controller")).await.unwrap();
    assert_eq!(job.status, JobStatus::Unassigned);
    assert_eq!(job.attempt_max, Some(5));
    let first = dispatcher.schedule(&job.id).await.unwrap();
    let second = dispatcher.schedule(&job.id).await.unwrap();
    assert_eq!(first.status, JobStatus::Scheduled);
    assert_eq!(second.status, JobStatus::Scheduled);

    let page = dispatcher
        .filter_jobs(&JobFilter::default(), 0, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn list_never_offers_foreign_controllers() {
    let dispatcher = dispatcher();
    dispatcher.submit(acme_job("jira-controller")).await.unwrap();
    dispatcher.submit(acme_job("github-controller")).await.unwrap();

    let requests = dispatcher
        .list_job_requests(&agent("a1", Some("acme"), &["jira-controller"]))
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests.iter().all(|r| r.controller_name == "jira-controller"));
}

#[tokio::test]
async fn list_rejects_agents_changing_tenant() {
    let store = ControlPlaneStore::open_in_memory().unwrap();
    let agents = AgentRegistry::new(300);
    let dispatcher = JobDispatcher::new(store, agents.clone(), 25, None);
    agents
        .register(agent("a1", Some("acme"), &["jira-controller"]), 0)
        .await
        .unwrap();

    let err = dispatcher
        .list_job_requests(&agent("a1", Some("globex"), &["jira-controller"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::TenantMismatch { .. }));
}

#[tokio::test]
async fn second_accept_is_a_claim_conflict() {
    let dispatcher = dispatcher();
    let job = dispatcher.submit(acme_job("jira-controller")).await.unwrap();

    let accepted = dispatcher.accept(&job.id, "a1", Some("acme")).await.unwrap();
    assert_eq!(accepted.agent_id.as_deref(), Some("a1"));

    let err = dispatcher.accept(&job.id, "a2", None).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::ClaimConflict { .. }));

    let err = dispatcher.accept("missing", "a2", None).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::NotFound { kind: "job", .. }));
}

#[tokio::test]
async fn accept_checks_declared_tenant() {
    let dispatcher = dispatcher();
    let job = dispatcher.submit(acme_job("jira-controller")).await.unwrap();

    let err = dispatcher
        .accept(&job.id, "a1", Some("globex"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::TenantMismatch { .. }));

    let untouched = dispatcher.require_job(&job.id).await.unwrap();
    assert_eq!(untouched.status, JobStatus::Scheduled);
}

#[tokio::test]
async fn reject_returns_job_to_pool() {
    let dispatcher = dispatcher();
    let job = dispatcher.submit(acme_job("jira-controller")).await.unwrap();
    dispatcher.accept(&job.id, "a1", None).await.unwrap();

    let err = dispatcher
        .reject(&job.id, "a1", Some(JobStatus::Success), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::InvalidRequest(_)));

    let err = dispatcher.reject(&job.id, "a2", None, None).await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::ClaimConflict { .. }));

    let rejected = dispatcher.reject(&job.id, "a1", None, None).await.unwrap();
    assert_eq!(rejected.status, JobStatus::Scheduled);
    assert!(rejected.agent_id.is_none());
}

#[tokio::test]
async fn report_batch_acknowledges_per_job() {
    let dispatcher = dispatcher();
    let job = dispatcher.submit(acme_job("jira-controller")).await.unwrap();
    dispatcher.accept(&job.id, "a1", None).await.unwrap();

    let mut success = JobReport::progress(&job.id, "a1");
    success.status = JobStatus::Success;
    success.result = Some(json!({"records": 3}));

    let unknown = JobReport::progress("missing", "a1");

    let acks = dispatcher.report(vec![success.clone(), unknown]).await;
    assert_eq!(acks.get(&job.id), Some(&true));
    assert_eq!(acks.get("missing"), Some(&true));

    let stored = dispatcher.require_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Success);
    assert_eq!(stored.result, Some(json!({"records": 3})));

    // a replayed duplicate is acknowledged and changes nothing
    let mut stale = success;
    stale.result = Some(json!({"records": 0}));
    let acks = dispatcher.report(vec![stale]).await;
    assert_eq!(acks.get(&job.id), Some(&true));
    let again = dispatcher.require_job(&job.id).await.unwrap();
    assert_eq!(again, stored);
}

#[tokio::test]
async fn cross_tenant_report_is_not_acknowledged() {
    let dispatcher = dispatcher();
    let job = dispatcher.submit(acme_job("jira-controller")).await.unwrap();
    dispatcher.accept(&job.id, "a1", None).await.unwrap();

    let mut report = JobReport::progress(&job.id, "a1");
    report.status = JobStatus::Success;
    report.tenant_id = Some("globex".into());
    let acks = dispatcher.report(vec![report]).await;
    assert_eq!(acks.get(&job.id), Some(&false));
    assert_eq!(
        dispatcher.require_job(&job.id).await.unwrap().status,
        JobStatus::Accepted
    );
}
