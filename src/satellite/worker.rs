use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{ControlPlaneClient, HttpProgressReporter};
use crate::core::agents::AgentHandle;
use crate::core::config::SatelliteConfig;
use crate::core::jobs::{Job, JobReport};
use crate::core::stages::{ControllerRegistry, RecordSink, StageRunner};

const REPORT_BACKOFF_START: Duration = Duration::from_millis(250);
const REPORT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Polls the control plane, claims what it can run and reports back.
pub struct SatelliteWorker {
    client: ControlPlaneClient,
    handle: AgentHandle,
    registry: ControllerRegistry,
    sink: Arc<dyn RecordSink>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
}

/// Spreads polls from a fleet started together by up to a fifth of the interval.
fn jittered(base: Duration) -> Duration {
    let spread = (base.as_millis() / 5) as u64;
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

impl SatelliteWorker {
    pub fn new(
        config: &SatelliteConfig,
        registry: ControllerRegistry,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let handle = AgentHandle {
            agent_id: config.agent_id.clone(),
            tenant_id: config.tenant_id.clone(),
            integration_ids: config.integration_ids.clone(),
            controller_names: registry.controller_names(),
            reserved: config.reserved,
            telemetry: serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "os": std::env::consts::OS,
            }),
        };
        Self {
            client: ControlPlaneClient::new(&config.control_plane_url, config.api_token.clone()),
            handle,
            registry,
            sink,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn register(&self) -> Result<()> {
        self.client.register(&self.handle).await?;
        info!(
            agent_id = %self.handle.agent_id,
            controllers = ?self.handle.controller_names,
            "Registered with control plane"
        );
        Ok(())
    }

    /// Runs until the shutdown token is cancelled.
    pub async fn run(&self) -> Result<()> {
        self.register().await?;

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.client.clone(),
            self.handle.clone(),
            self.heartbeat_interval,
            self.shutdown.clone(),
        ));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(jittered(self.poll_interval)) => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %format!("{e:#}"), "Poll failed");
                    }
                }
            }
        }

        heartbeat.abort();
        info!(agent_id = %self.handle.agent_id, "Satellite stopped");
        Ok(())
    }

    /// One list-claim-run pass. Returns how many jobs this agent ran.
    pub async fn poll_once(&self) -> Result<usize> {
        let requests = self.client.list_requests(&self.handle).await?;
        if !requests.is_empty() {
            debug!(count = requests.len(), "Job requests available");
        }
        let mut executed = 0;
        for request in requests {
            if self.shutdown.is_cancelled() {
                break;
            }
            let Some(runner) = self.registry.runner(&request.controller_name) else {
                continue;
            };
            let claimed = self
                .client
                .accept(
                    &request.job_id,
                    &self.handle.agent_id,
                    self.handle.tenant_id.as_deref(),
                )
                .await?;
            let Some(job) = claimed else {
                debug!(job_id = %request.job_id, "Job claimed elsewhere");
                continue;
            };
            if self.shutdown.is_cancelled() {
                self.release(&job).await;
                break;
            }
            self.execute(&runner, job).await;
            executed += 1;
        }
        Ok(executed)
    }

    /// Hands a claimed job back to the pool without running it.
    pub async fn release(&self, job: &Job) {
        match self
            .client
            .reject(&job.id, &self.handle.agent_id, self.handle.tenant_id.as_deref())
            .await
        {
            Ok(()) => info!(job_id = %job.id, "Released job on shutdown"),
            Err(e) => warn!(job_id = %job.id, error = %format!("{e:#}"), "Failed to release job"),
        }
    }

    async fn execute(&self, runner: &StageRunner, job: Job) {
        info!(job_id = %job.id, controller = %runner.controller(), "Running job");
        let reporter = HttpProgressReporter::new(
            self.client.clone(),
            &self.handle.agent_id,
            self.handle.tenant_id.clone(),
        );
        let outcome = runner
            .run(
                &job.id,
                &job.query,
                job.intermediate_state.as_ref(),
                self.sink.as_ref(),
                &reporter,
            )
            .await;
        let mut report = outcome.into_report(&job.id, &self.handle.agent_id);
        report.tenant_id = self.handle.tenant_id.clone();
        self.deliver(report).await;
    }

    /// Sends the final report until the control plane answers for the job.
    /// Reports are idempotent, so a resend after a lost response is harmless.
    async fn deliver(&self, report: JobReport) {
        let job_id = report.job_id.clone();
        let status = report.status;
        let reports = [report];
        let mut backoff = REPORT_BACKOFF_START;
        loop {
            match self.client.report(&reports).await {
                Ok(acks) => match acks.get(&job_id).copied() {
                    Some(true) => {
                        info!(job_id = %job_id, %status, "Job reported");
                        return;
                    }
                    Some(false) => {
                        error!(job_id = %job_id, %status, "Control plane refused the final report");
                        return;
                    }
                    None => warn!(job_id = %job_id, "Report answer did not mention the job"),
                },
                Err(e) => warn!(
                    job_id = %job_id,
                    error = %format!("{e:#}"),
                    retry_in_ms = backoff.as_millis() as u64,
                    "Final report failed"
                ),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    error!(job_id = %job_id, %status, "Shutting down with the final report undelivered");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(REPORT_BACKOFF_MAX);
        }
    }
}

async fn heartbeat_loop(
    client: ControlPlaneClient,
    handle: AgentHandle,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        match client.heartbeat(&handle).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(agent_id = %handle.agent_id, "Control plane forgot this agent, registering again");
                if let Err(e) = client.register(&handle).await {
                    warn!(error = %format!("{e:#}"), "Re-register failed");
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "Heartbeat failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_a_fifth() {
        let base = Duration::from_secs(10);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d >= base && d <= Duration::from_secs(12));
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
