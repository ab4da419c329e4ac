use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::core::agents::AgentHandle;
use crate::core::jobs::{Job, JobReport, JobRequest, ReportAck};
use crate::core::stages::ProgressReporter;

/// HTTP side of the pull protocol, as an agent speaks it.
#[derive(Clone)]
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

/// Unwraps the `{"success": ..}` envelope every control-plane route answers with.
async fn read_envelope(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    let ok = body
        .get("success")
        .and_then(|v| v.as_bool())
        .unwrap_or(status.is_success());
    if ok {
        return Ok(body);
    }
    let message = body
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("request failed");
    Err(anyhow!("control plane answered {}: {}", status, message))
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, api_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    pub async fn register(&self, handle: &AgentHandle) -> Result<()> {
        let resp = self
            .request(Method::POST, "/api/register")
            .json(handle)
            .send()
            .await?;
        read_envelope(resp).await?;
        Ok(())
    }

    /// `Ok(false)` means the control plane forgot this agent and it must register again.
    pub async fn heartbeat(&self, handle: &AgentHandle) -> Result<bool> {
        let resp = self
            .request(Method::POST, "/api/heartbeat")
            .json(handle)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        read_envelope(resp).await?;
        Ok(true)
    }

    pub async fn list_requests(&self, handle: &AgentHandle) -> Result<Vec<JobRequest>> {
        let resp = self
            .request(Method::POST, "/api/jobs/requests/list")
            .json(handle)
            .send()
            .await?;
        let body = read_envelope(resp).await?;
        let requests = body.get("requests").cloned().unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(requests)?)
    }

    /// `Ok(None)` when another agent won the claim or the job is gone.
    pub async fn accept(
        &self,
        job_id: &str,
        agent_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<Job>> {
        let mut query = vec![("job_id", job_id), ("agent_id", agent_id)];
        if let Some(tenant_id) = tenant_id {
            query.push(("tenant_id", tenant_id));
        }
        let resp = self
            .request(Method::GET, "/api/jobs/requests/accept")
            .query(&query)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_envelope(resp).await?;
        let job = body
            .get("job")
            .cloned()
            .ok_or_else(|| anyhow!("accept response carried no job"))?;
        Ok(Some(serde_json::from_value(job)?))
    }

    /// Gives a held job back; the control plane returns it to `SCHEDULED`.
    pub async fn reject(&self, job_id: &str, agent_id: &str, tenant_id: Option<&str>) -> Result<()> {
        let mut query = vec![("job_id", job_id), ("agent_id", agent_id)];
        if let Some(tenant_id) = tenant_id {
            query.push(("tenant_id", tenant_id));
        }
        let resp = self
            .request(Method::GET, "/api/jobs/requests/reject")
            .query(&query)
            .send()
            .await?;
        read_envelope(resp).await?;
        Ok(())
    }

    pub async fn report(&self, reports: &[JobReport]) -> Result<ReportAck> {
        let resp = self
            .request(Method::POST, "/api/jobs/report")
            .json(reports)
            .send()
            .await?;
        let body = read_envelope(resp).await?;
        let acks = body.get("acks").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(acks)?)
    }
}

/// Pushes each checkpoint as an `ACCEPTED` progress report for the held job.
pub struct HttpProgressReporter {
    client: ControlPlaneClient,
    agent_id: String,
    tenant_id: Option<String>,
}

impl HttpProgressReporter {
    pub fn new(client: ControlPlaneClient, agent_id: &str, tenant_id: Option<String>) -> Self {
        Self {
            client,
            agent_id: agent_id.to_string(),
            tenant_id,
        }
    }
}

#[async_trait]
impl ProgressReporter for HttpProgressReporter {
    async fn checkpoint(&self, job_id: &str, state: &Value) -> Result<()> {
        let mut report = JobReport::progress(job_id, self.agent_id.as_str());
        report.tenant_id = self.tenant_id.clone();
        report.intermediate_state = Some(state.clone());
        let acks = self.client.report(&[report]).await?;
        if acks.get(job_id).copied() != Some(true) {
            return Err(anyhow!("checkpoint for {} was not acknowledged", job_id));
        }
        Ok(())
    }
}
