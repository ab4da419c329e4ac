use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::{ControlPlaneError, ControlPlaneResult};
use crate::core::jobs::RequestScope;

/// What an agent declares about itself on register, heartbeat and poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHandle {
    pub agent_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub integration_ids: Vec<String>,
    /// Controller names this agent can run.
    #[serde(default)]
    pub controller_names: Vec<String>,
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub telemetry: serde_json::Value,
}

impl AgentHandle {
    pub fn request_scope(&self, limit: usize) -> RequestScope {
        RequestScope {
            controller_names: self.controller_names.clone(),
            tenant_id: self.tenant_id.clone(),
            integration_ids: self.integration_ids.clone(),
            reserved: self.reserved,
            limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredAgent {
    #[serde(flatten)]
    pub handle: AgentHandle,
    pub registered_at: i64,
    pub last_heartbeat_at: i64,
}

/// Live agents, keyed by id. Nothing here is persisted; a restarted control
/// plane learns its fleet again from the next round of heartbeats.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<Mutex<HashMap<String, RegisteredAgent>>>,
    ttl_secs: i64,
}

impl AgentRegistry {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            agents: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    pub async fn register(&self, handle: AgentHandle, now: i64) -> ControlPlaneResult<RegisteredAgent> {
        if handle.agent_id.trim().is_empty() {
            return Err(ControlPlaneError::InvalidRequest(
                "agent_id must not be empty".into(),
            ));
        }
        let mut agents = self.agents.lock().await;
        let registered_at = agents
            .get(&handle.agent_id)
            .map(|a| a.registered_at)
            .unwrap_or(now);
        let agent = RegisteredAgent {
            handle,
            registered_at,
            last_heartbeat_at: now,
        };
        info!(
            agent_id = %agent.handle.agent_id,
            tenant_id = ?agent.handle.tenant_id,
            controllers = ?agent.handle.controller_names,
            "Agent registered"
        );
        agents.insert(agent.handle.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    /// Refreshes a known agent. The tenant an agent registered with is pinned:
    /// a heartbeat declaring a different tenant is refused.
    pub async fn heartbeat(&self, handle: AgentHandle, now: i64) -> ControlPlaneResult<RegisteredAgent> {
        let mut agents = self.agents.lock().await;
        let Some(agent) = agents.get_mut(&handle.agent_id) else {
            return Err(ControlPlaneError::not_found("agent", handle.agent_id));
        };
        if let Some(pinned) = &agent.handle.tenant_id
            && handle.tenant_id.as_ref() != Some(pinned)
        {
            return Err(ControlPlaneError::TenantMismatch {
                declared: handle.tenant_id.unwrap_or_default(),
                actual: pinned.clone(),
            });
        }
        let tenant_id = agent.handle.tenant_id.clone().or(handle.tenant_id.clone());
        agent.handle = AgentHandle {
            tenant_id,
            ..handle
        };
        agent.last_heartbeat_at = now;
        Ok(agent.clone())
    }

    pub async fn get(&self, agent_id: &str) -> Option<RegisteredAgent> {
        self.agents.lock().await.get(agent_id).cloned()
    }

    pub async fn list(&self) -> Vec<RegisteredAgent> {
        let mut agents: Vec<_> = self.agents.lock().await.values().cloned().collect();
        agents.sort_by(|a, b| a.handle.agent_id.cmp(&b.handle.agent_id));
        agents
    }

    /// Drops agents that missed heartbeats for longer than the TTL.
    pub async fn evict_expired(&self, now: i64) -> Vec<String> {
        let mut agents = self.agents.lock().await;
        let expired: Vec<String> = agents
            .values()
            .filter(|a| now - a.last_heartbeat_at > self.ttl_secs)
            .map(|a| a.handle.agent_id.clone())
            .collect();
        for agent_id in &expired {
            agents.remove(agent_id);
            warn!(agent_id = %agent_id, ttl_secs = self.ttl_secs, "Evicted agent after missed heartbeats");
        }
        expired
    }
}
