use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tracing::{error, info, warn};

use crate::core::agents::AgentRegistry;
use crate::core::scheduler::TriggerScheduler;
use crate::core::store::now_ts;

#[derive(Debug, PartialEq)]
pub enum LifecycleState {
    Init,
    Start,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<Mutex<dyn LifecycleComponent + Send + Sync>>>,
    pub scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            scheduler,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn attach(&mut self, component: Arc<Mutex<dyn LifecycleComponent + Send + Sync>>) {
        self.components.push(component);
    }

    /// Registers a recurring task on the shared cron scheduler (six-field cron, seconds first).
    pub async fn add_cron<F, Fut>(&self, name: &str, cron: &str, task: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = Arc::new(task);
        let job = tokio_cron_scheduler::Job::new_async(cron, move |_uuid, mut _l| {
            let task = task.clone();
            Box::pin(async move {
                task().await;
            })
        })
        .with_context(|| format!("invalid cron '{cron}' for {name}"))?;
        self.scheduler.add(job).await?;
        info!("Registered periodic task [{}] on '{}'", name, cron);
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        info!("Lifecycle Phase: Start");
        self.state = LifecycleState::Start;
        for comp in &self.components {
            comp.lock().await.on_start().await?;
        }

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;

        Ok(())
    }

    /// Stops every component once. Later calls are no-ops.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == LifecycleState::Shutdown {
            return Ok(());
        }
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in &self.components {
            if let Err(e) = comp.lock().await.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }
        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Cron scheduler shutdown error: {}", e);
        }

        Ok(())
    }
}

/// Wires the trigger tick and the agent TTL sweep onto the lifecycle's cron scheduler.
pub async fn register_control_plane_tasks(
    lifecycle: &LifecycleManager,
    scheduler: TriggerScheduler,
    tick_cron: &str,
    agents: AgentRegistry,
    sweep_cron: &str,
) -> Result<()> {
    lifecycle
        .add_cron("trigger-tick", tick_cron, move || {
            let scheduler = scheduler.clone();
            async move {
                match scheduler.run_once(now_ts()).await {
                    Ok(fired) if !fired.is_empty() => {
                        info!(iterations = fired.len(), "Scheduling tick fired triggers")
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %format!("{e:#}"), "Scheduling tick failed"),
                }
            }
        })
        .await?;

    lifecycle
        .add_cron("agent-sweep", sweep_cron, move || {
            let agents = agents.clone();
            async move {
                let evicted = agents.evict_expired(now_ts()).await;
                if !evicted.is_empty() {
                    info!(evicted = evicted.len(), "Agent sweep finished");
                }
            }
        })
        .await
}
