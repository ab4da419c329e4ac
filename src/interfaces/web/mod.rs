pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::agents::AgentRegistry;
use crate::core::jobs::JobDispatcher;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::results::TriggerResultAggregator;
use crate::core::scheduler::SchedulingSwitch;
use crate::core::store::ControlPlaneStore;

/// Everything the HTTP handlers reach for. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: ControlPlaneStore,
    pub(crate) dispatcher: JobDispatcher,
    pub(crate) agents: AgentRegistry,
    pub(crate) results: TriggerResultAggregator,
    pub(crate) scheduling: SchedulingSwitch,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_host: String,
    pub(crate) api_port: u16,
    pub(crate) api_token: Option<String>,
}

pub struct ApiServerConfig {
    pub store: ControlPlaneStore,
    pub dispatcher: JobDispatcher,
    pub agents: AgentRegistry,
    pub scheduling: SchedulingSwitch,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
}

pub struct ApiServer {
    state: AppState,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        let results = TriggerResultAggregator::new(config.store.clone());
        Self {
            state: AppState {
                store: config.store,
                dispatcher: config.dispatcher,
                agents: config.agents,
                results,
                scheduling: config.scheduling,
                log_tx: config.log_tx,
                api_host: config.api_host,
                api_port: config.api_port,
                api_token: config.api_token,
            },
            shutdown: CancellationToken::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.state.api_host, self.state.api_port)
    }

    pub fn app(&self) -> axum::Router {
        router::build_api_router(self.state.clone())
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Control plane API initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = self.address();
        // bind here so a busy port fails startup instead of a background task
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding control plane API on {addr}"))?;
        let app = self.app();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            info!("Control plane API running at http://{addr}");
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = server.await {
                error!("Control plane API crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Control plane API shutting down...");
        self.shutdown.cancel();
        Ok(())
    }
}
