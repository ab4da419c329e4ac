use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{parse_api_server_flags, parse_config_flag};
use crate::core::agents::AgentRegistry;
use crate::core::config::ControlPlaneConfig;
use crate::core::jobs::JobDispatcher;
use crate::core::lifecycle::{LifecycleManager, register_control_plane_tasks};
use crate::core::scheduler::{SchedulingSwitch, TriggerScheduler};
use crate::core::store::ControlPlaneStore;
use crate::core::terminal::{self, GuideSection, print_warn};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::init_logging;
use crate::platform::{NativePlatform, Platform};

pub async fn run_serve(args: &[String]) -> Result<()> {
    let log_tx = init_logging(false);

    let config_path = parse_config_flag(args, 2).unwrap_or_else(ControlPlaneConfig::default_path);
    let config = ControlPlaneConfig::load(&config_path).await?;
    let (api_host, api_port) =
        parse_api_server_flags(args, 2, config.server.host.clone(), config.server.port);

    let busy = NativePlatform::find_pids_on_port(api_port);
    if !busy.is_empty() {
        print_warn(&format!(
            "Port {} is already in use by PID(s) {}.",
            api_port,
            busy.join(", ")
        ));
    }

    let store = ControlPlaneStore::open(&config.database.path).await?;
    let agents = AgentRegistry::new(config.agents.heartbeat_ttl_secs);
    let dispatcher = JobDispatcher::new(
        store.clone(),
        agents.clone(),
        config.dispatch.max_requests_per_poll,
        config.dispatch.default_attempt_max,
    );
    let scheduling = SchedulingSwitch::new(config.scheduler.enabled);
    let trigger_scheduler = TriggerScheduler::new(
        store.clone(),
        scheduling.clone(),
        config.dispatch.default_attempt_max,
    );

    let api = ApiServer::new(ApiServerConfig {
        store,
        dispatcher,
        agents: agents.clone(),
        scheduling: scheduling.clone(),
        log_tx,
        api_host: api_host.clone(),
        api_port,
        api_token: config.server.api_token.clone(),
    });

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(api)));
    register_control_plane_tasks(
        &lifecycle,
        trigger_scheduler,
        &config.scheduler.tick_cron,
        agents,
        &config.agents.sweep_cron,
    )
    .await?;
    lifecycle.start().await?;

    GuideSection::new("Control Plane Started")
        .status("API Endpoint", &format!("http://{}:{}", api_host, api_port))
        .status("Database", &config.database.path.display().to_string())
        .status(
            "Scheduling",
            &if scheduling.is_enabled() {
                style("ENABLED").green().bold().to_string()
            } else {
                style("DISABLED").yellow().bold().to_string()
            },
        )
        .status(
            "Auth",
            if config.server.api_token.is_some() {
                "bearer token"
            } else {
                "loopback only"
            },
        )
        .blank()
        .info(&format!("Press {} to stop.", style("Ctrl+C").bold().yellow()))
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    terminal::print_goodbye();
    Ok(())
}
