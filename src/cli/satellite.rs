use anyhow::{Result, bail};
use std::sync::Arc;
use tracing::info;

use super::parse_config_flag;
use crate::core::config::SatelliteConfig;
use crate::core::terminal::{self, GuideSection};
use crate::logging::init_logging;
use crate::satellite::{JsonLinesSink, SatelliteWorker, build_registry};

pub async fn run_satellite(args: &[String]) -> Result<()> {
    let _log_tx = init_logging(false);

    let config_path = parse_config_flag(args, 2).unwrap_or_else(SatelliteConfig::default_path);
    let config = SatelliteConfig::load(&config_path).await?;
    let registry = build_registry(&config);
    if registry.is_empty() {
        bail!(
            "no [[controllers]] configured in {}; run 'ingest-control init --satellite' for a template",
            config_path.display()
        );
    }

    let mut guide = GuideSection::new("Satellite")
        .status("Agent", &config.agent_id)
        .status("Control Plane", &config.control_plane_url)
        .status("Output", &config.output_dir.display().to_string())
        .blank();
    for name in registry.controller_names() {
        if let Some(runner) = registry.runner(&name) {
            guide = guide.status(&name, &runner.stage_names().join(" > "));
        }
    }

    let sink = Arc::new(JsonLinesSink::new(&config.output_dir));
    let worker = SatelliteWorker::new(&config, registry, sink);
    guide.print();
    println!();

    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing current job");
            shutdown.cancel();
        }
    });

    worker.run().await?;
    terminal::print_goodbye();
    Ok(())
}
