//! Agent side of the pull protocol: register, heartbeat, poll, claim, run, report.

mod client;
mod sink;
mod stage;
mod worker;

pub use sink::JsonLinesSink;
pub use stage::HttpPagedStage;
pub use worker::SatelliteWorker;

use std::sync::Arc;

use crate::core::config::SatelliteConfig;
use crate::core::stages::{ControllerRegistry, Stage};

/// One controller per `[[controllers]]` table, its stages in file order.
pub fn build_registry(config: &SatelliteConfig) -> ControllerRegistry {
    let client = reqwest::Client::new();
    let mut registry = ControllerRegistry::new();
    for controller in &config.controllers {
        let stages: Vec<Arc<dyn Stage>> = controller
            .stages
            .iter()
            .map(|s| Arc::new(HttpPagedStage::from_config(s, client.clone())) as Arc<dyn Stage>)
            .collect();
        registry.register(controller.name.as_str(), stages);
    }
    registry
}
