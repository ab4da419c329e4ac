use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Stage, StageRunner};

/// Controller name to its ordered stages. Built once at startup; the names
/// are what an agent advertises as its capabilities.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    controllers: BTreeMap<String, Vec<Arc<dyn Stage>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, controller: impl Into<String>, stages: Vec<Arc<dyn Stage>>) {
        self.controllers.insert(controller.into(), stages);
    }

    pub fn runner(&self, controller: &str) -> Option<StageRunner> {
        self.controllers
            .get(controller)
            .map(|stages| StageRunner::new(controller, stages.clone()))
    }

    pub fn controller_names(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
