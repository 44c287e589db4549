//! Application State

use std::sync::Arc;

use pocket_core::Orchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Sessions, tool registry and reasoning loop
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}
