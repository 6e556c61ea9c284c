//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::ws::Hub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(hub: Hub, config: RelayConfig) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}
