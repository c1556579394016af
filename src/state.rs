use std::sync::Arc;

use crate::config::RelayConfig;
use crate::hub::Hub;

/// Shared application state, handed to every axum handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.hub_config())),
            config: Arc::new(config),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}
