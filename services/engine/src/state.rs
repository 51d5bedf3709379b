use crate::config::Config;
use crate::settlement::SettlementCoordinator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<SettlementCoordinator>,
}

impl AppState {
    pub fn new(config: Config, coordinator: Arc<SettlementCoordinator>) -> Self {
        Self {
            config: Arc::new(config),
            coordinator,
        }
    }
}
