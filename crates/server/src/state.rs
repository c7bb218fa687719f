use std::sync::Arc;
use std::time::Duration;

use distillery_core::{Config, JobService, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    service: Arc<JobService>,
}

impl AppState {
    pub fn new(config: Config, service: Arc<JobService>) -> Self {
        Self { config, service }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn service(&self) -> &JobService {
        self.service.as_ref()
    }

    /// Interval between WebSocket ping frames.
    pub fn ws_heartbeat(&self) -> Duration {
        Duration::from_secs(self.config.server.ws_heartbeat_secs)
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.config.server.cors_origins
    }
}
