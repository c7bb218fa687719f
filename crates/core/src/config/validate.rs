use super::{types::Config, ConfigError};
use crate::stage::{Stage, StageCommand};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - WebSocket heartbeat interval is positive
/// - Queue has at least one worker and a positive dequeue timeout
/// - Configured stage commands name a program
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.server.ws_heartbeat_secs == 0 {
        return Err(ConfigError::ValidationError(
            "server.ws_heartbeat_secs must be greater than 0".to_string(),
        ));
    }

    if config.queue.max_workers == 0 {
        return Err(ConfigError::ValidationError(
            "queue.max_workers must be at least 1".to_string(),
        ));
    }

    if config.queue.dequeue_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "queue.dequeue_timeout_ms must be greater than 0".to_string(),
        ));
    }

    for stage in Stage::ALL {
        if let Some(StageCommand { program, .. }) = config.stages.command(stage) {
            if program.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "stages.{}.program cannot be empty",
                    stage.key()
                )));
            }
        }
    }

    Ok(())
}
