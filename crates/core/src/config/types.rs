use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::queue::QueueConfig;
use crate::stage::{StageCommand, StagesConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub stages: StagesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Interval between WebSocket ping frames.
    #[serde(default = "default_ws_heartbeat_secs")]
    pub ws_heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            ws_heartbeat_secs: default_ws_heartbeat_secs(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_ws_heartbeat_secs() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("distillery.db")
}

/// Configuration safe to expose over the API.
///
/// Stage arguments and working directories are left out since they
/// commonly carry tokens and local paths.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub stages: SanitizedStagesConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStagesConfig {
    pub download: Option<String>,
    pub transcribe: Option<String>,
    pub translate: Option<String>,
    pub process_video: Option<String>,
    pub analyze: Option<String>,
    pub publish: Option<String>,
}

fn program_name(command: &Option<StageCommand>) -> Option<String> {
    command
        .as_ref()
        .map(|c| c.program.display().to_string())
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let stages = &config.stages;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            queue: config.queue.clone(),
            stages: SanitizedStagesConfig {
                download: program_name(&stages.download),
                transcribe: program_name(&stages.transcribe),
                translate: program_name(&stages.translate),
                process_video: program_name(&stages.process_video),
                analyze: program_name(&stages.analyze),
                publish: program_name(&stages.publish),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_config_hides_args() {
        let config: Config = toml::from_str(
            r#"
[stages.publish]
program = "/usr/local/bin/publish"
args = ["--token", "secret"]
"#,
        )
        .unwrap();

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(
            sanitized.stages.publish.as_deref(),
            Some("/usr/local/bin/publish")
        );
        assert!(sanitized.stages.download.is_none());

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }
}
