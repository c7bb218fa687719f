pub mod config;
pub mod hub;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod stage;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    SanitizedConfig, ServerConfig,
};
pub use hub::{BroadcastHub, LogEvent, ObserverId, StatusEvent, Subscription};
pub use job::{
    CreateJobRequest, Job, JobDetail, JobError, JobFilter, JobPage, JobStatistics, JobStatus,
    JobStore, LogEntry, LogLevel, SqliteJobStore,
};
pub use pipeline::{CancelReason, PipelineError, PipelineRunner, RunOutcome};
pub use queue::{QueueConfig, QueueManager, QueueStatus};
pub use service::{JobService, RecoveryReport};
pub use stage::{CommandStages, Stage, StageCommand, StageError, StageSet, StagesConfig};
