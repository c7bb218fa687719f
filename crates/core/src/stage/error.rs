//! Error types for stage collaborators.

use thiserror::Error;

use super::Stage;

/// Failure reported by a stage collaborator.
#[derive(Debug, Error)]
pub enum StageError {
    /// No collaborator is configured for the stage.
    #[error("No command configured for stage {0}")]
    NotConfigured(Stage),

    /// I/O error while running the collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// External program exited unsuccessfully.
    #[error("{program} exited with {}: {stderr}", describe_exit(.code))]
    Process {
        program: String,
        /// Exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,
        stderr: String,
    },

    /// Collaborator output could not be decoded.
    #[error("Invalid stage output: {0}")]
    InvalidOutput(String),

    /// Collaborator reported a failure.
    #[error("{0}")]
    Failed(String),

    /// Collaborator panicked on the blocking pool.
    #[error("Stage collaborator panicked: {0}")]
    Panicked(String),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "signal".to_string(),
    }
}
