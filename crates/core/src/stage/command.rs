//! Stage collaborators backed by external programs.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::config::StagesConfig;
use super::error::StageError;
use super::traits::{Analyzer, Downloader, Publisher, Transcriber, Translator, VideoProcessor};
use super::types::{
    AnalyzeInput, DownloadInput, DownloadOutput, ProcessVideoInput, ProcessedVideo, PublishInput,
    Stage, TranscribeInput, Transcript, TranslateInput, Translation,
};
use crate::job::{ContentAnalysis, PublishingOutcome};

/// Bytes of stderr kept in a process error.
const STDERR_TAIL: usize = 2048;

/// Runs each stage as a configured external program.
///
/// The stage input is written to the program's stdin as JSON; the program
/// prints its output as JSON on stdout. A non-zero exit fails the stage.
#[derive(Debug, Clone)]
pub struct CommandStages {
    config: StagesConfig,
}

impl CommandStages {
    pub fn new(config: StagesConfig) -> Self {
        Self { config }
    }

    fn run<I, O>(&self, stage: Stage, input: &I) -> Result<O, StageError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let command = self
            .config
            .command(stage)
            .ok_or(StageError::NotConfigured(stage))?;

        let payload = serde_json::to_vec(input)
            .map_err(|e| StageError::failed(format!("Failed to encode {} input: {}", stage, e)))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            stage = %stage,
            program = %command.program.display(),
            "Running stage command"
        );

        let mut child = cmd.spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| StageError::failed("Stage command stdin unavailable"))?;

        // stdin is fed while stdout and stderr are drained.
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(&payload));
            let output = child.wait_with_output();
            match writer.join() {
                Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                    warn!(stage = %stage, error = %e, "Failed to write stage input");
                }
                Err(_) => warn!(stage = %stage, "Stage input writer panicked"),
                _ => {}
            }
            output
        })?;

        if !output.status.success() {
            return Err(StageError::Process {
                program: command.program.display().to_string(),
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| StageError::InvalidOutput(format!("{}: {}", stage, e)))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

impl Downloader for CommandStages {
    fn download(&self, input: DownloadInput) -> Result<DownloadOutput, StageError> {
        self.run(Stage::Download, &input)
    }
}

impl Transcriber for CommandStages {
    fn transcribe(&self, input: TranscribeInput) -> Result<Transcript, StageError> {
        self.run(Stage::Transcribe, &input)
    }
}

impl Translator for CommandStages {
    fn translate(&self, input: TranslateInput) -> Result<Translation, StageError> {
        self.run(Stage::Translate, &input)
    }
}

impl VideoProcessor for CommandStages {
    fn process_video(&self, input: ProcessVideoInput) -> Result<ProcessedVideo, StageError> {
        self.run(Stage::ProcessVideo, &input)
    }
}

impl Analyzer for CommandStages {
    fn analyze(&self, input: AnalyzeInput) -> Result<ContentAnalysis, StageError> {
        self.run(Stage::Analyze, &input)
    }
}

impl Publisher for CommandStages {
    fn publish(&self, input: PublishInput) -> Result<Vec<PublishingOutcome>, StageError> {
        self.run(Stage::Publish, &input)
    }
}
