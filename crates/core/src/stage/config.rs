//! Stage command configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Stage;

/// An external program implementing one stage.
///
/// The program receives the stage input as JSON on stdin and must print the
/// stage output as JSON on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Commands for each stage. Unset stages fail with `NotConfigured`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default)]
    pub download: Option<StageCommand>,
    #[serde(default)]
    pub transcribe: Option<StageCommand>,
    #[serde(default)]
    pub translate: Option<StageCommand>,
    #[serde(default)]
    pub process_video: Option<StageCommand>,
    #[serde(default)]
    pub analyze: Option<StageCommand>,
    #[serde(default)]
    pub publish: Option<StageCommand>,
}

impl StagesConfig {
    pub fn command(&self, stage: Stage) -> Option<&StageCommand> {
        match stage {
            Stage::Download => self.download.as_ref(),
            Stage::Transcribe => self.transcribe.as_ref(),
            Stage::Translate => self.translate.as_ref(),
            Stage::ProcessVideo => self.process_video.as_ref(),
            Stage::Analyze => self.analyze.as_ref(),
            Stage::Publish => self.publish.as_ref(),
        }
    }

    /// Stages with no command configured.
    pub fn missing(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.command(*stage).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            [download]
            program = "/opt/stages/download"

            [publish]
            program = "publish"
            args = ["--dry-run"]
            working_dir = "/srv/publish"
        "#;
        let config: StagesConfig = toml::from_str(toml).unwrap();
        assert!(config.command(Stage::Download).is_some());
        assert_eq!(
            config.command(Stage::Publish).unwrap().working_dir,
            Some(PathBuf::from("/srv/publish"))
        );
        assert_eq!(
            config.missing(),
            vec![
                Stage::Transcribe,
                Stage::Translate,
                Stage::ProcessVideo,
                Stage::Analyze
            ]
        );
    }
}
