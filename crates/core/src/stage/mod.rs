//! Pipeline stages and their collaborators.

mod command;
mod config;
mod error;
mod traits;
mod types;

pub use command::CommandStages;
pub use config::{StageCommand, StagesConfig};
pub use error::StageError;
pub use traits::{
    Analyzer, Downloader, Publisher, StageSet, Transcriber, Translator, VideoProcessor,
};
pub use types::*;
