//! Jobs: the persisted record of one pipeline run.

mod sqlite_store;
mod store;
mod types;
mod validate;

pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobError, JobFilter, JobStore};
pub use types::*;
pub use validate::{extract_video_id, is_valid_source_url};
