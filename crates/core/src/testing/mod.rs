//! Testing utilities and mock implementations.
//!
//! This module provides a mock implementation of every stage trait,
//! allowing pipeline and queue tests to run without external programs.
//!
//! # Example
//!
//! ```rust,ignore
//! use distillery_core::stage::StageSet;
//! use distillery_core::testing::{MockStages, StageGate};
//!
//! let gate = StageGate::new();
//! let stages = Arc::new(MockStages::new().with_gate(gate.clone()));
//! let queue = QueueManager::new(config, store, hub, StageSet::from_shared(stages.clone()));
//!
//! // Jobs now wait in the download stage until the gate opens.
//! gate.open();
//! ```

mod fixtures;
mod mock_stages;

pub use fixtures::{sample_url, sample_video_id, wait_until};
pub use mock_stages::{MockStages, RecordedCall, StageGate};
