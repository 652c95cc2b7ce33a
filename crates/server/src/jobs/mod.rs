// crates/server/src/jobs/mod.rs
//! Background job system for search and media derivation.
//!
//! Provides:
//! - `JobRunner` — bounded pool, dedup, status table
//! - `JobState` — monotonic per-job state
//! - `JobDispatcher` — builds job bodies from `JobParams`

pub mod runner;
pub mod state;
pub mod tasks;
pub mod types;

pub use runner::JobRunner;
pub use state::JobState;
pub use tasks::JobDispatcher;
pub use types::{
    JobId, JobKind, JobOutput, JobParams, JobSnapshot, JobStatus, MediaOutput, MediaParams,
    SearchOutput, SearchParams,
};
