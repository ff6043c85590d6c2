//! Core orchestration logic.
//!
//! This module contains:
//! - Pipeline: fail-fast job lists threading a state value
//! - Reconcile: rewriting saved variables with new endpoints
//! - State files: last-used resource ids
//! - Orchestrator: the build/remove staging workflows

pub mod orchestrator;
pub mod pipeline;
pub mod reconcile;
pub mod state_file;

// Re-export commonly used types
pub use orchestrator::{
    BuildStaging, LastIds, Orchestrator, PhaseReport, RemoveStaging, StagingBuild,
};
pub use pipeline::{effect, job, Job, Pipeline, PipelineError, PipelineRun, RunStatus, Step};
pub use reconcile::{
    update_cache_endpoints, update_database_urls, AssumeYes, DatabaseUrl, Decide, MalformedValue,
};
pub use state_file::{persist_last_id, read_last_id, resolve_id};
