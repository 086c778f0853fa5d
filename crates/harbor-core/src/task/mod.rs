//! Download task lifecycle: orchestration and the process-wide registry.
//!
//! # Module Organization
//!
//! - [`types`] - stages, requests, snapshots, abort outcomes
//! - [`registry`] - the injected concurrency-safe task map
//! - [`orchestrator`] - per-task download/merge/save pipelines

pub mod orchestrator;
pub mod registry;
pub mod types;

pub use orchestrator::Orchestrator;
pub use registry::TaskRegistry;
pub use types::{AbortOutcome, DownloadRequest, RequestedFile, TaskSnapshot, TaskStage};
