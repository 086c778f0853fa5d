//! Process-wide registry of download task states.
//!
//! An explicit context object rather than ambient global state: the
//! orchestrator holds the only mutating handle, external readers get
//! snapshots. Lock scope is always a short critical section with no await
//! inside, so the registry is callable from both sync progress callbacks and
//! async pipeline code.
//!
//! Entries persist until the operator clears them; the registry has no size
//! cap. Task volume is operator-driven, but a very long-lived process that
//! never calls [`TaskRegistry::clear_finished`] grows without bound.

use crate::cancel::CancellationToken;
use crate::dest::ModelKind;
use crate::error::{HarborError, Result};
use crate::task::types::{AbortOutcome, TaskSnapshot, TaskStage};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{info, warn};

/// Internal mutable state for one task.
#[derive(Debug, Clone)]
pub(crate) struct TaskState {
    pub task_id: String,
    pub repo_id: String,
    pub output_name: String,
    pub model_kind: ModelKind,
    pub stage: TaskStage,
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub started_at: String,
    pub cancel: CancellationToken,
}

impl TaskState {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            repo_id: self.repo_id.clone(),
            output_name: self.output_name.clone(),
            model_kind: self.model_kind,
            stage: self.stage,
            current: self.current,
            total: self.total,
            message: self.message.clone(),
            started_at: self.started_at.clone(),
            cancel_requested: self.cancel.is_cancelled(),
        }
    }
}

/// Concurrency-safe map of task id to task state.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskState>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly queued task.
    pub(crate) fn insert(&self, state: TaskState) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.insert(state.task_id.clone(), state);
    }

    /// Advance a task to `stage`, updating its message.
    ///
    /// Backward transitions and transitions out of a terminal stage are
    /// refused, so external readers never observe a stage going backward.
    pub(crate) fn set_stage(&self, task_id: &str, stage: TaskStage, message: impl Into<String>) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let Some(state) = tasks.get_mut(task_id) else {
            return;
        };
        if state.stage.is_terminal() || stage.ordinal() < state.stage.ordinal() {
            warn!(
                "Refusing stage transition {} -> {} for task {}",
                state.stage.as_str(),
                stage.as_str(),
                task_id
            );
            return;
        }
        state.stage = stage;
        state.message = message.into();
        if stage.is_terminal() {
            info!("Task {} finished: {}", task_id, stage.as_str());
        }
    }

    /// Update progress counters and the tick message for the current stage.
    pub(crate) fn update_progress(
        &self,
        task_id: &str,
        current: u64,
        total: u64,
        message: impl Into<String>,
    ) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = tasks.get_mut(task_id) {
            if state.stage.is_terminal() {
                return;
            }
            state.current = current;
            state.total = total;
            state.message = message.into();
        }
    }

    /// Request cancellation of a task.
    ///
    /// A no-op acknowledgement on terminal tasks, a refusal once saving has
    /// begun, otherwise the token is set and the running stage observes it
    /// at its next checkpoint.
    pub fn request_cancel(&self, task_id: &str) -> Result<AbortOutcome> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        let state = tasks.get(task_id).ok_or_else(|| HarborError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;

        if state.stage.is_terminal() {
            return Ok(AbortOutcome::AlreadyFinished);
        }
        if !state.stage.accepts_cancel() {
            return Ok(AbortOutcome::Refused);
        }
        state.cancel.cancel();
        info!("Cancellation requested for task {}", task_id);
        Ok(AbortOutcome::Requested)
    }

    /// Snapshot of one task.
    pub fn snapshot(&self, task_id: &str) -> Result<TaskSnapshot> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(task_id)
            .map(TaskState::snapshot)
            .ok_or_else(|| HarborError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Snapshots of every registered task, newest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<TaskSnapshot> = tasks.values().map(TaskState::snapshot).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.task_id.cmp(&b.task_id)));
        all
    }

    /// Evict one task.
    pub fn clear(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| HarborError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Evict every terminal task, returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|_, state| !state.stage.is_terminal());
        before - tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state(task_id: &str, stage: TaskStage) -> TaskState {
        TaskState {
            task_id: task_id.to_string(),
            repo_id: "acme/model".to_string(),
            output_name: "model".to_string(),
            model_kind: ModelKind::Checkpoint,
            stage,
            current: 0,
            total: 0,
            message: String::new(),
            started_at: "2025-01-01T00:00:00Z".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_snapshot_unknown_task_is_not_found() {
        let registry = TaskRegistry::new();
        let err = registry.snapshot("ghost").unwrap_err();
        assert!(matches!(err, HarborError::TaskNotFound { .. }));
    }

    #[test]
    fn test_stage_never_goes_backward() {
        let registry = TaskRegistry::new();
        registry.insert(make_state("t1", TaskStage::Merging));

        registry.set_stage("t1", TaskStage::Downloading, "backwards");

        assert_eq!(registry.snapshot("t1").unwrap().stage, TaskStage::Merging);
    }

    #[test]
    fn test_terminal_stage_is_never_left() {
        let registry = TaskRegistry::new();
        registry.insert(make_state("t1", TaskStage::Queued));

        registry.set_stage("t1", TaskStage::Cancelled, "cancelled");
        registry.set_stage("t1", TaskStage::Completed, "too late");
        registry.update_progress("t1", 5, 10, "too late");

        let snap = registry.snapshot("t1").unwrap();
        assert_eq!(snap.stage, TaskStage::Cancelled);
        assert_eq!(snap.current, 0);
    }

    #[test]
    fn test_request_cancel_sets_token() {
        let registry = TaskRegistry::new();
        let state = make_state("t1", TaskStage::Downloading);
        let token = state.cancel.clone();
        registry.insert(state);

        let outcome = registry.request_cancel("t1").unwrap();

        assert_eq!(outcome, AbortOutcome::Requested);
        assert!(token.is_cancelled());
        assert!(registry.snapshot("t1").unwrap().cancel_requested);
    }

    #[test]
    fn test_request_cancel_refused_while_saving() {
        let registry = TaskRegistry::new();
        let state = make_state("t1", TaskStage::Saving);
        let token = state.cancel.clone();
        registry.insert(state);

        let outcome = registry.request_cancel("t1").unwrap();

        assert_eq!(outcome, AbortOutcome::Refused);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_request_cancel_noop_on_terminal() {
        let registry = TaskRegistry::new();
        registry.insert(make_state("t1", TaskStage::Completed));

        let outcome = registry.request_cancel("t1").unwrap();
        assert_eq!(outcome, AbortOutcome::AlreadyFinished);
    }

    #[test]
    fn test_request_cancel_unknown_task() {
        let registry = TaskRegistry::new();
        let err = registry.request_cancel("ghost").unwrap_err();
        assert!(matches!(err, HarborError::TaskNotFound { .. }));
    }

    #[test]
    fn test_clear_and_clear_finished() {
        let registry = TaskRegistry::new();
        registry.insert(make_state("done", TaskStage::Completed));
        registry.insert(make_state("failed", TaskStage::Error));
        registry.insert(make_state("running", TaskStage::Downloading));

        assert_eq!(registry.clear_finished(), 2);
        assert_eq!(registry.list().len(), 1);

        registry.clear("running").unwrap();
        assert!(registry.list().is_empty());
        assert!(registry.clear("running").is_err());
    }

    #[test]
    fn test_progress_updates_visible_in_snapshot() {
        let registry = TaskRegistry::new();
        registry.insert(make_state("t1", TaskStage::Downloading));

        registry.update_progress("t1", 512, 2048, "Downloading shard 1 of 2");

        let snap = registry.snapshot("t1").unwrap();
        assert_eq!(snap.current, 512);
        assert_eq!(snap.total, 2048);
        assert_eq!(snap.message, "Downloading shard 1 of 2");
    }
}
