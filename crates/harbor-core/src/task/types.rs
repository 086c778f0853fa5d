//! Task lifecycle types shared by the orchestrator and registry.

use crate::dest::ModelKind;
use crate::scan::ShardGroup;
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a download task.
///
/// Transitions are monotonic forward: `Queued → Downloading → (Merging →)?
/// Saving → Completed`, with `Error` reachable from any non-terminal stage
/// and `Cancelled` reachable up to and including `Merging`. A terminal stage
/// is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStage {
    Queued,
    Downloading,
    Merging,
    Saving,
    Completed,
    Error,
    Cancelled,
}

impl TaskStage {
    /// Ordering position used to enforce forward-only transitions.
    /// All terminal stages share the highest ordinal.
    pub fn ordinal(&self) -> u8 {
        match self {
            TaskStage::Queued => 0,
            TaskStage::Downloading => 1,
            TaskStage::Merging => 2,
            TaskStage::Saving => 3,
            TaskStage::Completed | TaskStage::Error | TaskStage::Cancelled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStage::Completed | TaskStage::Error | TaskStage::Cancelled
        )
    }

    /// Whether an abort is still honored at this stage. Once saving begins
    /// the artifact is treated as committed.
    pub fn accepts_cancel(&self) -> bool {
        matches!(
            self,
            TaskStage::Queued | TaskStage::Downloading | TaskStage::Merging
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Queued => "queued",
            TaskStage::Downloading => "downloading",
            TaskStage::Merging => "merging",
            TaskStage::Saving => "saving",
            TaskStage::Completed => "completed",
            TaskStage::Error => "error",
            TaskStage::Cancelled => "cancelled",
        }
    }
}

/// One file requested for download, with its listing size when known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedFile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// A user-initiated download+merge+save request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub repo_id: String,
    /// Directory within the repository; empty for the repository root
    #[serde(default)]
    pub model_path: String,
    /// Files to download, in merge order
    pub files: Vec<RequestedFile>,
    pub output_name: String,
    pub model_kind: ModelKind,
}

impl DownloadRequest {
    /// Build a request from one scan candidate.
    pub fn from_group(
        repo_id: impl Into<String>,
        group: &ShardGroup,
        output_name: impl Into<String>,
        model_kind: ModelKind,
    ) -> Self {
        Self {
            repo_id: repo_id.into(),
            model_path: group.directory_path.clone(),
            files: group
                .file_entries
                .iter()
                .map(|e| RequestedFile {
                    name: e.name.clone(),
                    size_bytes: Some(e.size_bytes),
                })
                .collect(),
            output_name: output_name.into(),
            model_kind,
        }
    }
}

/// Read-only view of a task's state handed to external readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub repo_id: String,
    pub output_name: String,
    pub model_kind: ModelKind,
    pub stage: TaskStage,
    /// Bytes while downloading, shard count while merging
    pub current: u64,
    pub total: u64,
    pub message: String,
    /// RFC 3339
    pub started_at: String,
    pub cancel_requested: bool,
}

/// Result of an abort request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortOutcome {
    /// Cancellation requested; the running stage observes it at its next
    /// checkpoint
    Requested,
    /// Saving already began; the artifact is committed and the task runs on
    Refused,
    /// The task was already in a terminal stage
    AlreadyFinished,
}
