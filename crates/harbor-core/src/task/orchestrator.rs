//! Download task orchestration.
//!
//! Each started task runs an independent pipeline: fetch the requested files
//! into a per-task staging directory, merge them when the model is split,
//! then move the finished artifact into the directory resolved from its
//! model kind. The registry is updated at every stage transition and
//! progress tick; cancellation is observed at the fetch stream's chunks and
//! between merge shards, and refused once saving begins.

use crate::cancel::CancellationToken;
use crate::config::PathsConfig;
use crate::error::{HarborError, Result};
use crate::hub::{validate_repo_id, FetchFile, ShardFetcher};
use crate::merge;
use crate::naming::{ensure_extension, is_safe_name};
use crate::scan::{declared_shard_total, FileFormat};
use crate::task::registry::{TaskRegistry, TaskState};
use crate::task::types::{DownloadRequest, TaskStage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Drives download tasks from request to finished artifact.
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    fetcher: Arc<dyn ShardFetcher>,
    models_root: PathBuf,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TaskRegistry>,
        fetcher: Arc<dyn ShardFetcher>,
        models_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            models_root: models_root.into(),
        }
    }

    /// Validate a request, register it as queued, and spawn its pipeline.
    ///
    /// Returns the task id without waiting for any transfer to begin.
    pub fn start(&self, request: DownloadRequest) -> Result<String> {
        validate_repo_id(&request.repo_id)?;

        if request.files.is_empty() {
            return Err(HarborError::InvalidRequest {
                field: "files".to_string(),
                message: "at least one file is required".to_string(),
            });
        }
        if !is_safe_name(&request.output_name) {
            return Err(HarborError::InvalidRequest {
                field: "output_name".to_string(),
                message: format!(
                    "'{}' is empty or not filesystem-safe",
                    request.output_name
                ),
            });
        }

        let format = FileFormat::from_filename(&request.files[0].name).ok_or_else(|| {
            HarborError::InvalidRequest {
                field: "files".to_string(),
                message: format!("unrecognized model format: {}", request.files[0].name),
            }
        })?;
        if request
            .files
            .iter()
            .any(|f| FileFormat::from_filename(&f.name) != Some(format))
        {
            return Err(HarborError::InvalidRequest {
                field: "files".to_string(),
                message: "requested files mix model formats".to_string(),
            });
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        self.registry.insert(TaskState {
            task_id: task_id.clone(),
            repo_id: request.repo_id.clone(),
            output_name: request.output_name.clone(),
            model_kind: request.model_kind,
            stage: TaskStage::Queued,
            current: 0,
            total: 0,
            message: "Queued".to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            cancel: cancel.clone(),
        });

        info!(
            "Task {} queued: {} -> {} ({} file(s))",
            task_id,
            request.repo_id,
            request.output_name,
            request.files.len()
        );

        let registry = self.registry.clone();
        let fetcher = self.fetcher.clone();
        let models_root = self.models_root.clone();
        let id = task_id.clone();

        tokio::spawn(async move {
            let staging_dir = models_root.join(PathsConfig::STAGING_DIR_NAME).join(&id);

            let result = run_pipeline(
                &registry,
                fetcher.as_ref(),
                &models_root,
                &staging_dir,
                &id,
                &request,
                format,
                &cancel,
            )
            .await;

            // Staging is removed on every exit path, before the terminal
            // stage is published, so a failed or cancelled task leaves
            // nothing behind
            let _ = tokio::fs::remove_dir_all(&staging_dir).await;

            match result {
                Ok(final_path) => {
                    registry.set_stage(
                        &id,
                        TaskStage::Completed,
                        format!("Saved to {}", final_path.display()),
                    );
                }
                Err(HarborError::Cancelled) => {
                    registry.set_stage(&id, TaskStage::Cancelled, "Cancelled by user");
                }
                Err(e) => {
                    error!("Task {} failed: {}", id, e);
                    registry.set_stage(&id, TaskStage::Error, e.to_string());
                }
            }
        });

        Ok(task_id)
    }

    /// Snapshot of one task's progress.
    pub fn progress(&self, task_id: &str) -> Result<crate::task::types::TaskSnapshot> {
        self.registry.snapshot(task_id)
    }

    /// Request cancellation of a running task.
    pub fn abort(&self, task_id: &str) -> Result<crate::task::types::AbortOutcome> {
        self.registry.request_cancel(task_id)
    }
}

/// The per-task pipeline: download, merge, save.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    registry: &Arc<TaskRegistry>,
    fetcher: &dyn ShardFetcher,
    models_root: &std::path::Path,
    staging_dir: &std::path::Path,
    task_id: &str,
    request: &DownloadRequest,
    format: FileFormat,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    // Stage 1: download into staging
    registry.set_stage(
        task_id,
        TaskStage::Downloading,
        format!("Downloading {} file(s)", request.files.len()),
    );

    let fetch_files: Vec<FetchFile> = request
        .files
        .iter()
        .map(|f| FetchFile {
            path: if request.model_path.is_empty() {
                f.name.clone()
            } else {
                format!("{}/{}", request.model_path, f.name)
            },
            size_bytes: f.size_bytes,
        })
        .collect();

    let byte_progress = {
        let registry = registry.clone();
        let task_id = task_id.to_string();
        Arc::new(move |bytes: u64, total: u64| {
            registry.update_progress(
                &task_id,
                bytes,
                total,
                format!("Downloaded {} of {}", human_size(bytes), human_size(total)),
            );
        })
    };

    let local_paths = fetcher
        .fetch(
            &request.repo_id,
            &fetch_files,
            staging_dir,
            byte_progress,
            cancel,
        )
        .await?;

    cancel.checkpoint()?;

    // Stage 2: merge when the model is split
    let filenames: Vec<String> = request.files.iter().map(|f| f.name.clone()).collect();
    let declared_total = declared_shard_total(&filenames).unwrap_or(local_paths.len());
    let final_name = ensure_extension(&request.output_name, format.extension());
    let merged_path = staging_dir.join(&final_name);

    if local_paths.len() > 1 {
        registry.set_stage(
            task_id,
            TaskStage::Merging,
            format!("Merging {} shards", local_paths.len()),
        );
        let shard_progress = {
            let registry = registry.clone();
            let task_id = task_id.to_string();
            move |done: usize, total: usize| {
                registry.update_progress(
                    &task_id,
                    done as u64,
                    total as u64,
                    format!("Merged shard {} of {}", done, total),
                );
            }
        };
        merge::merge(
            &local_paths,
            format,
            declared_total,
            &merged_path,
            &shard_progress,
            cancel,
        )
        .await?;
    } else {
        merge::merge(
            &local_paths,
            format,
            declared_total,
            &merged_path,
            &|_, _| {},
            cancel,
        )
        .await?;
    }

    // Last checkpoint: once saving begins the artifact is committed
    cancel.checkpoint()?;

    // Stage 3: save into the resolved destination
    registry.set_stage(task_id, TaskStage::Saving, "Saving artifact");
    let dest_dir = request.model_kind.resolve(models_root);
    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(|e| HarborError::io_with_path(e, &dest_dir))?;
    let final_path = dest_dir.join(&final_name);
    merge::move_into_place(&merged_path, &final_path).await?;

    Ok(final_path)
}

/// Compact byte count for progress messages.
fn human_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{} B", bytes)
    }
}
