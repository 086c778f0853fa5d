//! Harbor Core - headless library for fetching and assembling model artifacts.
//!
//! Harbor points at a remote model repository, discovers which files form a
//! (possibly multi-shard) model, downloads the shards, and reassembles them
//! into the single file the host application expects. It can be used
//! programmatically without any HTTP/RPC layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_core::{DownloadRequest, HarborApi, ModelKind};
//!
//! #[tokio::main]
//! async fn main() -> harbor_core::Result<()> {
//!     let api = HarborApi::new("/path/to/models")?;
//!
//!     // Discover model candidates in a repository
//!     let groups = api.scan_repo("acme/t2i-xl").await?;
//!
//!     // Download the first candidate
//!     let request = DownloadRequest::from_group(
//!         "acme/t2i-xl",
//!         &groups[0],
//!         groups[0].suggested_output_name.as_str(),
//!         ModelKind::Checkpoint,
//!     );
//!     let task_id = api.start_download(request)?;
//!
//!     // Poll progress until the task reaches a terminal stage
//!     let snapshot = api.get_progress(&task_id)?;
//!     println!("{}: {}", snapshot.stage.as_str(), snapshot.message);
//!
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod cancel;
pub mod config;
pub mod dest;
pub mod error;
pub mod hub;
pub mod merge;
pub mod naming;
pub mod scan;
pub mod task;

// Re-export commonly used types
pub use artifacts::ArtifactInfo;
pub use cancel::CancellationToken;
pub use dest::ModelKind;
pub use error::{HarborError, Result};
pub use hub::{HubClient, RemoteFile, RepoListing, ShardFetcher};
pub use scan::{FileEntry, FileFormat, RepoScanner, ShardGroup};
pub use task::{
    AbortOutcome, DownloadRequest, Orchestrator, RequestedFile, TaskRegistry, TaskSnapshot,
    TaskStage,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main API struct for Harbor operations.
///
/// The primary entry point for programmatic access: owns the task registry,
/// the scanner, and the orchestrator, wired to a listing/fetch backend. The
/// default constructor uses the HuggingFace Hub; tests and alternative
/// backends inject their own services via [`HarborApi::with_services`].
pub struct HarborApi {
    models_root: PathBuf,
    scanner: RepoScanner,
    orchestrator: Orchestrator,
    registry: Arc<TaskRegistry>,
}

impl std::fmt::Debug for HarborApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarborApi")
            .field("models_root", &self.models_root)
            .finish_non_exhaustive()
    }
}

impl HarborApi {
    /// Create an API instance backed by the HuggingFace Hub.
    ///
    /// `models_root` must already exist; destination subdirectories are
    /// created on demand. The Hub access token is read from `HF_TOKEN` once
    /// here.
    pub fn new(models_root: impl Into<PathBuf>) -> Result<Self> {
        let hub = Arc::new(HubClient::new()?);
        let models_root = models_root.into();
        Self::with_services(models_root, hub.clone(), hub)
    }

    /// Create an API instance over explicit listing and fetch services.
    pub fn with_services(
        models_root: impl Into<PathBuf>,
        listing: Arc<dyn RepoListing>,
        fetcher: Arc<dyn ShardFetcher>,
    ) -> Result<Self> {
        let models_root = models_root.into();
        if !models_root.is_dir() {
            return Err(HarborError::InvalidRequest {
                field: "models_root".to_string(),
                message: format!("not a directory: {}", models_root.display()),
            });
        }

        let registry = Arc::new(TaskRegistry::new());
        let scanner = RepoScanner::new(listing);
        let orchestrator = Orchestrator::new(registry.clone(), fetcher, models_root.clone());

        Ok(Self {
            models_root,
            scanner,
            orchestrator,
            registry,
        })
    }

    /// Scan a repository for model candidates.
    pub async fn scan_repo(&self, repo_id: &str) -> Result<Vec<ShardGroup>> {
        self.scanner.scan(repo_id).await
    }

    /// Start a download task; returns its id without blocking on the transfer.
    pub fn start_download(&self, request: DownloadRequest) -> Result<String> {
        self.orchestrator.start(request)
    }

    /// Progress snapshot for one task.
    pub fn get_progress(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.orchestrator.progress(task_id)
    }

    /// Request cancellation of a task.
    pub fn abort(&self, task_id: &str) -> Result<AbortOutcome> {
        self.orchestrator.abort(task_id)
    }

    /// Snapshots of every registered task, newest first.
    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.registry.list()
    }

    /// Evict one task from the registry.
    pub fn clear_task(&self, task_id: &str) -> Result<()> {
        self.registry.clear(task_id)
    }

    /// Evict all terminal tasks, returning how many were removed.
    pub fn clear_finished_tasks(&self) -> usize {
        self.registry.clear_finished()
    }

    /// List downloaded artifacts of one kind, newest first.
    pub async fn list_artifacts(&self, kind: ModelKind) -> Result<Vec<ArtifactInfo>> {
        artifacts::list_artifacts(&self.models_root, kind).await
    }

    /// Delete one downloaded artifact; the path must be inside the models root.
    pub async fn delete_artifact(&self, path: &Path) -> Result<()> {
        artifacts::delete_artifact(&self.models_root, path).await
    }

    /// The models root directory this instance writes under.
    pub fn models_root(&self) -> &Path {
        &self.models_root
    }
}
