//! HuggingFace Hub client for repository listing and shard fetching.
//!
//! The scanner and orchestrator consume the Hub through the [`RepoListing`]
//! and [`ShardFetcher`] traits; [`HubClient`] is the production
//! implementation of both.
//!
//! # Module Organization
//!
//! - this module - client construction, auth token handling, file listing
//! - [`fetch`] - streaming bulk fetch with byte progress and cancellation

mod fetch;

pub use fetch::FetchFile;

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{HarborError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// One file in a remote repository listing.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Repository-relative path, e.g. `vae/model-00001-of-00002.safetensors`
    pub path: String,
    pub size_bytes: u64,
}

/// Listing service: produce a flat recursive file listing for a repository.
#[async_trait]
pub trait RepoListing: Send + Sync {
    /// List every file in the repository with its size.
    ///
    /// Fails with [`HarborError::RepoNotFound`] or
    /// [`HarborError::AccessDenied`] distinctly from transport failures, so
    /// callers can suggest checking the identifier versus the token.
    async fn list_files(&self, repo_id: &str) -> Result<Vec<RemoteFile>>;
}

/// Byte-progress callback: `(cumulative_bytes, total_bytes)` across all
/// files of one fetch call.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Bulk fetch service: download a set of repository files to a directory.
#[async_trait]
pub trait ShardFetcher: Send + Sync {
    /// Download `files` into `dest_dir`, reporting cumulative byte progress
    /// and honoring `cancel` mid-transfer.
    ///
    /// Returns the local paths in the same order as `files`.
    async fn fetch(
        &self,
        repo_id: &str,
        files: &[FetchFile],
        dest_dir: &Path,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>>;
}

/// Validate that a repository identifier has the shape `owner/name`.
pub fn validate_repo_id(repo_id: &str) -> Result<()> {
    let trimmed = repo_id.trim();
    if trimmed.is_empty() {
        return Err(HarborError::InvalidRequest {
            field: "repo_id".to_string(),
            message: "repository id is required".to_string(),
        });
    }
    let mut parts = trimmed.splitn(2, '/');
    let owner = parts.next().unwrap_or("");
    let name = parts.next().unwrap_or("");
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return Err(HarborError::InvalidRequest {
            field: "repo_id".to_string(),
            message: format!("expected owner/name, got '{}'", repo_id),
        });
    }
    Ok(())
}

/// Client for HuggingFace Hub operations.
pub struct HubClient {
    /// HTTP client for API requests (has a total timeout)
    client: Client,
    /// HTTP client for downloads (connect timeout only)
    pub(crate) download_client: Client,
    /// Access token read from the environment once at construction.
    /// Never logged and never embedded in error messages.
    auth_token: Option<String>,
}

impl std::fmt::Debug for HubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClient")
            .field("has_auth_token", &self.auth_token.is_some())
            .finish()
    }
}

impl HubClient {
    /// Create a new Hub client.
    ///
    /// Reads the access token from the `HF_TOKEN` environment variable; a
    /// missing token is fine for public repositories.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| HarborError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        // Separate client for downloads: a total timeout would kill
        // multi-gigabyte transfers, so only the connect phase is bounded.
        let download_client = Client::builder()
            .connect_timeout(NetworkConfig::DOWNLOAD_CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| HarborError::Network {
                message: format!("Failed to create download HTTP client: {}", e),
                cause: None,
            })?;

        let auth_token = std::env::var(NetworkConfig::TOKEN_ENV_VAR)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if auth_token.is_some() {
            info!("Hub access token found in environment");
        }

        Ok(Self {
            client,
            download_client,
            auth_token,
        })
    }

    /// Bearer header value for authenticated requests, if a token is set.
    pub(crate) fn auth_header_value(&self) -> Option<String> {
        self.auth_token.as_ref().map(|t| format!("Bearer {}", t))
    }
}

/// File entry from the Hub tree API.
#[derive(Debug, Deserialize)]
struct HubTreeEntry {
    #[serde(rename = "type")]
    entry_type: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    lfs: Option<HubLfsInfo>,
}

/// LFS pointer information; `size` is the real payload size.
#[derive(Debug, Deserialize)]
struct HubLfsInfo {
    size: u64,
}

#[async_trait]
impl RepoListing for HubClient {
    async fn list_files(&self, repo_id: &str) -> Result<Vec<RemoteFile>> {
        let url = format!(
            "{}/models/{}/tree/main?recursive=true",
            NetworkConfig::HUB_API_BASE,
            repo_id
        );

        let mut request = self.client.get(&url);
        if let Some(auth) = self.auth_header_value() {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await.map_err(|e| HarborError::Network {
            message: format!("Failed to fetch repository listing: {}", e),
            cause: Some(e.to_string()),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(HarborError::RepoNotFound {
                repo_id: repo_id.to_string(),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(HarborError::AccessDenied {
                repo_id: repo_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(HarborError::Network {
                message: format!("Hub API returned {}", status),
                cause: None,
            });
        }

        let entries: Vec<HubTreeEntry> =
            response.json().await.map_err(|e| HarborError::Json {
                message: format!("Failed to parse repository listing: {}", e),
                source: None,
            })?;

        let files = entries
            .into_iter()
            .filter(|e| e.entry_type == "file")
            .map(|e| {
                let size_bytes = e.lfs.as_ref().map(|l| l.size).unwrap_or(e.size);
                RemoteFile {
                    path: e.path,
                    size_bytes,
                }
            })
            .collect();

        Ok(files)
    }
}
