//! Streaming bulk fetch with byte progress and cancellation.
//!
//! Files download sequentially into `.part` temp files that are renamed into
//! place on completion, so a partially transferred file is never mistaken for
//! a finished one. Cancellation is checked on every chunk, making an abort
//! actionable mid-transfer.

use super::{HubClient, ProgressFn, ShardFetcher};
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{HarborError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// One file to fetch, with its size from the listing when known.
#[derive(Debug, Clone)]
pub struct FetchFile {
    /// Repository-relative path
    pub path: String,
    /// Size from listing metadata; unknown sizes are filled in from the
    /// response once the transfer begins
    pub size_bytes: Option<u64>,
}

impl FetchFile {
    /// Local filename: the last path component.
    pub fn local_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[async_trait]
impl ShardFetcher for HubClient {
    async fn fetch(
        &self,
        repo_id: &str,
        files: &[FetchFile],
        dest_dir: &Path,
        progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| HarborError::io_with_path(e, dest_dir))?;

        // Total from listing metadata; files with unknown sizes grow it once
        // their Content-Length is observed.
        let mut total_bytes: u64 = files.iter().filter_map(|f| f.size_bytes).sum();
        let mut bytes_offset: u64 = 0;
        let mut local_paths = Vec::with_capacity(files.len());
        let auth_header = self.auth_header_value();

        for (idx, file) in files.iter().enumerate() {
            cancel.checkpoint()?;

            let dest_path = dest_dir.join(file.local_name());
            let part_path = dest_dir.join(format!(
                "{}{}",
                file.local_name(),
                NetworkConfig::DOWNLOAD_TEMP_SUFFIX
            ));
            let url = format!(
                "{}/{}/resolve/main/{}",
                NetworkConfig::HUB_BASE,
                repo_id,
                file.path
            );

            debug!("Fetching {}/{} ({}/{})", repo_id, file.path, idx + 1, files.len());

            let downloaded = download_one(
                &self.download_client,
                &url,
                &part_path,
                file.size_bytes,
                bytes_offset,
                &mut total_bytes,
                &progress,
                cancel,
                auth_header.as_deref(),
            )
            .await;

            let downloaded = match downloaded {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(e);
                }
            };

            tokio::fs::rename(&part_path, &dest_path)
                .await
                .map_err(|e| HarborError::FetchFailed {
                    url,
                    message: format!("Failed to rename temp file: {}", e),
                })?;

            bytes_offset += downloaded;
            local_paths.push(dest_path);
        }

        info!(
            "Fetched {} file(s) from {} ({} bytes)",
            files.len(),
            repo_id,
            bytes_offset
        );

        Ok(local_paths)
    }
}

/// Download a single file to `part_path`, returning the bytes written.
#[allow(clippy::too_many_arguments)]
async fn download_one(
    client: &reqwest::Client,
    url: &str,
    part_path: &Path,
    size_expected: Option<u64>,
    bytes_offset: u64,
    total_bytes: &mut u64,
    progress: &ProgressFn,
    cancel: &CancellationToken,
    auth_header: Option<&str>,
) -> Result<u64> {
    let mut request = client.get(url);
    if let Some(auth) = auth_header {
        request = request.header("Authorization", auth);
    }

    let response = request.send().await.map_err(|e| HarborError::Network {
        message: format!("Download request failed: {}", e),
        cause: Some(e.to_string()),
    })?;

    if !response.status().is_success() {
        return Err(HarborError::FetchFailed {
            url: url.to_string(),
            message: format!("HTTP {}", response.status()),
        });
    }

    let file_total = response.content_length().or(size_expected);
    if size_expected.is_none() {
        if let Some(observed) = response.content_length() {
            *total_bytes += observed;
        }
    }

    let mut file = tokio::fs::File::create(part_path)
        .await
        .map_err(|e| HarborError::io_with_path(e, part_path))?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            file.flush().await.ok();
            drop(file);
            return Err(HarborError::Cancelled);
        }

        let chunk = chunk.map_err(|e| HarborError::Network {
            message: format!("Download stream error: {}", e),
            cause: Some(e.to_string()),
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| HarborError::io_with_path(e, part_path))?;
        downloaded += chunk.len() as u64;

        progress(bytes_offset + downloaded, *total_bytes);
    }

    file.flush()
        .await
        .map_err(|e| HarborError::io_with_path(e, part_path))?;
    drop(file);

    // A short read means the transfer was cut off without a stream error
    if let Some(total) = file_total {
        if downloaded != total {
            return Err(HarborError::FetchFailed {
                url: url.to_string(),
                message: format!("Incomplete transfer: got {} of {} bytes", downloaded, total),
            });
        }
    }

    Ok(downloaded)
}
