//! Listing and deletion of downloaded artifacts.
//!
//! A thin filesystem surface over the resolved destination directories:
//! list what is there, delete what the operator asks to delete. Deletion is
//! fenced to the models root so a stray path cannot reach outside it.

use crate::config::PathsConfig;
use crate::dest::ModelKind;
use crate::error::{HarborError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::info;

/// Metadata for one downloaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub name: String,
    pub size_bytes: u64,
    /// Seconds since the Unix epoch
    pub modified: u64,
    pub path: PathBuf,
}

/// List artifacts of one kind, newest first.
///
/// A destination directory that does not exist yet yields an empty list.
pub async fn list_artifacts(models_root: &Path, kind: ModelKind) -> Result<Vec<ArtifactInfo>> {
    let dir = kind.resolve(models_root);
    if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| HarborError::io_with_path(e, &dir))?;

    let mut artifacts = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| HarborError::io_with_path(e, &dir))?
    {
        let path = entry.path();
        if !is_artifact(&path) {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        artifacts.push(ArtifactInfo {
            name: entry.file_name().to_string_lossy().to_string(),
            size_bytes: meta.len(),
            modified,
            path,
        });
    }

    artifacts.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(artifacts)
}

/// Delete one artifact by path.
///
/// The path must resolve inside the models root; anything else is rejected
/// as an invalid request rather than followed.
pub async fn delete_artifact(models_root: &Path, path: &Path) -> Result<()> {
    let root = tokio::fs::canonicalize(models_root)
        .await
        .map_err(|e| HarborError::io_with_path(e, models_root))?;
    let target = tokio::fs::canonicalize(path)
        .await
        .map_err(|_| HarborError::FileNotFound(path.to_path_buf()))?;

    if !target.starts_with(&root) {
        return Err(HarborError::InvalidRequest {
            field: "path".to_string(),
            message: "path is outside the models directory".to_string(),
        });
    }

    tokio::fs::remove_file(&target)
        .await
        .map_err(|e| HarborError::io_with_path(e, &target))?;
    info!("Deleted artifact: {}", target.display());
    Ok(())
}

fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            PathsConfig::MODEL_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let artifacts = list_artifacts(tmp.path(), ModelKind::Lora).await.unwrap();
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_to_model_files() {
        let tmp = TempDir::new().unwrap();
        let dir = ModelKind::Checkpoint.resolve(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.safetensors"), b"abcd").unwrap();
        std::fs::write(dir.join("model.gguf"), b"ab").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let artifacts = list_artifacts(tmp.path(), ModelKind::Checkpoint)
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 2);
        assert!(artifacts.iter().all(|a| a.name != "notes.txt"));
        let safetensors = artifacts
            .iter()
            .find(|a| a.name == "model.safetensors")
            .unwrap();
        assert_eq!(safetensors.size_bytes, 4);
    }

    #[tokio::test]
    async fn test_delete_artifact() {
        let tmp = TempDir::new().unwrap();
        let dir = ModelKind::Vae.resolve(tmp.path());
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("old.safetensors");
        std::fs::write(&file, b"x").unwrap();

        delete_artifact(tmp.path(), &file).await.unwrap();
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_delete_outside_root_rejected() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let file = outside.path().join("victim.safetensors");
        std::fs::write(&file, b"x").unwrap();

        let err = delete_artifact(tmp.path(), &file).await.unwrap_err();
        assert!(matches!(err, HarborError::InvalidRequest { .. }));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = delete_artifact(tmp.path(), &tmp.path().join("ghost.gguf"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarborError::FileNotFound(_)));
    }
}
