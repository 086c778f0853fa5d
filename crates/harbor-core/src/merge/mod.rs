//! Merge engine: combine downloaded shards into one artifact.
//!
//! Every download funnels through [`merge`] regardless of format, so the
//! orchestrator has a single call path. Numbered safetensors shard sets are
//! merged by [`safetensors::merge_safetensors`]; single-file formats (GGUF,
//! raw checkpoints, unsharded safetensors) degenerate to a rename into place.

mod safetensors;

pub use safetensors::merge_safetensors;

use crate::cancel::CancellationToken;
use crate::error::{HarborError, Result};
use crate::scan::FileFormat;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Combine `shard_paths` into a single artifact at `dest_path`.
///
/// `declared_total` is the shard count the filename pattern promised; a
/// mismatch with the files actually on disk fails with
/// [`HarborError::IncompleteShardSet`] before any output byte is written.
/// Shards must arrive in merge order (ascending shard index).
pub async fn merge(
    shard_paths: &[PathBuf],
    format: FileFormat,
    declared_total: usize,
    dest_path: &Path,
    on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<()> {
    let mut found = 0;
    for path in shard_paths {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            found += 1;
        }
    }
    if found != declared_total || shard_paths.len() != declared_total {
        return Err(HarborError::IncompleteShardSet {
            expected: declared_total,
            found,
        });
    }

    if shard_paths.len() == 1 {
        debug!(
            "Single-file artifact, moving into place: {}",
            dest_path.display()
        );
        move_into_place(&shard_paths[0], dest_path).await?;
        on_progress(1, 1);
        return Ok(());
    }

    match format {
        FileFormat::Safetensors => {
            merge_safetensors(shard_paths, dest_path, on_progress, cancel).await
        }
        // By construction these are never split in this system's scope
        FileFormat::Gguf | FileFormat::Pytorch => Err(HarborError::InvalidRequest {
            field: "format".to_string(),
            message: format!("{} artifacts cannot be merged from shards", format.as_str()),
        }),
    }
}

/// Move a file into place, falling back to copy+delete across filesystems.
pub(crate) async fn move_into_place(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| HarborError::io_with_path(e, parent))?;
    }

    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(src, dest)
                .await
                .map_err(|e| HarborError::io_with_path(e, dest))?;
            tokio::fs::remove_file(src)
                .await
                .map_err(|e| HarborError::io_with_path(e, src))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_progress() -> impl Fn(usize, usize) + Send + Sync {
        |_, _| {}
    }

    #[tokio::test]
    async fn test_incomplete_shard_set_fails_before_writing() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("m-00001-of-00003.safetensors");
        let missing = tmp.path().join("m-00002-of-00003.safetensors");
        let present3 = tmp.path().join("m-00003-of-00003.safetensors");
        std::fs::write(&present, b"x").unwrap();
        std::fs::write(&present3, b"x").unwrap();

        let dest = tmp.path().join("merged.safetensors");
        let err = merge(
            &[present, missing, present3],
            FileFormat::Safetensors,
            3,
            &dest,
            &no_progress(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            HarborError::IncompleteShardSet {
                expected: 3,
                found: 2
            }
        ));
        assert!(!dest.exists());
        assert!(!tmp.path().join("merged.safetensors.part").exists());
    }

    #[tokio::test]
    async fn test_fewer_paths_than_declared_fails() {
        let tmp = TempDir::new().unwrap();
        let only = tmp.path().join("m-00001-of-00002.safetensors");
        std::fs::write(&only, b"x").unwrap();

        let dest = tmp.path().join("merged.safetensors");
        let err = merge(
            &[only],
            FileFormat::Safetensors,
            2,
            &dest,
            &no_progress(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarborError::IncompleteShardSet { .. }));
    }

    #[tokio::test]
    async fn test_single_gguf_moves_into_place() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("model.Q4_K_M.gguf");
        std::fs::write(&src, b"GGUF-bytes").unwrap();

        let dest = tmp.path().join("out").join("model-q4_k_m.gguf");
        merge(
            &[src.clone()],
            FileFormat::Gguf,
            1,
            &dest,
            &no_progress(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"GGUF-bytes");
    }

    #[tokio::test]
    async fn test_single_file_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("model.pt");
        std::fs::write(&src, b"ckpt").unwrap();

        let ticks = std::sync::Mutex::new(Vec::new());
        let dest = tmp.path().join("model-out.pt");
        merge(
            &[src],
            FileFormat::Pytorch,
            1,
            &dest,
            &|done, total| ticks.lock().unwrap().push((done, total)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(*ticks.lock().unwrap(), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn test_multi_shard_gguf_rejected() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.gguf");
        let b = tmp.path().join("b.gguf");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"y").unwrap();

        let err = merge(
            &[a, b],
            FileFormat::Gguf,
            2,
            &tmp.path().join("out.gguf"),
            &no_progress(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarborError::InvalidRequest { .. }));
    }
}
