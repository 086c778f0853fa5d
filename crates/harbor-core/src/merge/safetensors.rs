//! Streaming merge of sharded safetensors containers.
//!
//! A safetensors file is an 8-byte little-endian header length, a JSON header
//! mapping tensor name to `{dtype, shape, data_offsets}` (offsets relative to
//! the start of the data section), then the concatenated tensor payloads.
//!
//! The merge runs in two passes:
//!
//! 1. **Header prepass** - read only each shard's header, reject tensor-name
//!    collisions, and compute the union header with recomputed offsets.
//!    Nothing is written until this pass succeeds, so a bad shard set never
//!    leaves a partial artifact behind.
//! 2. **Payload pass** - stream each shard's tensor bytes into the output in
//!    fixed-size chunks. At no point is a whole shard resident in memory.
//!
//! Cancellation is checked between shards only: an in-progress shard write
//! always completes or the temp output is discarded whole.

use crate::cancel::CancellationToken;
use crate::config::{MergeConfig, NetworkConfig};
use crate::error::{HarborError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// One tensor's header entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TensorEntry {
    dtype: String,
    shape: Vec<u64>,
    data_offsets: [u64; 2],
}

/// A tensor scheduled for the payload pass.
#[derive(Debug)]
struct PlannedTensor {
    name: String,
    entry: TensorEntry,
    /// Byte range within the source shard's data section
    source_offsets: [u64; 2],
}

/// One shard's parsed header.
#[derive(Debug)]
struct ShardHeader {
    path: PathBuf,
    /// Offset of the data section (8 + header length)
    data_start: u64,
    /// Tensors ordered by their source begin offset, so the payload pass
    /// reads each shard sequentially
    tensors: Vec<PlannedTensor>,
    metadata: Option<Map<String, Value>>,
}

/// Merge safetensors shards into a single container at `dest_path`.
///
/// `shard_paths` must already be in merge order (ascending shard index).
/// Progress is reported after each shard's payload is consumed. Output is
/// written to a temp file and renamed into place on success; any failure or
/// cancellation removes the temp file.
pub async fn merge_safetensors(
    shard_paths: &[PathBuf],
    dest_path: &Path,
    on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<()> {
    let headers = read_shard_headers(shard_paths).await?;
    let (header_bytes, _total_payload) = build_output_header(&headers)?;

    let part_path = PathBuf::from(format!(
        "{}{}",
        dest_path.display(),
        NetworkConfig::DOWNLOAD_TEMP_SUFFIX
    ));

    let result = write_output(&headers, &header_bytes, &part_path, on_progress, cancel).await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&part_path).await;
        return Err(e);
    }

    tokio::fs::rename(&part_path, dest_path)
        .await
        .map_err(|e| HarborError::io_with_path(e, dest_path))?;

    info!(
        "Merged {} shard(s) into {}",
        shard_paths.len(),
        dest_path.display()
    );
    Ok(())
}

/// Header prepass: parse every shard header and reject name collisions.
async fn read_shard_headers(shard_paths: &[PathBuf]) -> Result<Vec<ShardHeader>> {
    let mut headers = Vec::with_capacity(shard_paths.len());
    let mut seen: HashSet<String> = HashSet::new();

    for path in shard_paths {
        let header = read_one_header(path).await?;
        for tensor in &header.tensors {
            if !seen.insert(tensor.name.clone()) {
                return Err(HarborError::TensorNameCollision {
                    tensor: tensor.name.clone(),
                });
            }
        }
        headers.push(header);
    }

    Ok(headers)
}

async fn read_one_header(path: &Path) -> Result<ShardHeader> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| HarborError::io_with_path(e, path))?;

    let mut len_buf = [0u8; 8];
    file.read_exact(&mut len_buf)
        .await
        .map_err(|e| HarborError::io_with_path(e, path))?;
    let header_len = u64::from_le_bytes(len_buf);

    if header_len == 0 || header_len > MergeConfig::MAX_HEADER_BYTES {
        return Err(HarborError::InvalidContainer {
            path: path.to_path_buf(),
            message: format!("implausible header length {}", header_len),
        });
    }

    let mut header_buf = vec![0u8; header_len as usize];
    file.read_exact(&mut header_buf)
        .await
        .map_err(|e| HarborError::io_with_path(e, path))?;

    let raw: Map<String, Value> =
        serde_json::from_slice(&header_buf).map_err(|e| HarborError::InvalidContainer {
            path: path.to_path_buf(),
            message: format!("header is not valid JSON: {}", e),
        })?;

    let mut metadata = None;
    let mut tensors = Vec::new();

    for (name, value) in raw {
        if name == "__metadata__" {
            metadata = value.as_object().cloned();
            continue;
        }
        let entry: TensorEntry =
            serde_json::from_value(value).map_err(|e| HarborError::InvalidContainer {
                path: path.to_path_buf(),
                message: format!("bad entry for tensor '{}': {}", name, e),
            })?;
        let [begin, end] = entry.data_offsets;
        if begin > end {
            return Err(HarborError::InvalidContainer {
                path: path.to_path_buf(),
                message: format!("tensor '{}' has inverted offsets", name),
            });
        }
        tensors.push(PlannedTensor {
            name,
            source_offsets: [begin, end],
            entry,
        });
    }

    // Payload pass reads each shard front to back
    tensors.sort_by_key(|t| t.source_offsets[0]);

    debug!(
        "Shard {}: {} tensors, header {} bytes",
        path.display(),
        tensors.len(),
        header_len
    );

    Ok(ShardHeader {
        path: path.to_path_buf(),
        data_start: 8 + header_len,
        tensors,
        metadata,
    })
}

/// Compute the union header with recomputed offsets.
///
/// Offsets are assigned in shard order, tensor order within each shard, so
/// the payload pass appends without seeking backwards in the output.
/// `__metadata__` entries are carried first-shard-wins.
fn build_output_header(headers: &[ShardHeader]) -> Result<(Vec<u8>, u64)> {
    let mut out = Map::new();

    let mut merged_metadata: Option<Map<String, Value>> = None;
    for header in headers {
        if let Some(meta) = &header.metadata {
            let target = merged_metadata.get_or_insert_with(Map::new);
            for (key, value) in meta {
                if !target.contains_key(key) {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }
    if let Some(meta) = merged_metadata {
        out.insert("__metadata__".to_string(), Value::Object(meta));
    }

    let mut cursor: u64 = 0;
    for header in headers {
        for tensor in &header.tensors {
            let len = tensor.source_offsets[1] - tensor.source_offsets[0];
            let entry = TensorEntry {
                dtype: tensor.entry.dtype.clone(),
                shape: tensor.entry.shape.clone(),
                data_offsets: [cursor, cursor + len],
            };
            out.insert(tensor.name.clone(), serde_json::to_value(entry)?);
            cursor += len;
        }
    }

    let header_bytes = serde_json::to_vec(&Value::Object(out))?;
    Ok((header_bytes, cursor))
}

/// Payload pass: write the header, then stream every shard's tensor bytes.
async fn write_output(
    headers: &[ShardHeader],
    header_bytes: &[u8],
    part_path: &Path,
    on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<()> {
    let file = tokio::fs::File::create(part_path)
        .await
        .map_err(|e| HarborError::io_with_path(e, part_path))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(&(header_bytes.len() as u64).to_le_bytes())
        .await
        .map_err(|e| HarborError::io_with_path(e, part_path))?;
    writer
        .write_all(header_bytes)
        .await
        .map_err(|e| HarborError::io_with_path(e, part_path))?;

    let total = headers.len();
    let mut buf = vec![0u8; MergeConfig::COPY_CHUNK_SIZE];

    for (idx, shard) in headers.iter().enumerate() {
        cancel.checkpoint()?;

        let mut source = tokio::fs::File::open(&shard.path)
            .await
            .map_err(|e| HarborError::io_with_path(e, &shard.path))?;

        for tensor in &shard.tensors {
            let begin = shard.data_start + tensor.source_offsets[0];
            let mut remaining = tensor.source_offsets[1] - tensor.source_offsets[0];

            source
                .seek(std::io::SeekFrom::Start(begin))
                .await
                .map_err(|e| HarborError::io_with_path(e, &shard.path))?;

            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let read = source
                    .read(&mut buf[..want])
                    .await
                    .map_err(|e| HarborError::io_with_path(e, &shard.path))?;
                if read == 0 {
                    return Err(HarborError::InvalidContainer {
                        path: shard.path.clone(),
                        message: format!(
                            "unexpected end of file while reading tensor '{}'",
                            tensor.name
                        ),
                    });
                }
                writer
                    .write_all(&buf[..read])
                    .await
                    .map_err(|e| HarborError::io_with_path(e, part_path))?;
                remaining -= read as u64;
            }
        }

        on_progress(idx + 1, total);
    }

    writer
        .flush()
        .await
        .map_err(|e| HarborError::io_with_path(e, part_path))?;
    Ok(())
}
