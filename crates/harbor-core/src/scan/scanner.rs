//! Repository scanner producing download candidates.
//!
//! Walks a flat recursive file listing, partitions it by directory, and runs
//! the shard pattern matcher per directory. The result is a normalized list
//! of [`ShardGroup`] candidates the caller picks from; a fresh listing may
//! return different results between calls, which is expected.

use crate::config::PathsConfig;
use crate::error::Result;
use crate::hub::{validate_repo_id, RemoteFile, RepoListing};
use crate::naming::normalize_name;
use crate::scan::patterns::{match_directory, FileEntry, FileFormat, ShardDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// A directory-scoped set of files believed to form one logical model.
///
/// Created fresh on every scan call and never persisted; it is a transient
/// scan result handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardGroup {
    /// Directory within the repository; empty when files sit at the root
    pub directory_path: String,
    /// Files in merge order
    pub file_entries: Vec<FileEntry>,
    /// True for numbered shard sets, even when shards are missing
    pub is_split: bool,
    /// Declared shard total for split sets (may exceed the files present
    /// when the set is incomplete); 1 for single files
    pub shard_count: usize,
    /// Sum of per-file sizes from the listing
    pub total_size_bytes: u64,
    /// Filesystem-safe name offered to the user
    pub suggested_output_name: String,
    /// Normalized directory (or repository) name, the base for quant-variant
    /// naming
    pub base_name: String,
    pub detected_file_format: FileFormat,
    /// Aggregated precision across entries: the single shared tag, or
    /// `mixed` when shards disagree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,
    /// Quantization variant for GGUF candidates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quant_tag: Option<String>,
}

/// Scans remote repositories for model candidates.
pub struct RepoScanner {
    listing: Arc<dyn RepoListing>,
}

impl RepoScanner {
    /// Create a scanner over the given listing service.
    pub fn new(listing: Arc<dyn RepoListing>) -> Self {
        Self { listing }
    }

    /// Scan a repository for model candidates.
    ///
    /// Idempotent and mutation-free. Returns groups ordered by directory and
    /// name so repeated scans of an unchanged repository produce identical
    /// output.
    pub async fn scan(&self, repo_id: &str) -> Result<Vec<ShardGroup>> {
        validate_repo_id(repo_id)?;

        info!("Scanning repository: {}", repo_id);
        let files = self.listing.list_files(repo_id).await?;

        // Partition model files by containing directory
        let mut by_directory: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
        for file in &files {
            if !is_model_file(&file.path) {
                continue;
            }
            let (directory, filename) = split_path(&file.path);
            by_directory
                .entry(directory.to_string())
                .or_default()
                .push((filename.to_string(), file.size_bytes));
        }

        let repo_name = repo_id.rsplit('/').next().unwrap_or(repo_id);
        let mut groups = Vec::new();

        for (directory, dir_files) in by_directory {
            let base_name = if directory.is_empty() {
                normalize_name(repo_name)
            } else {
                normalize_name(directory.rsplit('/').next().unwrap_or(&directory))
            };

            for descriptor in match_directory(&dir_files) {
                groups.push(build_group(&directory, &base_name, descriptor));
            }
        }

        info!("Found {} model group(s) in {}", groups.len(), repo_id);
        Ok(groups)
    }
}

/// Assemble a [`ShardGroup`] from one matcher descriptor.
fn build_group(directory: &str, base_name: &str, descriptor: ShardDescriptor) -> ShardGroup {
    let total_size_bytes = descriptor.entries.iter().map(|e| e.size_bytes).sum();
    let precision = aggregate_precision(&descriptor.entries);

    let suggested_output_name = match &descriptor.quant_tag {
        Some(quant) => format!("{}-{}", base_name, quant.to_lowercase()),
        None => base_name.to_string(),
    };

    ShardGroup {
        directory_path: directory.to_string(),
        is_split: descriptor.is_split,
        shard_count: descriptor.declared_total,
        total_size_bytes,
        suggested_output_name,
        base_name: base_name.to_string(),
        detected_file_format: descriptor.format,
        precision,
        quant_tag: descriptor.quant_tag,
        file_entries: descriptor.entries,
    }
}

/// Single shared precision tag, `mixed` on disagreement, `None` when absent.
fn aggregate_precision(entries: &[FileEntry]) -> Option<String> {
    let mut tags: Vec<&str> = entries
        .iter()
        .filter_map(|e| e.precision_tag.as_deref())
        .collect();
    tags.sort_unstable();
    tags.dedup();
    match tags.len() {
        0 => None,
        1 => Some(tags[0].to_string()),
        _ => Some("mixed".to_string()),
    }
}

fn is_model_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit('.')
        .next()
        .map(|ext| {
            PathsConfig::MODEL_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Split a repo-relative path into `(directory, filename)`.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarborError;
    use async_trait::async_trait;

    /// Listing backed by a fixed file table.
    struct FixedListing {
        files: Vec<RemoteFile>,
    }

    impl FixedListing {
        fn new(files: &[(&str, u64)]) -> Arc<Self> {
            Arc::new(Self {
                files: files
                    .iter()
                    .map(|(path, size)| RemoteFile {
                        path: path.to_string(),
                        size_bytes: *size,
                    })
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl RepoListing for FixedListing {
        async fn list_files(&self, _repo_id: &str) -> Result<Vec<RemoteFile>> {
            Ok(self.files.clone())
        }
    }

    #[tokio::test]
    async fn test_scan_split_group() {
        let listing = FixedListing::new(&[
            ("model/shard-00001-of-00002.safetensors", 100),
            ("model/shard-00002-of-00002.safetensors", 150),
            ("README.md", 5),
        ]);
        let scanner = RepoScanner::new(listing);

        let groups = scanner.scan("acme/t2i-xl").await.unwrap();

        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert!(g.is_split);
        assert_eq!(g.shard_count, 2);
        assert_eq!(g.directory_path, "model");
        assert_eq!(g.total_size_bytes, 250);
        assert_eq!(g.suggested_output_name, "model");
        assert_eq!(g.detected_file_format, FileFormat::Safetensors);
        assert_eq!(g.file_entries.len(), 2);
        assert_eq!(g.file_entries[0].name, "shard-00001-of-00002.safetensors");
    }

    #[tokio::test]
    async fn test_scan_root_files_use_repo_name() {
        let listing = FixedListing::new(&[("whole.safetensors", 42)]);
        let scanner = RepoScanner::new(listing);

        let groups = scanner.scan("acme/My Model").await.unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].directory_path, "");
        assert_eq!(groups[0].suggested_output_name, "My_Model");
        assert!(!groups[0].is_split);
        assert_eq!(groups[0].shard_count, 1);
    }

    #[tokio::test]
    async fn test_scan_gguf_variants_get_distinct_names() {
        let listing = FixedListing::new(&[
            ("model.Q4_K_M.gguf", 400),
            ("model.Q8_0.gguf", 800),
        ]);
        let scanner = RepoScanner::new(listing);

        let groups = scanner.scan("acme/llm-7b").await.unwrap();

        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| !g.is_split));
        let names: Vec<&str> = groups
            .iter()
            .map(|g| g.suggested_output_name.as_str())
            .collect();
        assert!(names.contains(&"llm-7b-q4_k_m"));
        assert!(names.contains(&"llm-7b-q8_0"));
        let quants: Vec<Option<&str>> = groups.iter().map(|g| g.quant_tag.as_deref()).collect();
        assert!(quants.contains(&Some("Q4_K_M")));
        assert!(quants.contains(&Some("Q8_0")));
    }

    #[tokio::test]
    async fn test_scan_incomplete_split_reports_declared_total() {
        let listing = FixedListing::new(&[
            ("m-00001-of-00003.safetensors", 10),
            ("m-00003-of-00003.safetensors", 10),
        ]);
        let scanner = RepoScanner::new(listing);

        let groups = scanner.scan("acme/partial").await.unwrap();

        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_split);
        assert_eq!(groups[0].shard_count, 3);
        assert_eq!(groups[0].file_entries.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_precision_aggregation() {
        let listing = FixedListing::new(&[
            ("unet/part-fp16-00001-of-00002.safetensors", 10),
            ("unet/part-fp16-00002-of-00002.safetensors", 10),
            ("text_encoder/enc.bf16.safetensors", 10),
        ]);
        let scanner = RepoScanner::new(listing);

        let groups = scanner.scan("acme/pipeline").await.unwrap();

        assert_eq!(groups.len(), 2);
        let unet = groups.iter().find(|g| g.directory_path == "unet").unwrap();
        assert_eq!(unet.precision.as_deref(), Some("fp16"));
        let enc = groups
            .iter()
            .find(|g| g.directory_path == "text_encoder")
            .unwrap();
        assert_eq!(enc.precision.as_deref(), Some("bf16"));
    }

    #[tokio::test]
    async fn test_scan_non_model_files_excluded() {
        let listing = FixedListing::new(&[
            ("config.json", 1),
            ("tokenizer.model", 1),
            (".gitattributes", 1),
        ]);
        let scanner = RepoScanner::new(listing);

        let groups = scanner.scan("acme/empty").await.unwrap();
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn test_scan_rejects_malformed_repo_id() {
        let listing = FixedListing::new(&[]);
        let scanner = RepoScanner::new(listing);

        for bad in ["", "no-slash", "owner/", "/name"] {
            let err = scanner.scan(bad).await.unwrap_err();
            assert!(
                matches!(err, HarborError::InvalidRequest { .. }),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c.gguf"), ("a/b", "c.gguf"));
        assert_eq!(split_path("c.gguf"), ("", "c.gguf"));
    }
}
