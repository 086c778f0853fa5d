//! Shard pattern matching for model file names.
//!
//! Large models are distributed either as numbered shard sets
//! (`model-00001-of-00003.safetensors`) that must be merged before use, or as
//! single files carrying a quantization label (`model.Q4_K_M.gguf`) where each
//! quantization is an independent download candidate.
//!
//! # Recognized Patterns
//!
//! 1. **Numbered shards**: `<stem>-<index>-of-<total>.<ext>` for safetensors
//!    and pytorch checkpoints
//! 2. **GGUF quant suffix**: `Q4_K_M`, `Q8_0`, `IQ2_XS`, `F16`, `BF16`, ...
//! 3. **Precision tokens**: `fp16`, `fp32`, `bf16` embedded in safetensors
//!    names, captured as metadata only

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Recognized model artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Key-value tensor container, mergeable when sharded
    Safetensors,
    /// Single-file quantized container, never split in this system's scope
    Gguf,
    /// Raw pytorch checkpoint (`.pt` / `.pth`), never split here either
    Pytorch,
}

impl FileFormat {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Safetensors => "safetensors",
            FileFormat::Gguf => "gguf",
            FileFormat::Pytorch => "pytorch",
        }
    }

    /// Extension appended to output artifacts of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Safetensors => "safetensors",
            FileFormat::Gguf => "gguf",
            FileFormat::Pytorch => "pt",
        }
    }

    /// Detect the format from a filename's extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = filename.rsplit('.').next()?.to_lowercase();
        match ext.as_str() {
            "safetensors" => Some(FileFormat::Safetensors),
            "gguf" => Some(FileFormat::Gguf),
            "pt" | "pth" => Some(FileFormat::Pytorch),
            _ => None,
        }
    }
}

/// One file within a shard group, with tags parsed from its name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
    /// Floating-point width token (`fp16`, `bf16`, ...) if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision_tag: Option<String>,
    /// Quantization label (`Q4_K_M`, ...) if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quant_tag: Option<String>,
}

/// Matcher output: one logical model candidate within a directory.
#[derive(Debug, Clone)]
pub struct ShardDescriptor {
    /// Stem shared by all shards (split sets) or the file stem (single files)
    pub stem: String,
    pub format: FileFormat,
    /// True for numbered shard sets, even when shards are missing
    pub is_split: bool,
    /// Declared shard total from the filename pattern; 1 for single files.
    /// May exceed `entries.len()` when the set is incomplete.
    pub declared_total: usize,
    /// Quantization variant this candidate represents (GGUF only)
    pub quant_tag: Option<String>,
    /// Files in merge order: ascending shard index, ties broken lexically
    pub entries: Vec<FileEntry>,
}

/// Numbered shard pattern: `model-00001-of-00003.safetensors`.
/// Captures: (stem, index, total, extension)
static SPLIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+?)-(\d+)-of-(\d+)\.(safetensors|pt|pth)$").unwrap());

/// GGUF quantization suffix on the file stem: `.Q4_K_M`, `-iq2_xs`, `_f16`.
static GGUF_QUANT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[._-]((?:q|iq)\d[a-z0-9_]*|(?:f|bf)\d[a-z0-9_]*)$").unwrap()
});

/// Precision token embedded anywhere in a filename: `fp16`, `bf16`, `int8`, `nf4`.
static PRECISION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[-_.]((?:fp|bf)\d+[a-z0-9_]*|int\d+|nf4)").unwrap());

/// Extract the quantization label from a GGUF filename, if present.
///
/// Returns the label uppercased (`Q4_K_M`), matching how quants are usually
/// written in repository READMEs.
pub fn extract_gguf_quant(filename: &str) -> Option<String> {
    if !filename.to_lowercase().ends_with(".gguf") {
        return None;
    }
    let stem = file_stem(filename);
    GGUF_QUANT_PATTERN
        .captures(stem)
        .map(|caps| caps[1].to_uppercase())
}

/// Split a GGUF filename into its base stem and quantization label.
pub fn split_gguf_name(filename: &str) -> (String, Option<String>) {
    let stem = file_stem(filename);
    match extract_gguf_quant(filename) {
        Some(quant) => {
            // Strip the separator and label off the stem
            let base = &stem[..stem.len() - quant.len() - 1];
            (base.to_string(), Some(quant))
        }
        None => (stem.to_string(), None),
    }
}

/// Extract a precision token (`fp16`, `bf16`, ...) from a filename.
pub fn extract_precision(filename: &str) -> Option<String> {
    PRECISION_PATTERN
        .captures(filename)
        .map(|caps| caps[1].to_lowercase())
}

fn file_stem(filename: &str) -> &str {
    filename.rfind('.').map_or(filename, |dot| &filename[..dot])
}

/// Declared shard total from a set of filenames, if any matches the
/// numbered-shard pattern.
///
/// Used at download time to detect a requested shard set that was incomplete
/// in the repository listing.
pub fn declared_shard_total(filenames: &[String]) -> Option<usize> {
    filenames
        .iter()
        .find_map(|name| SPLIT_PATTERN.captures(name))
        .and_then(|caps| caps[3].parse().ok())
}

/// Match one directory's model files into shard descriptors.
///
/// Input is the set of `(filename, size_bytes)` pairs within a single
/// directory, already filtered to recognized model extensions. Files that
/// match no known pattern and are not whole single-file models are excluded;
/// an empty result is normal, not an error.
///
/// # Example
///
/// ```
/// use harbor_core::scan::match_directory;
///
/// let files = [
///     ("model-00001-of-00002.safetensors".to_string(), 100u64),
///     ("model-00002-of-00002.safetensors".to_string(), 100u64),
/// ];
/// let descriptors = match_directory(&files);
/// assert_eq!(descriptors.len(), 1);
/// assert!(descriptors[0].is_split);
/// assert_eq!(descriptors[0].declared_total, 2);
/// ```
pub fn match_directory(files: &[(String, u64)]) -> Vec<ShardDescriptor> {
    // BTreeMap keeps group iteration deterministic across calls
    let mut split_groups: BTreeMap<(String, String), Vec<(usize, usize, FileEntry)>> =
        BTreeMap::new();
    let mut singles: Vec<ShardDescriptor> = Vec::new();

    for (name, size) in files {
        let Some(format) = FileFormat::from_filename(name) else {
            continue;
        };

        if let Some(caps) = SPLIT_PATTERN.captures(name) {
            let stem = caps[1].to_string();
            let ext = caps[4].to_lowercase();
            let index: usize = match caps[2].parse() {
                Ok(i) => i,
                Err(_) => continue,
            };
            let total: usize = match caps[3].parse() {
                Ok(t) => t,
                Err(_) => continue,
            };
            let entry = FileEntry {
                name: name.clone(),
                size_bytes: *size,
                precision_tag: extract_precision(name),
                quant_tag: None,
            };
            split_groups
                .entry((stem, ext))
                .or_default()
                .push((index, total, entry));
            continue;
        }

        match format {
            FileFormat::Gguf => {
                let (base, quant) = split_gguf_name(name);
                singles.push(ShardDescriptor {
                    stem: base,
                    format,
                    is_split: false,
                    declared_total: 1,
                    quant_tag: quant.clone(),
                    entries: vec![FileEntry {
                        name: name.clone(),
                        size_bytes: *size,
                        precision_tag: None,
                        quant_tag: quant,
                    }],
                });
            }
            FileFormat::Safetensors | FileFormat::Pytorch => {
                singles.push(ShardDescriptor {
                    stem: file_stem(name).to_string(),
                    format,
                    is_split: false,
                    declared_total: 1,
                    quant_tag: None,
                    entries: vec![FileEntry {
                        name: name.clone(),
                        size_bytes: *size,
                        precision_tag: extract_precision(name),
                        quant_tag: None,
                    }],
                });
            }
        }
    }

    let mut descriptors: Vec<ShardDescriptor> = Vec::new();

    for ((stem, ext), mut members) in split_groups {
        // Merge order: ascending shard index, ties broken by filename
        members.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.name.cmp(&b.2.name)));

        // The declared total comes from the filename pattern, not the observed
        // count, so a missing shard remains detectable downstream.
        let declared_total = members.first().map(|(_, total, _)| *total).unwrap_or(0);
        let format = if ext == "safetensors" {
            FileFormat::Safetensors
        } else {
            FileFormat::Pytorch
        };

        descriptors.push(ShardDescriptor {
            stem,
            format,
            is_split: true,
            declared_total,
            quant_tag: None,
            entries: members.into_iter().map(|(_, _, e)| e).collect(),
        });
    }

    singles.sort_by(|a, b| a.entries[0].name.cmp(&b.entries[0].name));
    descriptors.extend(singles);
    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<(String, u64)> {
        names.iter().map(|n| (n.to_string(), 1000)).collect()
    }

    #[test]
    fn test_split_set_ordered_by_index() {
        let input = files(&[
            "model-00003-of-00003.safetensors",
            "model-00001-of-00003.safetensors",
            "model-00002-of-00003.safetensors",
        ]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert!(d.is_split);
        assert_eq!(d.declared_total, 3);
        assert_eq!(d.stem, "model");
        assert_eq!(d.format, FileFormat::Safetensors);
        let names: Vec<&str> = d.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "model-00001-of-00003.safetensors",
                "model-00002-of-00003.safetensors",
                "model-00003-of-00003.safetensors",
            ]
        );
    }

    #[test]
    fn test_incomplete_split_keeps_declared_total() {
        let input = files(&[
            "model-00001-of-00003.safetensors",
            "model-00003-of-00003.safetensors",
        ]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0].is_split);
        assert_eq!(descriptors[0].declared_total, 3);
        assert_eq!(descriptors[0].entries.len(), 2);
    }

    #[test]
    fn test_single_shard_file_is_still_split() {
        // One file of a declared pair: split but incomplete, not standalone
        let input = files(&["model-00001-of-00002.safetensors"]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0].is_split);
        assert_eq!(descriptors[0].declared_total, 2);
    }

    #[test]
    fn test_gguf_quant_variants_are_independent_candidates() {
        let input = files(&["model.Q4_K_M.gguf", "model.Q8_0.gguf"]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 2);
        assert!(descriptors.iter().all(|d| !d.is_split));
        let quants: Vec<Option<&str>> = descriptors
            .iter()
            .map(|d| d.quant_tag.as_deref())
            .collect();
        assert!(quants.contains(&Some("Q4_K_M")));
        assert!(quants.contains(&Some("Q8_0")));
        assert!(descriptors.iter().all(|d| d.stem == "model"));
    }

    #[test]
    fn test_pytorch_split_set() {
        let input = files(&[
            "pytorch_model-00001-of-00002.pt",
            "pytorch_model-00002-of-00002.pt",
        ]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].format, FileFormat::Pytorch);
        assert_eq!(descriptors[0].declared_total, 2);
    }

    #[test]
    fn test_unrecognized_files_excluded() {
        let input = files(&["README.md", "config.json", "weights.onnx"]);
        assert!(match_directory(&input).is_empty());
    }

    #[test]
    fn test_single_whole_files() {
        let input = files(&["vae.safetensors", "upscaler.pt"]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 2);
        assert!(descriptors.iter().all(|d| !d.is_split));
        assert!(descriptors.iter().all(|d| d.declared_total == 1));
    }

    #[test]
    fn test_extract_gguf_quant() {
        assert_eq!(
            extract_gguf_quant("llama-2-7b.Q4_K_M.gguf"),
            Some("Q4_K_M".to_string())
        );
        assert_eq!(
            extract_gguf_quant("llama-2-7b-q8_0.gguf"),
            Some("Q8_0".to_string())
        );
        assert_eq!(
            extract_gguf_quant("model_IQ2_XS.gguf"),
            Some("IQ2_XS".to_string())
        );
        assert_eq!(extract_gguf_quant("model.f16.gguf"), Some("F16".to_string()));
        assert_eq!(extract_gguf_quant("model.gguf"), None);
        assert_eq!(extract_gguf_quant("model.Q4_K_M.safetensors"), None);
    }

    #[test]
    fn test_split_gguf_name() {
        assert_eq!(
            split_gguf_name("llama-2-7b.Q4_K_M.gguf"),
            ("llama-2-7b".to_string(), Some("Q4_K_M".to_string()))
        );
        assert_eq!(split_gguf_name("plain.gguf"), ("plain".to_string(), None));
    }

    #[test]
    fn test_extract_precision() {
        assert_eq!(
            extract_precision("flux-dev-fp16.safetensors"),
            Some("fp16".to_string())
        );
        assert_eq!(
            extract_precision("model.bf16.safetensors"),
            Some("bf16".to_string())
        );
        assert_eq!(extract_precision("model.safetensors"), None);
    }

    #[test]
    fn test_precision_tag_on_split_entries() {
        let input = files(&[
            "model-fp16-00001-of-00002.safetensors",
            "model-fp16-00002-of-00002.safetensors",
        ]);

        let descriptors = match_directory(&input);

        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0]
            .entries
            .iter()
            .all(|e| e.precision_tag.as_deref() == Some("fp16")));
    }

    #[test]
    fn test_declared_shard_total() {
        let names = vec![
            "m-00001-of-00003.safetensors".to_string(),
            "m-00002-of-00003.safetensors".to_string(),
        ];
        assert_eq!(declared_shard_total(&names), Some(3));
        assert_eq!(declared_shard_total(&["plain.gguf".to_string()]), None);
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(
            FileFormat::from_filename("a.safetensors"),
            Some(FileFormat::Safetensors)
        );
        assert_eq!(FileFormat::from_filename("a.GGUF"), Some(FileFormat::Gguf));
        assert_eq!(FileFormat::from_filename("a.pth"), Some(FileFormat::Pytorch));
        assert_eq!(FileFormat::from_filename("a.onnx"), None);
    }
}
