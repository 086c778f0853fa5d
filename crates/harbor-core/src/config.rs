//! Centralized configuration constants for Harbor.

use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Total timeout for metadata/API requests.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Connect timeout for the download client. Downloads themselves have no
    /// total timeout; a multi-gigabyte transfer routinely outlives any
    /// reasonable one.
    pub const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "harbor-core/0.2";
    /// Suffix for in-progress files, renamed away on completion.
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const HUB_API_BASE: &'static str = "https://huggingface.co/api";
    pub const HUB_BASE: &'static str = "https://huggingface.co";
    /// Environment variable read once at client construction for gated repos.
    pub const TOKEN_ENV_VAR: &'static str = "HF_TOKEN";
}

/// Merge-engine configuration.
pub struct MergeConfig;

impl MergeConfig {
    /// Chunk size for streaming payload copies.
    pub const COPY_CHUNK_SIZE: usize = 8 * 1024 * 1024;
    /// Sanity cap on a container's JSON header size.
    pub const MAX_HEADER_BYTES: u64 = 100_000_000;
}

/// Shared directory and path configuration.
pub struct PathsConfig;

impl PathsConfig {
    /// Per-task staging directories live under `{models_root}/{STAGING_DIR_NAME}/{task_id}`.
    pub const STAGING_DIR_NAME: &'static str = ".harbor-staging";
    /// File extensions recognized as model artifacts.
    pub const MODEL_EXTENSIONS: &'static [&'static str] = &["safetensors", "gguf", "pt", "pth"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
        assert!(NetworkConfig::DOWNLOAD_CONNECT_TIMEOUT > Duration::ZERO);
    }

    #[test]
    fn test_model_extensions_cover_known_formats() {
        for ext in ["safetensors", "gguf", "pt", "pth"] {
            assert!(PathsConfig::MODEL_EXTENSIONS.contains(&ext));
        }
    }
}
