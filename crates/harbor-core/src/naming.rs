//! Filesystem-safe name normalization for output artifacts.
//!
//! Suggested and requested output names must be usable as filenames across
//! platforms; this module strips reserved characters and collapses the rest.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length for normalized names.
const MAX_NAME_LENGTH: usize = 128;

/// Characters reserved on NTFS that must be removed.
const NTFS_RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Reserved names on Windows NTFS.
const NTFS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Regex for consecutive underscores/hyphens.
static CONSECUTIVE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_]{2,}").unwrap());

/// Regex for characters outside the allowed set (alphanumeric, `.`, `-`, `_`).
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9.\-_]").unwrap());

/// Normalize a name for use as a filesystem-safe file name.
///
/// # Rules Applied
/// 1. Replace spaces with underscores
/// 2. Remove NTFS-reserved characters
/// 3. Replace remaining disallowed characters with underscore
/// 4. Collapse consecutive separators
/// 5. Trim leading/trailing separators and dots
/// 6. Truncate to [`MAX_NAME_LENGTH`]
/// 7. Suffix NTFS reserved names
/// 8. Ensure a non-empty result
///
/// Dots are preserved so precision suffixes like `model.fp16` survive.
pub fn normalize_name(name: &str) -> String {
    let mut result = name.trim().replace(' ', "_");

    for &c in NTFS_RESERVED_CHARS {
        result = result.replace(c, "");
    }

    result = DISALLOWED.replace_all(&result, "_").to_string();
    result = CONSECUTIVE_SEPARATORS.replace_all(&result, "_").to_string();
    result = result
        .trim_matches(|c| c == '-' || c == '_' || c == '.')
        .to_string();

    if result.len() > MAX_NAME_LENGTH {
        result.truncate(MAX_NAME_LENGTH);
        result = result
            .trim_matches(|c| c == '-' || c == '_' || c == '.')
            .to_string();
    }

    let upper = result.to_uppercase();
    if NTFS_RESERVED_NAMES.contains(&upper.as_str()) {
        result = format!("{}_model", result);
    }

    if result.is_empty() {
        result = "model".to_string();
    }

    result
}

/// Check whether a requested output name is already filesystem-safe.
///
/// Used to validate user-supplied names at the task boundary: a name that
/// normalization would change is rejected rather than silently rewritten.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && normalize_name(name) == name
}

/// Append `extension` (without the dot) unless the name already ends with it.
pub fn ensure_extension(name: &str, extension: &str) -> String {
    let suffix = format!(".{}", extension);
    if name.to_lowercase().ends_with(&suffix.to_lowercase()) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}
