//! Destination category resolution.
//!
//! Each download names a [`ModelKind`]; the kind maps to a fixed
//! subdirectory under the caller-supplied models root. The mapping is
//! configuration the engine consumes, not logic it owns.

use crate::error::{HarborError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Destination category for a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Checkpoint,
    Lora,
    Vae,
    UpscaleModel,
    Embedding,
    Clip,
    Controlnet,
    DiffusionModel,
    TextEncoder,
}

impl ModelKind {
    /// Canonical snake_case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Checkpoint => "checkpoint",
            ModelKind::Lora => "lora",
            ModelKind::Vae => "vae",
            ModelKind::UpscaleModel => "upscale_model",
            ModelKind::Embedding => "embedding",
            ModelKind::Clip => "clip",
            ModelKind::Controlnet => "controlnet",
            ModelKind::DiffusionModel => "diffusion_model",
            ModelKind::TextEncoder => "text_encoder",
        }
    }

    /// Subdirectory under the models root where this kind is stored.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ModelKind::Checkpoint => "checkpoints",
            ModelKind::Lora => "loras",
            ModelKind::Vae => "vae",
            ModelKind::UpscaleModel => "upscale_models",
            ModelKind::Embedding => "embeddings",
            ModelKind::Clip => "clip",
            ModelKind::Controlnet => "controlnet",
            ModelKind::DiffusionModel => "diffusion_models",
            ModelKind::TextEncoder => "text_encoders",
        }
    }

    /// Resolve the absolute destination directory under `models_root`.
    pub fn resolve(&self, models_root: &Path) -> PathBuf {
        models_root.join(self.dir_name())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = HarborError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "checkpoint" => Ok(ModelKind::Checkpoint),
            "lora" => Ok(ModelKind::Lora),
            "vae" => Ok(ModelKind::Vae),
            "upscale_model" => Ok(ModelKind::UpscaleModel),
            "embedding" => Ok(ModelKind::Embedding),
            "clip" => Ok(ModelKind::Clip),
            "controlnet" => Ok(ModelKind::Controlnet),
            "diffusion_model" => Ok(ModelKind::DiffusionModel),
            "text_encoder" => Ok(ModelKind::TextEncoder),
            other => Err(HarborError::InvalidRequest {
                field: "model_kind".to_string(),
                message: format!("unsupported model kind '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
