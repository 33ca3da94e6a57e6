use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{mode::EngineMode, Result};

/// One declared engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    pub id: String,
    /// Pipeline class tag, for example `StableDiffusionPipeline`.
    pub class: String,
    /// Hugging Face model ID, used when `local_model` does not resolve to a directory.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_model: Option<String>,
    /// Loading requires `Some(true)`; status reporting only skips `Some(false)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub use_auth_token: bool,
}

impl EngineConfig {
    pub fn new<S: ToString>(id: S, class: S, model: S) -> Self {
        Self {
            id: id.to_string(),
            class: class.to_string(),
            model: model.to_string(),
            local_model: None,
            enabled: Some(true),
            default: false,
            use_auth_token: false,
        }
    }

    pub fn with_local_model<S: ToString>(mut self, local_model: S) -> Self {
        self.local_model = Some(local_model.to_string());
        self
    }

    pub fn with_enabled(mut self, enabled: Option<bool>) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn with_auth_token(mut self) -> Self {
        self.use_auth_token = true;
        self
    }

    /// Whether the engine should be built.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    /// Whether the engine was switched off explicitly.
    pub fn is_disabled(&self) -> bool {
        self.enabled == Some(false)
    }
}

/// What to do with images the safety checker considers unsafe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
pub enum NsfwBehaviour {
    /// Handled downstream by replacing the image.
    #[default]
    #[serde(rename = "block")]
    Block,
    /// Attach a safety checker which only flags the image.
    #[serde(rename = "flag")]
    Flag,
    #[serde(rename = "ignore")]
    Ignore,
}

impl Display for NsfwBehaviour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Flag => write!(f, "flag"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

fn default_weight_root() -> PathBuf {
    PathBuf::from("./weights")
}

fn default_true() -> bool {
    true
}

/// Manager settings, usually read from a JSON file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManagerConfig {
    #[serde(default = "default_weight_root")]
    pub weight_root: PathBuf,
    #[serde(default)]
    pub nsfw_behaviour: NsfwBehaviour,
    #[serde(default)]
    pub vram_optimisation_level: u8,
    #[serde(default = "default_true")]
    pub enable_cuda: bool,
    #[serde(default)]
    pub enable_mps: bool,
    /// Which accelerator to use when several are installed.
    #[serde(default)]
    pub device_ordinal: usize,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            weight_root: default_weight_root(),
            nsfw_behaviour: NsfwBehaviour::default(),
            vram_optimisation_level: 0,
            enable_cuda: true,
            enable_mps: false,
            device_ordinal: 0,
            engines: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn mode(&self) -> EngineMode {
        EngineMode::new(
            self.vram_optimisation_level,
            self.enable_cuda,
            self.enable_mps,
        )
        .with_ordinal(self.device_ordinal)
    }
}
