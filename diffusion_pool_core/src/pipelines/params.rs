use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Sampler selection, numbered as on the generation wire protocol.
///
/// Values outside the five variants below (including known protocol samplers such as
/// Heun or DPM2) are rejected with [`EngineError::UnsupportedSampler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplerKind {
    /// The scheduler the pipeline was loaded with.
    Ddpm,
    KLms,
    Ddim,
    KEuler,
    KEulerAncestral,
}

impl SamplerKind {
    pub const SAMPLER_DDIM: i32 = 0;
    pub const SAMPLER_DDPM: i32 = 1;
    pub const SAMPLER_K_EULER: i32 = 2;
    pub const SAMPLER_K_EULER_ANCESTRAL: i32 = 3;
    pub const SAMPLER_K_LMS: i32 = 7;

    pub fn from_wire(value: i32) -> Result<Self> {
        match value {
            Self::SAMPLER_DDIM => Ok(Self::Ddim),
            Self::SAMPLER_DDPM => Ok(Self::Ddpm),
            Self::SAMPLER_K_EULER => Ok(Self::KEuler),
            Self::SAMPLER_K_EULER_ANCESTRAL => Ok(Self::KEulerAncestral),
            Self::SAMPLER_K_LMS => Ok(Self::KLms),
            other => Err(EngineError::UnsupportedSampler(other)),
        }
    }

    /// An unset sampler selects the pipeline default.
    pub fn resolve(value: Option<i32>) -> Result<Self> {
        value.map_or(Ok(Self::Ddpm), Self::from_wire)
    }
}

/// Per-request generation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Raw sampler value from the request; `None` selects the pipeline default.
    pub sampler: Option<i32>,
    /// `<= 0` means a random seed.
    pub seed: i64,
    /// How much an init image is noised before denoising, in `0..=1`.
    pub strength: f64,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub cfg_scale: f64,
    pub eta: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            sampler: None,
            seed: 0,
            strength: 0.8,
            width: 512,
            height: 512,
            steps: 50,
            cfg_scale: 7.5,
            eta: 0.,
        }
    }
}
