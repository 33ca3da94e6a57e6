mod params;
mod sampling;
pub(crate) mod scheduler;
mod wrapper;

use std::{collections::HashMap, fmt::Display, str::FromStr, sync::Arc};

use candle_core::{DType, Device, Result, Tensor};
use diffusion_pool_common::{ProgressReporter, TokenSource, WeightSource};
use serde::{Deserialize, Serialize};

use crate::{mode::DeviceKind, util::Generator, EngineError};

pub use params::{GenerationParams, SamplerKind};
pub use sampling::denoise;
pub use scheduler::{
    prepare_scheduler, BetaSchedule, DdimScheduler, EulerAncestralDiscreteScheduler,
    EulerDiscreteScheduler, LmsDiscreteScheduler, Scheduler, SchedulerConfig, SchedulerRun,
    SchedulerType,
};
pub use wrapper::{GenerationInputs, PipelineWrapper, Residency, SchedulerSet};

/// Mixed precision setting for one generation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Autocast {
    Disabled,
    /// Run eligible ops in this dtype.
    Enabled(DType),
}

impl Autocast {
    /// Autocast to f16 on cuda, nothing elsewhere.
    pub fn for_device(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Cuda => Self::Enabled(DType::F16),
            DeviceKind::Mps | DeviceKind::Cpu => Self::Disabled,
        }
    }
}

/// Everything a pipeline needs for one call to [`DiffusionPipeline::generate`].
pub struct PipelineRequest<'a> {
    pub prompt: &'a str,
    pub negative_prompt: Option<&'a str>,
    pub init_image: Option<&'a Tensor>,
    pub mask_image: Option<&'a Tensor>,
    pub outmask_image: Option<&'a Tensor>,
    pub strength: f64,
    pub width: usize,
    pub height: usize,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub eta: f64,
    /// `None` for a non-deterministic run.
    pub generator: Option<Generator>,
    pub autocast: Autocast,
}

/// A loaded diffusion pipeline: the model components plus their own denoising loop.
///
/// The scheduler and progress reporter are passed into every call rather than stored.
pub trait DiffusionPipeline: Send {
    /// The device the pipeline reports itself as running on.
    fn device(&self) -> Device;

    fn to_device(&mut self, device: &Device) -> Result<()>;

    fn to_dtype(&mut self, dtype: DType) -> Result<()>;

    /// Move only the denoising network.
    fn unet_to_device(&mut self, device: &Device) -> Result<()>;

    /// Cast only the denoising network.
    fn unet_to_dtype(&mut self, dtype: DType) -> Result<()>;

    /// Compute attention in `slice_size` chunks to lower peak memory.
    fn enable_attention_slicing(&mut self, slice_size: usize) -> Result<()>;

    /// The scheduler the pipeline was loaded with.
    fn scheduler(&self) -> Arc<dyn Scheduler>;

    /// Release memory cached on `device` after the pipeline has left it.
    ///
    /// The default only synchronizes `device` and frees nothing. Backends whose allocator
    /// keeps a cache (cuda) must override this for deactivation to return memory.
    fn empty_cache(&mut self, device: &Device) -> Result<()> {
        device.synchronize()
    }

    /// Run the denoising loop and return the raw image batch. The loop must iterate its
    /// steps through `progress` so that callbacks and cancellation work.
    fn generate(
        &mut self,
        request: PipelineRequest<'_>,
        scheduler: &Arc<dyn Scheduler>,
        progress: &mut ProgressReporter,
    ) -> Result<Tensor>;
}

/// The pipeline implementations an engine can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineClass {
    /// Text to image.
    #[serde(rename = "StableDiffusionPipeline")]
    StableDiffusion,
    /// Text, image and mask conditioned generation.
    #[serde(rename = "UnifiedPipeline")]
    Unified,
}

impl FromStr for PipelineClass {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "StableDiffusionPipeline" => Ok(Self::StableDiffusion),
            "UnifiedPipeline" => Ok(Self::Unified),
            other => Err(EngineError::UnknownEngineClass(other.to_string())),
        }
    }
}

impl Display for PipelineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StableDiffusion => write!(f, "StableDiffusionPipeline"),
            Self::Unified => write!(f, "UnifiedPipeline"),
        }
    }
}

/// Options a [`Loader`] receives from the engine manager.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Attach a safety checker which flags, rather than blanks, unsafe images. It is loaded
    /// from the `safety_checker` subfolder of the weights.
    pub flag_only_safety_checker: bool,
}

pub trait Loader: Send + Sync {
    fn name(&self) -> &'static str;

    fn load(
        &self,
        source: &WeightSource,
        token: &TokenSource,
        options: &LoadOptions,
    ) -> anyhow::Result<Box<dyn DiffusionPipeline>>;
}

/// Constructors for each [`PipelineClass`].
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: HashMap<PipelineClass, Arc<dyn Loader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader<L: Loader + 'static>(mut self, class: PipelineClass, loader: L) -> Self {
        self.register(class, Arc::new(loader));
        self
    }

    pub fn register(&mut self, class: PipelineClass, loader: Arc<dyn Loader>) {
        self.loaders.insert(class, loader);
    }

    pub fn get(&self, class: PipelineClass) -> crate::Result<&Arc<dyn Loader>> {
        self.loaders
            .get(&class)
            .ok_or(EngineError::MissingLoader(class))
    }
}
