//! Core crate for serving a pool of diffusion pipelines.
//!
//! An [`EngineManager`] builds one [`PipelineWrapper`] per enabled engine and keeps at most
//! one of them resident on the accelerator. Loading the actual models is left to
//! [`Loader`] implementations registered per [`PipelineClass`].
//!
//! ```rust,no_run
//! use diffusion_pool_core::{
//!     EngineManager, GenerationInputs, GenerationParams, LoaderRegistry, ManagerConfig,
//!     ProgressSnapshot, SamplerKind, StopSignal,
//! };
//! # fn loaders() -> LoaderRegistry { LoaderRegistry::new() }
//!
//! let config = ManagerConfig::from_json_file("engines.json")?;
//! let mut manager = EngineManager::from_config(config, loaders());
//! manager.load_pipelines()?;
//!
//! let stop = StopSignal::new();
//! let images = manager.get_pipe("stable-diffusion-v1-5")?.generate(
//!     &GenerationInputs::new("A lighthouse at dusk."),
//!     &GenerationParams {
//!         sampler: Some(SamplerKind::SAMPLER_K_EULER_ANCESTRAL),
//!         seed: 42,
//!         steps: 30,
//!         ..Default::default()
//!     },
//!     Some(Box::new(|progress: &ProgressSnapshot| println!("{}/{}", progress.n, progress.total))),
//!     Some(stop.clone()),
//! )?;
//! println!("{:?}", images.shape());
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod config;
mod error;
mod manager;
mod mode;
mod pipelines;
mod util;

pub use config::{EngineConfig, ManagerConfig, NsfwBehaviour};
pub use diffusion_pool_common::{
    FileLoader, ProgressCallback, ProgressReporter, ProgressSnapshot, StopSignal, TokenSource,
    WeightSource,
};
pub use error::{EngineError, Result};
pub use manager::EngineManager;
pub use mode::{DeviceKind, DeviceProbe, EngineMode, RuntimeProbe};
pub use pipelines::{
    denoise, prepare_scheduler, Autocast, BetaSchedule, DdimScheduler, DiffusionPipeline,
    EulerAncestralDiscreteScheduler, EulerDiscreteScheduler, GenerationInputs, GenerationParams,
    LmsDiscreteScheduler, LoadOptions, Loader, LoaderRegistry, PipelineClass, PipelineRequest,
    PipelineWrapper, Residency, SamplerKind, Scheduler, SchedulerConfig, SchedulerRun,
    SchedulerSet, SchedulerType,
};
pub use util::Generator;
