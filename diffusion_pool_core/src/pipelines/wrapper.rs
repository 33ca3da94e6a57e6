use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use diffusion_pool_common::{ProgressCallback, ProgressReporter, StopSignal};
use tracing::{debug, info};

use super::{
    prepare_scheduler, Autocast, DiffusionPipeline, GenerationParams, PipelineRequest,
    SamplerKind, Scheduler, SchedulerConfig, SchedulerType,
};
use crate::{
    mode::EngineMode,
    util::Generator,
    Result,
};

/// The schedulers a wrapper can switch between per request.
///
/// Built once per wrapper; requests select one of these instances, they never build new
/// ones.
#[derive(Clone)]
pub struct SchedulerSet {
    default: Arc<dyn Scheduler>,
    klms: Arc<dyn Scheduler>,
    ddim: Arc<dyn Scheduler>,
    euler: Arc<dyn Scheduler>,
    euler_ancestral: Arc<dyn Scheduler>,
}

impl SchedulerSet {
    pub fn new(default: Arc<dyn Scheduler>) -> candle_core::Result<Self> {
        Ok(Self {
            default,
            klms: prepare_scheduler(SchedulerConfig::new(SchedulerType::LmsDiscrete))?,
            ddim: prepare_scheduler(
                SchedulerConfig::new(SchedulerType::Ddim)
                    .with_clip_sample(false)
                    .with_set_alpha_to_one(false),
            )?,
            euler: prepare_scheduler(SchedulerConfig::new(SchedulerType::EulerDiscrete))?,
            euler_ancestral: prepare_scheduler(SchedulerConfig::new(
                SchedulerType::EulerAncestralDiscrete,
            ))?,
        })
    }

    pub fn get(&self, sampler: SamplerKind) -> &Arc<dyn Scheduler> {
        match sampler {
            SamplerKind::Ddpm => &self.default,
            SamplerKind::KLms => &self.klms,
            SamplerKind::Ddim => &self.ddim,
            SamplerKind::KEuler => &self.euler,
            SamplerKind::KEulerAncestral => &self.euler_ancestral,
        }
    }
}

/// Where a wrapper's pipeline currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Residency {
    /// Entirely in host memory.
    Host,
    /// On the device chosen by the [`EngineMode`] (all of it, or only the unet).
    Accelerator,
}

/// Prompt and optional conditioning images for one generation call.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenerationInputs<'a> {
    pub prompt: &'a str,
    pub negative_prompt: Option<&'a str>,
    pub init_image: Option<&'a Tensor>,
    pub mask_image: Option<&'a Tensor>,
    pub outmask_image: Option<&'a Tensor>,
}

impl<'a> GenerationInputs<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            ..Default::default()
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: &'a str) -> Self {
        self.negative_prompt = Some(negative_prompt);
        self
    }

    pub fn with_init_image(mut self, image: &'a Tensor) -> Self {
        self.init_image = Some(image);
        self
    }

    pub fn with_mask_image(mut self, mask: &'a Tensor) -> Self {
        self.mask_image = Some(mask);
        self
    }

    pub fn with_outmask_image(mut self, outmask: &'a Tensor) -> Self {
        self.outmask_image = Some(outmask);
        self
    }
}

/// Owns one pipeline, applies the [`EngineMode`] to it and runs generation calls.
///
/// Not synchronized: callers serialize access, and must not deactivate a wrapper while a
/// generation is running on it.
pub struct PipelineWrapper {
    id: String,
    mode: Arc<EngineMode>,
    pipeline: Box<dyn DiffusionPipeline>,
    schedulers: SchedulerSet,
    residency: Residency,
    active_device: Option<Device>,
    silent: bool,
}

impl PipelineWrapper {
    /// Wrap a freshly loaded (host-resident) pipeline. Precision and attention slicing are
    /// decided here, once.
    pub fn new<S: ToString>(
        id: S,
        mode: Arc<EngineMode>,
        mut pipeline: Box<dyn DiffusionPipeline>,
    ) -> Result<Self> {
        let id = id.to_string();
        let kind = mode.device_kind();
        if mode.fp16_on(kind) {
            debug!("casting pipeline `{id}` to f16");
            pipeline.to_dtype(DType::F16)?;
        } else if mode.cuda_only_unet_on(kind) {
            debug!("casting unet of pipeline `{id}` to f16");
            pipeline.unet_to_dtype(DType::F16)?;
        }
        if mode.attention_slice_on(kind) {
            pipeline.enable_attention_slicing(1)?;
        }
        let schedulers = SchedulerSet::new(pipeline.scheduler())?;

        Ok(Self {
            id,
            mode,
            pipeline,
            schedulers,
            residency: Residency::Host,
            active_device: None,
            silent: false,
        })
    }

    /// Hide terminal progress bars. Progress callbacks are unaffected.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> &EngineMode {
        &self.mode
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn schedulers(&self) -> &SchedulerSet {
        &self.schedulers
    }

    /// Move the pipeline (or only its unet, in unet-only mode) onto the mode's device.
    pub fn activate(&mut self) -> Result<()> {
        let (kind, device) = self.mode.placement();
        if self.mode.cuda_only_unet_on(kind) {
            self.pipeline.unet_to_device(&device)?;
        } else {
            self.pipeline.to_device(&device)?;
        }
        info!("activated pipeline `{}` on {kind}", self.id);
        self.active_device = Some(device);
        self.residency = Residency::Accelerator;
        Ok(())
    }

    /// Move the whole pipeline to host memory, releasing cached cuda memory afterwards.
    pub fn deactivate(&mut self) -> Result<()> {
        self.pipeline.to_device(&Device::Cpu)?;
        if let Some(device) = self.active_device.take().filter(Device::is_cuda) {
            self.pipeline.empty_cache(&device)?;
        }
        info!("deactivated pipeline `{}`", self.id);
        self.residency = Residency::Host;
        Ok(())
    }

    /// Run one generation and return the raw image batch.
    ///
    /// An unsupported sampler is rejected before anything else happens. If `stop` is set
    /// during the run, the loop ends at the next step boundary and whatever the pipeline
    /// produced from the partial state is returned.
    pub fn generate(
        &mut self,
        inputs: &GenerationInputs<'_>,
        params: &GenerationParams,
        progress_callback: Option<ProgressCallback>,
        stop: Option<StopSignal>,
    ) -> Result<Tensor> {
        let sampler = SamplerKind::resolve(params.sampler)?;
        let scheduler = self.schedulers.get(sampler).clone();
        let generator = Generator::for_request(params.seed, &self.pipeline.device());
        let mut progress = ProgressReporter::new(progress_callback, stop).silent(self.silent);

        let request = PipelineRequest {
            prompt: inputs.prompt,
            negative_prompt: inputs.negative_prompt.filter(|text| !text.is_empty()),
            init_image: inputs.init_image,
            mask_image: inputs.mask_image,
            outmask_image: inputs.outmask_image,
            strength: params.strength,
            width: params.width,
            height: params.height,
            num_inference_steps: params.steps,
            guidance_scale: params.cfg_scale,
            eta: params.eta,
            generator,
            autocast: Autocast::for_device(self.mode.device_kind()),
        };

        debug!(
            "generating with pipeline `{}`: sampler {sampler:?}, {} steps, {}x{}",
            self.id, params.steps, params.width, params.height
        );
        let images = self.pipeline.generate(request, &scheduler, &mut progress)?;
        if progress.aborted() {
            info!(
                "pipeline `{}` stopped after {}/{} steps",
                self.id,
                progress.completed(),
                params.steps
            );
        }
        Ok(images)
    }
}
