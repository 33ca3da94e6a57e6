#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use candle_core::{DType, Device, Result, Tensor};
use diffusion_pool_core::{
    denoise, prepare_scheduler, Autocast, DeviceKind, DeviceProbe, DiffusionPipeline, Generator,
    LoadOptions, Loader, PipelineRequest, ProgressReporter, Scheduler, SchedulerConfig,
    SchedulerType, TokenSource, WeightSource,
};

/// Availability probe with switchable answers. An "available" accelerator is stood in for
/// by the CPU device, so the policy can be exercised on any machine.
#[derive(Clone, Default)]
pub struct FixedProbe {
    pub cuda: Arc<AtomicBool>,
    pub mps: Arc<AtomicBool>,
    /// Number of times a device was opened.
    pub opened: Arc<AtomicUsize>,
}

impl FixedProbe {
    pub fn new(cuda: bool, mps: bool) -> Self {
        Self {
            cuda: Arc::new(AtomicBool::new(cuda)),
            mps: Arc::new(AtomicBool::new(mps)),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn open(&self, available: &AtomicBool) -> Option<Device> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        available.load(Ordering::SeqCst).then_some(Device::Cpu)
    }
}

impl DeviceProbe for FixedProbe {
    fn open_cuda(&self, _ordinal: usize) -> Option<Device> {
        self.open(&self.cuda)
    }

    fn open_mps(&self, _ordinal: usize) -> Option<Device> {
        self.open(&self.mps)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    ToDevice(DeviceKind),
    ToDtype(DType),
    UnetToDevice(DeviceKind),
    UnetToDtype(DType),
    AttentionSlicing(usize),
    EmptyCache(DeviceKind),
    Generate,
}

/// What one `generate` call saw.
#[derive(Clone)]
pub struct Run {
    pub scheduler: Arc<dyn Scheduler>,
    pub completed: usize,
    pub aborted: bool,
    pub seed: Option<u64>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub had_init_image: bool,
    pub autocast: Autocast,
}

/// Calls of every fake pipeline, in order, tagged with the pipeline's name.
#[derive(Clone, Default)]
pub struct Journal {
    pub calls: Arc<Mutex<Vec<(String, Call)>>>,
    pub runs: Arc<Mutex<Vec<(String, Run)>>>,
}

impl Journal {
    pub fn calls(&self) -> Vec<(String, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, name: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn runs(&self) -> Vec<Run> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        self.runs.lock().unwrap().clear();
    }
}

/// A pipeline whose "model" shrinks the latents a little every step.
pub struct FakePipeline {
    name: String,
    journal: Journal,
    device: Device,
    scheduler: Arc<dyn Scheduler>,
    step_delay: Duration,
}

impl FakePipeline {
    pub fn new(name: &str, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            journal,
            device: Device::Cpu,
            scheduler: prepare_scheduler(SchedulerConfig::new(SchedulerType::Ddim))
                .expect("default scheduler"),
            step_delay: Duration::ZERO,
        }
    }

    /// Sleep this long in every model evaluation.
    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    fn log(&self, call: Call) {
        self.journal
            .calls
            .lock()
            .unwrap()
            .push((self.name.clone(), call));
    }
}

impl DiffusionPipeline for FakePipeline {
    fn device(&self) -> Device {
        self.device.clone()
    }

    fn to_device(&mut self, device: &Device) -> Result<()> {
        self.log(Call::ToDevice(DeviceKind::of(device)));
        self.device = device.clone();
        Ok(())
    }

    fn to_dtype(&mut self, dtype: DType) -> Result<()> {
        self.log(Call::ToDtype(dtype));
        Ok(())
    }

    fn unet_to_device(&mut self, device: &Device) -> Result<()> {
        self.log(Call::UnetToDevice(DeviceKind::of(device)));
        Ok(())
    }

    fn unet_to_dtype(&mut self, dtype: DType) -> Result<()> {
        self.log(Call::UnetToDtype(dtype));
        Ok(())
    }

    fn enable_attention_slicing(&mut self, slice_size: usize) -> Result<()> {
        self.log(Call::AttentionSlicing(slice_size));
        Ok(())
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    fn empty_cache(&mut self, device: &Device) -> Result<()> {
        self.log(Call::EmptyCache(DeviceKind::of(device)));
        Ok(())
    }

    fn generate(
        &mut self,
        request: PipelineRequest<'_>,
        scheduler: &Arc<dyn Scheduler>,
        progress: &mut ProgressReporter,
    ) -> Result<Tensor> {
        self.log(Call::Generate);
        let seed = request.generator.as_ref().and_then(Generator::seed);
        let mut generator = request
            .generator
            .unwrap_or_else(|| Generator::from_entropy(&self.device));

        let mut run = scheduler.begin(request.num_inference_steps, request.eta)?;
        let latents = generator
            .randn(
                (1, 4, request.height / 8, request.width / 8),
                DType::F32,
                &self.device,
            )?
            .affine(run.init_noise_sigma(), 0.)?;
        let step_delay = self.step_delay;
        let latents = denoise(run.as_mut(), latents, &mut generator, progress, |xs, _t| {
            std::thread::sleep(step_delay);
            xs.affine(0.1, 0.)
        })?;

        self.journal.runs.lock().unwrap().push((
            self.name.clone(),
            Run {
                scheduler: scheduler.clone(),
                completed: progress.completed(),
                aborted: progress.aborted(),
                seed,
                prompt: request.prompt.to_string(),
                negative_prompt: request.negative_prompt.map(str::to_string),
                had_init_image: request.init_image.is_some(),
                autocast: request.autocast,
            },
        ));
        Ok(latents)
    }
}

/// What a loader was asked to load.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest {
    pub source: WeightSource,
    pub token: TokenSource,
    pub options: LoadOptions,
}

/// Loads a [`FakePipeline`] named after the weight source, or fails when asked to.
#[derive(Clone, Default)]
pub struct FakeLoader {
    pub journal: Journal,
    pub requests: Arc<Mutex<Vec<LoadRequest>>>,
    pub fail: bool,
}

impl FakeLoader {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn pipeline_name(source: &WeightSource) -> String {
    match source {
        WeightSource::Local(path) => path.display().to_string(),
        WeightSource::Remote(model_id) => model_id.clone(),
    }
}

impl Loader for FakeLoader {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn load(
        &self,
        source: &WeightSource,
        token: &TokenSource,
        options: &LoadOptions,
    ) -> anyhow::Result<Box<dyn DiffusionPipeline>> {
        self.requests.lock().unwrap().push(LoadRequest {
            source: source.clone(),
            token: token.clone(),
            options: options.clone(),
        });
        if self.fail {
            anyhow::bail!("weights for {source} are corrupt");
        }
        Ok(Box::new(FakePipeline::new(
            &pipeline_name(source),
            self.journal.clone(),
        )))
    }
}
