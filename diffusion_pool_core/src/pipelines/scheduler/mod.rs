mod ddim;
mod euler;
mod euler_ancestral;
mod lms;

use std::sync::Arc;

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::Generator;

pub use ddim::DdimScheduler;
pub use euler::EulerDiscreteScheduler;
pub use euler_ancestral::EulerAncestralDiscreteScheduler;
pub use lms::LmsDiscreteScheduler;

pub const DEFAULT_BETA_START: f64 = 0.00085;
pub const DEFAULT_BETA_END: f64 = 0.012;
pub const DEFAULT_NUM_TRAIN_TIMESTEPS: usize = 1000;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BetaSchedule {
    #[serde(rename = "linear")]
    Linear,
    #[default]
    #[serde(rename = "scaled_linear")]
    ScaledLinear,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerType {
    #[serde(rename = "DDIMScheduler")]
    Ddim,
    #[serde(rename = "LMSDiscreteScheduler")]
    LmsDiscrete,
    #[serde(rename = "EulerDiscreteScheduler")]
    EulerDiscrete,
    #[serde(rename = "EulerAncestralDiscreteScheduler")]
    EulerAncestralDiscrete,
}

fn default_beta_start() -> f64 {
    DEFAULT_BETA_START
}

fn default_beta_end() -> f64 {
    DEFAULT_BETA_END
}

fn default_num_train_timesteps() -> usize {
    DEFAULT_NUM_TRAIN_TIMESTEPS
}

/// A `scheduler_config.json` as found in diffusers-format weights.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    #[serde(rename = "_class_name")]
    pub scheduler_type: SchedulerType,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default)]
    pub beta_schedule: BetaSchedule,
    #[serde(default = "default_num_train_timesteps")]
    pub num_train_timesteps: usize,
    /// DDIM only. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_sample: Option<bool>,
    /// DDIM only. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_alpha_to_one: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_offset: Option<usize>,
}

impl SchedulerConfig {
    /// Stable Diffusion hyperparameters for the given scheduler type.
    pub fn new(scheduler_type: SchedulerType) -> Self {
        Self {
            scheduler_type,
            beta_start: DEFAULT_BETA_START,
            beta_end: DEFAULT_BETA_END,
            beta_schedule: BetaSchedule::ScaledLinear,
            num_train_timesteps: DEFAULT_NUM_TRAIN_TIMESTEPS,
            clip_sample: None,
            set_alpha_to_one: None,
            // DDIM configs serialized before the offset existed read back as 0.
            steps_offset: matches!(scheduler_type, SchedulerType::Ddim).then_some(0),
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_clip_sample(mut self, clip_sample: bool) -> Self {
        self.clip_sample = Some(clip_sample);
        self
    }

    pub fn with_set_alpha_to_one(mut self, set_alpha_to_one: bool) -> Self {
        self.set_alpha_to_one = Some(set_alpha_to_one);
        self
    }

    pub fn betas(&self) -> Vec<f64> {
        let n = self.num_train_timesteps;
        match self.beta_schedule {
            BetaSchedule::Linear => linspace(self.beta_start, self.beta_end, n),
            BetaSchedule::ScaledLinear => {
                linspace(self.beta_start.sqrt(), self.beta_end.sqrt(), n)
                    .into_iter()
                    .map(|b| b * b)
                    .collect()
            }
        }
    }

    pub fn alphas_cumprod(&self) -> Vec<f64> {
        self.betas()
            .into_iter()
            .scan(1., |acc, beta| {
                *acc *= 1. - beta;
                Some(*acc)
            })
            .collect()
    }

    /// Rewrite a legacy `steps_offset` to 1. Returns whether the config was changed.
    pub fn migrate_steps_offset(&mut self) -> bool {
        match self.steps_offset {
            Some(offset) if offset != 1 => {
                warn!(
                    "The configuration of scheduler {:?} is outdated. `steps_offset` should be set to 1 instead of {offset}. \
                     Update `scheduler/scheduler_config.json` for these weights, leaving it as is may give incorrect results.",
                    self.scheduler_type
                );
                self.steps_offset = Some(1);
                true
            }
            _ => false,
        }
    }

    /// Instantiate the scheduler this config describes, without migrating it.
    pub fn build(&self) -> Result<Arc<dyn Scheduler>> {
        if self.num_train_timesteps < 2 {
            candle_core::bail!(
                "`num_train_timesteps` must be at least 2, got {}",
                self.num_train_timesteps
            )
        }
        Ok(match self.scheduler_type {
            SchedulerType::Ddim => Arc::new(DdimScheduler::new(self.clone())),
            SchedulerType::LmsDiscrete => Arc::new(LmsDiscreteScheduler::new(self.clone())),
            SchedulerType::EulerDiscrete => Arc::new(EulerDiscreteScheduler::new(self.clone())),
            SchedulerType::EulerAncestralDiscrete => {
                Arc::new(EulerAncestralDiscreteScheduler::new(self.clone()))
            }
        })
    }
}

/// Migrate then build. This is the only place configs are migrated, so it happens once per
/// scheduler, at load time.
pub fn prepare_scheduler(mut config: SchedulerConfig) -> Result<Arc<dyn Scheduler>> {
    config.migrate_steps_offset();
    config.build()
}

/// A noise schedule and update rule. Immutable and shared between requests.
pub trait Scheduler: Send + Sync {
    fn config(&self) -> &SchedulerConfig;

    /// Start a denoising run of `num_inference_steps` steps. All per-run state lives in the
    /// returned value.
    fn begin(&self, num_inference_steps: usize, eta: f64) -> Result<Box<dyn SchedulerRun>>;
}

/// The state of one denoising run.
pub trait SchedulerRun: Send {
    fn timesteps(&self) -> &[f64];

    /// Standard deviation of the initial noise.
    fn init_noise_sigma(&self) -> f64;

    /// Scale the denoising model input for step `step_index`.
    fn scale_model_input(&self, sample: &Tensor, _step_index: usize) -> Result<Tensor> {
        Ok(sample.clone())
    }

    /// Predict the sample at the previous timestep from the model's noise prediction.
    fn step(
        &mut self,
        model_output: &Tensor,
        step_index: usize,
        sample: &Tensor,
        generator: &mut Generator,
    ) -> Result<Tensor>;
}

fn check_num_steps(num_inference_steps: usize, config: &SchedulerConfig) -> Result<()> {
    if num_inference_steps == 0 || num_inference_steps > config.num_train_timesteps {
        candle_core::bail!(
            "`num_inference_steps` must be in 1..={}, got {num_inference_steps}",
            config.num_train_timesteps
        )
    }
    Ok(())
}

pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        n => {
            let delta = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + i as f64 * delta).collect()
        }
    }
}

/// Timesteps and sigmas shared by the k-diffusion style schedulers.
#[derive(Clone, Debug)]
pub(crate) struct DiscreteSigmas {
    pub timesteps: Vec<f64>,
    /// One per timestep plus a trailing 0.
    pub sigmas: Vec<f64>,
}

impl DiscreteSigmas {
    pub fn train_sigmas(config: &SchedulerConfig) -> Vec<f64> {
        config
            .alphas_cumprod()
            .into_iter()
            .map(|acp| ((1. - acp) / acp).sqrt())
            .collect()
    }

    pub fn new(train_sigmas: &[f64], num_inference_steps: usize) -> Self {
        let last = (train_sigmas.len() - 1) as f64;
        let timesteps = linspace(0., last, num_inference_steps)
            .into_iter()
            .rev()
            .collect::<Vec<_>>();
        let mut sigmas = timesteps
            .iter()
            .map(|t| {
                let lo = t.floor() as usize;
                let hi = t.ceil() as usize;
                let w = t - lo as f64;
                train_sigmas[lo] * (1. - w) + train_sigmas[hi] * w
            })
            .collect::<Vec<_>>();
        sigmas.push(0.);
        Self { timesteps, sigmas }
    }

    pub fn init_noise_sigma(&self) -> f64 {
        self.sigmas.iter().copied().fold(0., f64::max)
    }

    /// Divide by `sqrt(sigma^2 + 1)` to match the variance the model was trained on.
    pub fn scale_model_input(&self, sample: &Tensor, step_index: usize) -> Result<Tensor> {
        let sigma = self.sigmas[step_index];
        sample.affine(1. / (sigma * sigma + 1.).sqrt(), 0.)
    }
}
