use candle_core::{Result, Tensor};

use super::{check_num_steps, DiscreteSigmas, Scheduler, SchedulerConfig, SchedulerRun};
use crate::util::Generator;

/// Ancestral sampling with Euler steps: each step overshoots to `sigma_down` and adds
/// fresh noise of scale `sigma_up`.
pub struct EulerAncestralDiscreteScheduler {
    config: SchedulerConfig,
    train_sigmas: Vec<f64>,
}

impl EulerAncestralDiscreteScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let train_sigmas = DiscreteSigmas::train_sigmas(&config);
        Self {
            config,
            train_sigmas,
        }
    }
}

impl Scheduler for EulerAncestralDiscreteScheduler {
    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn begin(&self, num_inference_steps: usize, _eta: f64) -> Result<Box<dyn SchedulerRun>> {
        check_num_steps(num_inference_steps, &self.config)?;
        Ok(Box::new(EulerAncestralRun(DiscreteSigmas::new(
            &self.train_sigmas,
            num_inference_steps,
        ))))
    }
}

struct EulerAncestralRun(DiscreteSigmas);

impl SchedulerRun for EulerAncestralRun {
    fn timesteps(&self) -> &[f64] {
        &self.0.timesteps
    }

    fn init_noise_sigma(&self) -> f64 {
        self.0.init_noise_sigma()
    }

    fn scale_model_input(&self, sample: &Tensor, step_index: usize) -> Result<Tensor> {
        self.0.scale_model_input(sample, step_index)
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        step_index: usize,
        sample: &Tensor,
        generator: &mut Generator,
    ) -> Result<Tensor> {
        let sigma_from = self.0.sigmas[step_index];
        let sigma_to = self.0.sigmas[step_index + 1];
        let sigma_up = (sigma_to.powi(2) * (sigma_from.powi(2) - sigma_to.powi(2))
            / sigma_from.powi(2))
        .max(0.)
        .sqrt();
        let sigma_down = (sigma_to.powi(2) - sigma_up.powi(2)).max(0.).sqrt();

        let prev_sample = sample.add(&model_output.affine(sigma_down - sigma_from, 0.)?)?;
        if sigma_up == 0. {
            return Ok(prev_sample);
        }
        let noise = generator.randn_like(model_output)?;
        prev_sample.add(&noise.affine(sigma_up, 0.)?)
    }
}
