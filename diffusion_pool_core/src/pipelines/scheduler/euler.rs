use candle_core::{Result, Tensor};

use super::{check_num_steps, DiscreteSigmas, Scheduler, SchedulerConfig, SchedulerRun};
use crate::util::Generator;

/// Euler sampler (Algorithm 2 of Karras et al. 2022) without churn.
pub struct EulerDiscreteScheduler {
    config: SchedulerConfig,
    train_sigmas: Vec<f64>,
}

impl EulerDiscreteScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let train_sigmas = DiscreteSigmas::train_sigmas(&config);
        Self {
            config,
            train_sigmas,
        }
    }
}

impl Scheduler for EulerDiscreteScheduler {
    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn begin(&self, num_inference_steps: usize, _eta: f64) -> Result<Box<dyn SchedulerRun>> {
        check_num_steps(num_inference_steps, &self.config)?;
        Ok(Box::new(EulerRun(DiscreteSigmas::new(
            &self.train_sigmas,
            num_inference_steps,
        ))))
    }
}

struct EulerRun(DiscreteSigmas);

impl SchedulerRun for EulerRun {
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
        _generator: &mut Generator,
    ) -> Result<Tensor> {
        let sigma = self.0.sigmas[step_index];
        let sigma_next = self.0.sigmas[step_index + 1];
        // With an epsilon prediction the ODE derivative is the model output itself.
        sample.add(&model_output.affine(sigma_next - sigma, 0.)?)
    }
}
