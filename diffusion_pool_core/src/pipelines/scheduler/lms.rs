use std::collections::VecDeque;

use candle_core::{Result, Tensor};

use super::{check_num_steps, DiscreteSigmas, Scheduler, SchedulerConfig, SchedulerRun};
use crate::util::Generator;

const LMS_ORDER: usize = 4;

/// Linear multistep sampler over the k-diffusion sigma schedule.
pub struct LmsDiscreteScheduler {
    config: SchedulerConfig,
    train_sigmas: Vec<f64>,
}

impl LmsDiscreteScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let train_sigmas = DiscreteSigmas::train_sigmas(&config);
        Self {
            config,
            train_sigmas,
        }
    }
}

impl Scheduler for LmsDiscreteScheduler {
    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn begin(&self, num_inference_steps: usize, _eta: f64) -> Result<Box<dyn SchedulerRun>> {
        check_num_steps(num_inference_steps, &self.config)?;
        Ok(Box::new(LmsRun {
            sigmas: DiscreteSigmas::new(&self.train_sigmas, num_inference_steps),
            derivatives: VecDeque::with_capacity(LMS_ORDER),
        }))
    }
}

struct LmsRun {
    sigmas: DiscreteSigmas,
    /// Most recent first.
    derivatives: VecDeque<Tensor>,
}

impl LmsRun {
    /// Integral over `[sigma_t, sigma_{t+1}]` of the Lagrange basis polynomial for the
    /// history point `current` among the `order` most recent sigmas.
    fn lms_coefficient(&self, order: usize, t: usize, current: usize) -> f64 {
        let sigmas = &self.sigmas.sigmas;
        let basis = |tau: f64| {
            (0..order)
                .filter(|k| *k != current)
                .map(|k| (tau - sigmas[t - k]) / (sigmas[t - current] - sigmas[t - k]))
                .product::<f64>()
        };
        // Simpson's rule is exact for the polynomials of degree <= 3 used here.
        let (a, b) = (sigmas[t], sigmas[t + 1]);
        (b - a) / 6. * (basis(a) + 4. * basis((a + b) / 2.) + basis(b))
    }
}

impl SchedulerRun for LmsRun {
    fn timesteps(&self) -> &[f64] {
        &self.sigmas.timesteps
    }

    fn init_noise_sigma(&self) -> f64 {
        self.sigmas.init_noise_sigma()
    }

    fn scale_model_input(&self, sample: &Tensor, step_index: usize) -> Result<Tensor> {
        self.sigmas.scale_model_input(sample, step_index)
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        step_index: usize,
        sample: &Tensor,
        _generator: &mut Generator,
    ) -> Result<Tensor> {
        // With an epsilon prediction the ODE derivative is the model output itself.
        self.derivatives.push_front(model_output.clone());
        self.derivatives.truncate(LMS_ORDER);

        let order = (step_index + 1).min(LMS_ORDER);
        let mut prev_sample = sample.clone();
        for (current, derivative) in self.derivatives.iter().take(order).enumerate() {
            let coeff = self.lms_coefficient(order, step_index, current);
            prev_sample = prev_sample.add(&derivative.affine(coeff, 0.)?)?;
        }
        Ok(prev_sample)
    }
}
