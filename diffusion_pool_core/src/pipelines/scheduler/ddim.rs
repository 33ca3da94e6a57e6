use std::sync::Arc;

use candle_core::{Result, Tensor};

use super::{check_num_steps, Scheduler, SchedulerConfig, SchedulerRun};
use crate::util::Generator;

/// Denoising diffusion implicit models.
pub struct DdimScheduler {
    config: SchedulerConfig,
    alphas_cumprod: Arc<Vec<f64>>,
    final_alpha_cumprod: f64,
}

impl DdimScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let alphas_cumprod = config.alphas_cumprod();
        let final_alpha_cumprod = if config.set_alpha_to_one.unwrap_or(true) {
            1.
        } else {
            alphas_cumprod[0]
        };
        Self {
            config,
            alphas_cumprod: Arc::new(alphas_cumprod),
            final_alpha_cumprod,
        }
    }
}

impl Scheduler for DdimScheduler {
    fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn begin(&self, num_inference_steps: usize, eta: f64) -> Result<Box<dyn SchedulerRun>> {
        check_num_steps(num_inference_steps, &self.config)?;
        let n_train = self.config.num_train_timesteps;
        let step_ratio = n_train / num_inference_steps;
        let offset = self.config.steps_offset.unwrap_or(0);
        let first = (num_inference_steps - 1) * step_ratio + offset;
        if first >= n_train {
            candle_core::bail!(
                "{num_inference_steps} DDIM steps with `steps_offset` {offset} would start at timestep {first}, \
                 past the last training timestep {}",
                n_train - 1
            )
        }
        let timesteps = (0..num_inference_steps)
            .rev()
            .map(|i| (i * step_ratio + offset) as f64)
            .collect();
        Ok(Box::new(DdimRun {
            timesteps,
            step_ratio,
            eta,
            clip_sample: self.config.clip_sample.unwrap_or(true),
            alphas_cumprod: self.alphas_cumprod.clone(),
            final_alpha_cumprod: self.final_alpha_cumprod,
        }))
    }
}

struct DdimRun {
    timesteps: Vec<f64>,
    step_ratio: usize,
    eta: f64,
    clip_sample: bool,
    alphas_cumprod: Arc<Vec<f64>>,
    final_alpha_cumprod: f64,
}

impl SchedulerRun for DdimRun {
    fn timesteps(&self) -> &[f64] {
        &self.timesteps
    }

    fn init_noise_sigma(&self) -> f64 {
        1.
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        step_index: usize,
        sample: &Tensor,
        generator: &mut Generator,
    ) -> Result<Tensor> {
        let t = self.timesteps[step_index] as usize;
        let alpha_prod_t = self.alphas_cumprod[t];
        let alpha_prod_t_prev = t
            .checked_sub(self.step_ratio)
            .map(|prev| self.alphas_cumprod[prev])
            .unwrap_or(self.final_alpha_cumprod);
        let beta_prod_t = 1. - alpha_prod_t;

        // x_0 = (x_t - sqrt(1 - a_t) * eps) / sqrt(a_t)
        let mut pred_original_sample = sample
            .sub(&model_output.affine(beta_prod_t.sqrt(), 0.)?)?
            .affine(1. / alpha_prod_t.sqrt(), 0.)?;
        if self.clip_sample {
            pred_original_sample = pred_original_sample.clamp(-1f32, 1f32)?;
        }

        let variance = (1. - alpha_prod_t_prev) / beta_prod_t
            * (1. - alpha_prod_t / alpha_prod_t_prev);
        let std_dev_t = self.eta * variance.sqrt();

        let direction = model_output.affine(
            (1. - alpha_prod_t_prev - std_dev_t * std_dev_t).max(0.).sqrt(),
            0.,
        )?;
        let prev_sample = pred_original_sample
            .affine(alpha_prod_t_prev.sqrt(), 0.)?
            .add(&direction)?;

        if self.eta > 0. {
            let noise = generator.randn_like(model_output)?;
            prev_sample.add(&noise.affine(std_dev_t, 0.)?)
        } else {
            Ok(prev_sample)
        }
    }
}
