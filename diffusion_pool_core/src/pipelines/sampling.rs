use candle_core::{Result, Tensor};
use diffusion_pool_common::ProgressReporter;

use super::SchedulerRun;
use crate::util::Generator;

/// Run the denoising process over the given latents.
///
/// Expects a model closure predicting the noise:
/// ```ignore
/// fn(latent_model_input: &Tensor, timestep: f64) -> Result<Tensor>;
/// ```
///
/// Steps are drawn through `progress`, so a set stop signal ends the loop at the next step
/// boundary and the partially denoised latents are returned as they are.
pub fn denoise(
    run: &mut dyn SchedulerRun,
    latents: Tensor,
    generator: &mut Generator,
    progress: &mut ProgressReporter,
    mut model: impl FnMut(&Tensor, f64) -> Result<Tensor>,
) -> Result<Tensor> {
    let timesteps = run.timesteps().to_vec();
    let mut latents = latents;
    for (step_index, timestep) in progress.iter(timesteps.into_iter().enumerate()) {
        let latent_model_input = run.scale_model_input(&latents, step_index)?;
        let noise_pred = model(&latent_model_input, timestep)?;
        latents = run.step(&noise_pred, step_index, &latents, generator)?;
    }
    Ok(latents)
}
