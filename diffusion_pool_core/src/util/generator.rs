use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::mode::DeviceKind;

/// Source of the random noise used by a generation call.
///
/// Samples are always drawn on the host and then materialized on the generator's device,
/// so a given seed produces the same noise on every backend.
pub struct Generator {
    device: Device,
    seed: Option<u64>,
    rng: StdRng,
}

impl Generator {
    pub fn seeded(seed: u64, device: &Device) -> Self {
        Self {
            device: device.clone(),
            seed: Some(seed),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy(device: &Device) -> Self {
        Self {
            device: device.clone(),
            seed: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// The generator for a request: `None` unless `seed > 0`.
    ///
    /// Pipelines on a device without its own seeded generator get a CPU generator.
    pub fn for_request(seed: i64, pipeline_device: &Device) -> Option<Self> {
        if seed <= 0 {
            return None;
        }
        let device = if DeviceKind::of(pipeline_device).generator_on_host() {
            Device::Cpu
        } else {
            pipeline_device.clone()
        };
        Some(Self::seeded(seed.unsigned_abs(), &device))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Standard normal noise of the given shape, placed on `device`.
    pub fn randn<S: Into<Shape>>(&mut self, shape: S, dtype: DType, device: &Device) -> Result<Tensor> {
        let shape = shape.into();
        let data = (0..shape.elem_count())
            .map(|_| self.rng.sample::<f32, _>(StandardNormal))
            .collect::<Vec<_>>();
        Tensor::from_vec(data, shape, &self.device)?
            .to_dtype(dtype)?
            .to_device(device)
    }

    pub fn randn_like(&mut self, xs: &Tensor) -> Result<Tensor> {
        self.randn(xs.shape().clone(), xs.dtype(), xs.device())
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::Generator;

    #[test]
    fn seeded_generators_agree() -> candle_core::Result<()> {
        let a = Generator::seeded(42, &Device::Cpu).randn((2, 3), DType::F32, &Device::Cpu)?;
        let b = Generator::seeded(42, &Device::Cpu).randn((2, 3), DType::F32, &Device::Cpu)?;
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn non_positive_seed_gives_no_generator() {
        assert!(Generator::for_request(0, &Device::Cpu).is_none());
        assert!(Generator::for_request(-5, &Device::Cpu).is_none());
        let gen = Generator::for_request(7, &Device::Cpu).expect("positive seed");
        assert_eq!(gen.seed(), Some(7));
        assert!(gen.device().is_cpu());
    }
}
