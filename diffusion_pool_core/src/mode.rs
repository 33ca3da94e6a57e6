use std::{fmt::Display, sync::Arc};

use candle_core::{utils, Device};
use tracing::debug;

/// The kind of device a [`EngineMode`] resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cuda,
    Mps,
    Cpu,
}

impl DeviceKind {
    pub fn of(device: &Device) -> Self {
        if device.is_cuda() {
            Self::Cuda
        } else if device.is_metal() {
            Self::Mps
        } else {
            Self::Cpu
        }
    }

    /// Whether random noise for a pipeline on this kind of device must be drawn by a host
    /// generator. Metal has no seeded generator of its own.
    pub fn generator_on_host(&self) -> bool {
        matches!(self, Self::Mps)
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Mps => write!(f, "mps"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Runtime check for accelerator availability. Each method opens the device, returning
/// `None` if it is not usable right now.
pub trait DeviceProbe: Send + Sync {
    fn open_cuda(&self, ordinal: usize) -> Option<Device>;
    fn open_mps(&self, ordinal: usize) -> Option<Device>;
}

/// Probes the accelerators candle was compiled with by trying to open the device.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeProbe;

impl DeviceProbe for RuntimeProbe {
    fn open_cuda(&self, ordinal: usize) -> Option<Device> {
        if !utils::cuda_is_available() {
            return None;
        }
        Device::new_cuda(ordinal)
            .inspect_err(|e| debug!("cuda device {ordinal} unavailable: {e}"))
            .ok()
    }

    fn open_mps(&self, ordinal: usize) -> Option<Device> {
        if !utils::metal_is_available() {
            return None;
        }
        Device::new_metal(ordinal)
            .inspect_err(|e| debug!("metal device {ordinal} unavailable: {e}"))
            .ok()
    }
}

/// Process-wide device and precision policy.
///
/// Every property is recomputed on access because accelerator availability can change
/// while the process runs.
///
/// | level | cuda behaviour                                   |
/// |-------|--------------------------------------------------|
/// | 0     | full precision                                   |
/// | 1     | + attention slicing                              |
/// | 2     | + whole pipeline in f16                          |
/// | 3+    | only the unet in f16, and only the unet on cuda  |
#[derive(Clone)]
pub struct EngineMode {
    vram_optimisation_level: u8,
    enable_cuda: bool,
    enable_mps: bool,
    ordinal: usize,
    probe: Arc<dyn DeviceProbe>,
}

impl std::fmt::Debug for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMode")
            .field("vram_optimisation_level", &self.vram_optimisation_level)
            .field("enable_cuda", &self.enable_cuda)
            .field("enable_mps", &self.enable_mps)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::new(0, true, false)
    }
}

impl EngineMode {
    pub fn new(vram_optimisation_level: u8, enable_cuda: bool, enable_mps: bool) -> Self {
        Self {
            vram_optimisation_level,
            enable_cuda,
            enable_mps,
            ordinal: 0,
            probe: Arc::new(RuntimeProbe),
        }
    }

    /// Replace the availability probe.
    pub fn with_probe<P: DeviceProbe + 'static>(mut self, probe: P) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Use accelerator `ordinal` instead of the first one.
    pub fn with_ordinal(mut self, ordinal: usize) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn vram_optimisation_level(&self) -> u8 {
        self.vram_optimisation_level
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Probe the enabled accelerators in order and return the first one that opens, along
    /// with its kind. Falls back to the CPU.
    pub fn placement(&self) -> (DeviceKind, Device) {
        if self.enable_cuda {
            if let Some(device) = self.probe.open_cuda(self.ordinal) {
                return (DeviceKind::Cuda, device);
            }
        }
        if self.enable_mps {
            if let Some(device) = self.probe.open_mps(self.ordinal) {
                return (DeviceKind::Mps, device);
            }
        }
        (DeviceKind::Cpu, Device::Cpu)
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.placement().0
    }

    pub fn device(&self) -> Device {
        self.placement().1
    }

    pub fn attention_slice(&self) -> bool {
        self.attention_slice_on(self.device_kind())
    }

    pub fn fp16(&self) -> bool {
        self.fp16_on(self.device_kind())
    }

    pub fn cuda_only_unet(&self) -> bool {
        self.cuda_only_unet_on(self.device_kind())
    }

    /// [`EngineMode::attention_slice`] for an already probed device kind.
    pub fn attention_slice_on(&self, kind: DeviceKind) -> bool {
        kind == DeviceKind::Cuda && self.vram_optimisation_level > 0
    }

    /// [`EngineMode::fp16`] for an already probed device kind.
    pub fn fp16_on(&self, kind: DeviceKind) -> bool {
        kind == DeviceKind::Cuda
            && self.vram_optimisation_level > 1
            && !self.cuda_only_unet_on(kind)
    }

    /// [`EngineMode::cuda_only_unet`] for an already probed device kind.
    pub fn cuda_only_unet_on(&self, kind: DeviceKind) -> bool {
        kind == DeviceKind::Cuda && self.vram_optimisation_level > 2
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceKind;

    #[test]
    fn only_metal_needs_a_host_generator() {
        assert!(DeviceKind::Mps.generator_on_host());
        assert!(!DeviceKind::Cuda.generator_on_host());
        assert!(!DeviceKind::Cpu.generator_on_host());
    }
}
