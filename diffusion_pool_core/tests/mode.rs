mod common;

use std::sync::atomic::Ordering;

use common::FixedProbe;
use diffusion_pool_core::{DeviceKind, EngineMode};

fn mode(level: u8, cuda: bool, mps: bool) -> EngineMode {
    EngineMode::new(level, true, true).with_probe(FixedProbe::new(cuda, mps))
}

#[test]
fn fp16_and_unet_only_are_exclusive() {
    for level in 0..=6 {
        for (enable_cuda, enable_mps, cuda, mps) in (0..16).map(|bits| {
            (bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0)
        }) {
            let mode = EngineMode::new(level, enable_cuda, enable_mps)
                .with_probe(FixedProbe::new(cuda, mps));
            assert!(
                !(mode.fp16() && mode.cuda_only_unet()),
                "level {level}, enable_cuda {enable_cuda}, enable_mps {enable_mps}, cuda {cuda}, mps {mps}"
            );
        }
    }
}

#[test]
fn high_levels_on_cuda_use_unet_only_half_precision() {
    for level in 3..=8 {
        let mode = mode(level, true, true);
        assert_eq!(mode.device_kind(), DeviceKind::Cuda);
        assert!(mode.cuda_only_unet());
        assert!(!mode.fp16());
        assert!(mode.attention_slice());
    }
}

#[test]
fn levels_step_up_on_cuda() {
    let level0 = mode(0, true, false);
    assert!(!level0.attention_slice() && !level0.fp16() && !level0.cuda_only_unet());

    let level1 = mode(1, true, false);
    assert!(level1.attention_slice() && !level1.fp16() && !level1.cuda_only_unet());

    let level2 = mode(2, true, false);
    assert!(level2.attention_slice() && level2.fp16() && !level2.cuda_only_unet());
}

#[test]
fn device_falls_through_tiers() {
    assert_eq!(mode(0, true, true).device_kind(), DeviceKind::Cuda);
    assert_eq!(mode(0, false, true).device_kind(), DeviceKind::Mps);
    assert_eq!(mode(0, false, false).device_kind(), DeviceKind::Cpu);

    let cuda_disabled = EngineMode::new(0, false, true).with_probe(FixedProbe::new(true, true));
    assert_eq!(cuda_disabled.device_kind(), DeviceKind::Mps);

    let nothing_enabled = EngineMode::new(0, false, false).with_probe(FixedProbe::new(true, true));
    assert_eq!(nothing_enabled.device_kind(), DeviceKind::Cpu);
    assert!(nothing_enabled.device().is_cpu());
}

#[test]
fn optimisations_are_cuda_only() {
    for level in 0..=4 {
        for probe in [FixedProbe::new(false, true), FixedProbe::new(false, false)] {
            let mode = EngineMode::new(level, true, true).with_probe(probe);
            assert!(!mode.attention_slice());
            assert!(!mode.fp16());
            assert!(!mode.cuda_only_unet());
        }
    }
}

#[test]
fn availability_is_rechecked_on_every_access() {
    let probe = FixedProbe::new(false, false);
    let mode = EngineMode::new(3, true, false).with_probe(probe.clone());
    assert_eq!(mode.device_kind(), DeviceKind::Cpu);
    assert!(!mode.cuda_only_unet());

    probe.cuda.store(true, Ordering::SeqCst);
    assert_eq!(mode.device_kind(), DeviceKind::Cuda);
    assert!(mode.cuda_only_unet());
}

#[test]
fn each_property_probes_once() {
    let probe = FixedProbe::new(true, false);
    let mode = EngineMode::new(2, true, false).with_probe(probe.clone());

    assert!(mode.fp16());
    assert_eq!(probe.opened.load(Ordering::SeqCst), 1);

    let (kind, device) = mode.placement();
    assert_eq!(kind, DeviceKind::Cuda);
    assert!(mode.fp16_on(kind) && mode.attention_slice_on(kind) && !mode.cuda_only_unet_on(kind));
    assert_eq!(probe.opened.load(Ordering::SeqCst), 2);
    // The probed device is handed out as is.
    assert!(device.is_cpu());
}

#[test]
fn mps_is_only_probed_when_cuda_is_unavailable() {
    let probe = FixedProbe::new(true, true);
    let mode = EngineMode::new(0, true, true).with_probe(probe.clone());
    assert_eq!(mode.device_kind(), DeviceKind::Cuda);
    assert_eq!(probe.opened.load(Ordering::SeqCst), 1);

    probe.cuda.store(false, Ordering::SeqCst);
    assert_eq!(mode.device_kind(), DeviceKind::Mps);
    assert_eq!(probe.opened.load(Ordering::SeqCst), 3);
}
