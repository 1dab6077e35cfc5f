//! GPU availability probe and enforcement.
//!
//! Keeps "desired device" and "enforced device" distinct: a manifest's
//! `gpu_required`/`cpu_fallback_allowed` flags never collapse onto a
//! single branch that always picks the same device regardless of which
//! flag fired.

use base::{bail_t, Error};

use crate::container::manifest::ResourceRequirements;

/// The device a model will actually run inference on, after enforcement.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

/// A CUDA device is present if `/proc/driver/nvidia/gpus` exists and is
/// non-empty, or if `VAS_FORCE_GPU` is set truthy (an escape hatch for
/// GPU-less test/dev environments). `force_gpu` is passed in rather than
/// read from the environment again here so callers can use the value
/// already parsed onto `Config`.
pub fn gpu_available(force_gpu: Option<bool>) -> bool {
    if let Some(forced) = force_gpu {
        return forced;
    }
    probe_nvidia_proc()
}

fn probe_nvidia_proc() -> bool {
    match std::fs::read_dir("/proc/driver/nvidia/gpus") {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

/// Applies the enforcement table below. `Ok(Device::Cuda)` or
/// `Ok(Device::Cpu)` is the selected device; `Err` is a terminal,
/// fail-fast condition (manifest requires a GPU and none is available)
/// and the caller must exit non-zero.
pub fn enforce(reqs: &ResourceRequirements, gpu_available: bool) -> Result<Device, Error> {
    if reqs.gpu_required {
        if gpu_available {
            return Ok(Device::Cuda);
        }
        bail_t!(
            Unavailable,
            "model requires a GPU but none is available at startup"
        );
    }
    if reqs.cpu_fallback_allowed && !gpu_available {
        tracing::warn!("no GPU available; continuing on CPU with degraded performance");
        return Ok(Device::Cpu);
    }
    Ok(if gpu_available { Device::Cuda } else { Device::Cpu })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reqs(gpu_required: bool, cpu_fallback_allowed: bool) -> ResourceRequirements {
        ResourceRequirements { gpu_required, gpu_memory_mb: None, cpu_fallback_allowed }
    }

    #[test]
    fn force_gpu_overrides_proc_probe() {
        assert!(gpu_available(Some(true)));
        assert!(!gpu_available(Some(false)));
    }

    #[test]
    fn gpu_required_without_gpu_is_terminal() {
        assert!(enforce(&reqs(true, false), false).is_err());
    }

    #[test]
    fn gpu_required_with_gpu_selects_cuda() {
        assert_eq!(enforce(&reqs(true, false), true).unwrap(), Device::Cuda);
    }

    #[test]
    fn cpu_fallback_without_gpu_selects_cpu_not_fatal() {
        assert_eq!(enforce(&reqs(false, true), false).unwrap(), Device::Cpu);
    }

    #[test]
    fn no_gpu_required_selects_by_availability() {
        assert_eq!(enforce(&reqs(false, false), true).unwrap(), Device::Cuda);
        assert_eq!(enforce(&reqs(false, false), false).unwrap(), Device::Cpu);
    }
}
