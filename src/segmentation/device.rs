use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const CUDA_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Execution device for the segmentation network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl Device {
    /// Pick the device for a run, checking that a CUDA device is visible when
    /// the GPU is requested
    pub fn resolve(use_gpu: bool) -> Result<Self> {
        Self::resolve_with(use_gpu, std::env::var(CUDA_DEVICES_VAR).ok().as_deref())
    }

    fn resolve_with(use_gpu: bool, visible_devices: Option<&str>) -> Result<Self> {
        if !use_gpu {
            return Ok(Device::Cpu);
        }

        let has_device_id = visible_devices
            .and_then(|v| v.trim().chars().next())
            .is_some_and(|c| c.is_ascii_digit());

        if has_device_id {
            Ok(Device::Gpu)
        } else {
            Err(Error::DeviceUnavailable(format!(
                "{CUDA_DEVICES_VAR} is not set correctly; set it to a CUDA device id to use the GPU"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_never_checks_environment() {
        assert_eq!(Device::resolve_with(false, None).unwrap(), Device::Cpu);
    }

    #[test]
    fn test_gpu_requires_device_id() {
        assert_eq!(Device::resolve_with(true, Some("0")).unwrap(), Device::Gpu);
        assert_eq!(Device::resolve_with(true, Some("1,2")).unwrap(), Device::Gpu);
        assert!(matches!(
            Device::resolve_with(true, None),
            Err(Error::DeviceUnavailable(_))
        ));
        assert!(matches!(
            Device::resolve_with(true, Some("")),
            Err(Error::DeviceUnavailable(_))
        ));
        assert!(matches!(
            Device::resolve_with(true, Some("none")),
            Err(Error::DeviceUnavailable(_))
        ));
    }
}
