//! Configuration for the segmentation pipeline

use crate::error::{Error, Result};
use crate::segmentation::{Device, FlowPreset, FusionParams, Thresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Path to the segmentation network (ONNX file)
    pub model: Option<PathBuf>,

    /// Execution device for the network
    pub device: Device,

    /// Network input width
    pub working_width: u32,

    /// Network input height
    pub working_height: u32,

    /// Hysteresis thresholds applied to the fused confidence
    pub thresholds: Thresholds,

    /// Motion-adaptive blending parameters
    pub fusion: FusionParams,

    /// Optical flow speed preset
    pub flow_preset: FlowPreset,

    /// Background colour for video compositing
    pub background: [u8; 3],
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            model: None,
            device: Device::Cpu,
            working_width: 192,
            working_height: 192,
            thresholds: Thresholds::default(),
            fusion: FusionParams::default(),
            flow_preset: FlowPreset::UltraFast,
            background: [255, 255, 255],
        }
    }
}

impl SegmenterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::InvalidConfiguration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfiguration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.working_width == 0 || self.working_height == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "Working resolution must be non-zero, got {}x{}",
                self.working_width, self.working_height
            )));
        }
        // Thresholds validate on construction and deserialization
        Thresholds::new(self.thresholds.background(), self.thresholds.foreground())?;
        self.fusion.validate()?;
        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Human segmentation configuration

model = "models/humanseg_lite.onnx"
device = "cpu"
working_width = 192
working_height = 192
flow_preset = "ultra_fast"
background = [255, 255, 255]

[thresholds]
background = 0.2
foreground = 0.8

[fusion]
max_trust = 0.95
motion_scale = 4.0
consistency_threshold = 8.0
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SegmenterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!((config.working_width, config.working_height), (192, 192));
    }

    #[test]
    fn test_example_config_parses() {
        let config: SegmenterConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, Some(PathBuf::from("models/humanseg_lite.onnx")));
        assert_eq!(config.flow_preset, FlowPreset::UltraFast);
        assert_eq!(config.thresholds, Thresholds::default());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SegmenterConfig = toml::from_str("flow_preset = \"medium\"").unwrap();
        assert_eq!(config.flow_preset, FlowPreset::Medium);
        assert_eq!(config.fusion, FusionParams::default());
    }

    #[test]
    fn test_inverted_thresholds_fail_to_parse() {
        let result: std::result::Result<SegmenterConfig, _> =
            toml::from_str("[thresholds]\nbackground = 0.9\nforeground = 0.1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_working_size_is_invalid() {
        let config = SegmenterConfig {
            working_width: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = SegmenterConfig {
            device: Device::Gpu,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = SegmenterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.device, Device::Gpu);
        assert_eq!(loaded.thresholds, config.thresholds);
    }
}
