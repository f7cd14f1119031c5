/*!
Configuration management for the capture application.
*/

use anyhow::{Context, Result};
use cerelog_core::CalibrationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            serial: SerialConfig::default(),
            calibration: CalibrationConfig::default(),
            pipeline: PipelineConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM4`
    pub port: String,

    /// Line rate
    pub baud_rate: u32,

    /// Read timeout; a timeout yields an empty poll, not an error
    pub read_timeout_ms: u64,

    /// Maximum bytes requested per read
    pub read_chunk_size: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 50,
            read_chunk_size: 1024,
        }
    }
}

/// Threading and reporting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the byte and sample queues
    pub channel_buffer_size: usize,

    /// Statistics reporting interval in seconds (0 disables)
    pub stats_interval_seconds: u64,

    /// Window for the samples-per-second estimate
    pub sps_window_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
            stats_interval_seconds: 10,
            sps_window_ms: 1000,
        }
    }
}

/// Synthetic data generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Frames generated per second of wall clock
    pub sample_rate_hz: u32,

    /// Peak amplitude of the generated waveforms in microvolts
    pub amplitude_uv: f64,

    /// Probability of inserting a burst of line noise before a frame
    pub garbage_probability: f64,

    /// RNG seed, for reproducible streams
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250,
            amplitude_uv: 100.0,
            garbage_probability: 0.0,
            seed: 0x00C0_FFEE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerelog_core::OutputScale;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let original_config = AppConfig::new();

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        // Save and load
        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.pipeline.channel_buffer_size, 1000);
        assert_eq!(config.pipeline.sps_window_ms, 1000);
        assert_eq!(config.synthetic.sample_rate_hz, 250);

        assert_eq!(config.calibration.reference_voltage(), 4.5);
        assert_eq!(config.calibration.gain(), 24.0);
        assert_eq!(config.calibration.output_scale(), OutputScale::Microvolts);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            "[serial]\nport = \"COM4\"\n\n[calibration]\nreference_voltage = 2.5\ngain = 12.0\noutput_scale = \"mV\"\n"
        )
        .unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "COM4");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.calibration.reference_voltage(), 2.5);
        assert_eq!(config.calibration.gain(), 12.0);
        assert_eq!(config.calibration.code_bits(), 24);
        assert_eq!(config.calibration.output_scale(), OutputScale::Millivolts);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_invalid_calibration_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[calibration]\nreference_voltage = 4.5\ngain = 0.0\n").unwrap();

        assert!(AppConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::new());
    }
}
