//! Sensor configuration management

use crate::detector::{DEFAULT_BLINK_INTERVAL, DetectorMode};
use crate::usb::TransferModes;
use anyhow::{Context, Result, anyhow};
use protocol::{DeviceIdentity, InterfaceClass, NIA_IDENTITY, TransferMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SensorConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default = "HostSettings::default_log_level")]
    pub log_level: String,
    /// How often the consumer reads the average and classification
    #[serde(default = "HostSettings::default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            tick_interval_ms: Self::default_tick_interval(),
        }
    }
}

impl HostSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_tick_interval() -> u64 {
        100
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Target "VID:PID"
    #[serde(default = "DeviceSettings::default_signature")]
    pub signature: DeviceIdentity,
    /// Interface class to enumerate (3 = HID)
    #[serde(default = "DeviceSettings::default_interface_class")]
    pub interface_class: InterfaceClass,
    /// Bound on each input report read; doubles as the liveness check
    #[serde(default = "DeviceSettings::default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub input_transfer: TransferMode,
    #[serde(default)]
    pub output_transfer: TransferMode,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            signature: Self::default_signature(),
            interface_class: Self::default_interface_class(),
            read_timeout_ms: Self::default_read_timeout(),
            input_transfer: TransferMode::default(),
            output_transfer: TransferMode::default(),
        }
    }
}

impl DeviceSettings {
    fn default_signature() -> DeviceIdentity {
        NIA_IDENTITY
    }

    fn default_interface_class() -> InterfaceClass {
        InterfaceClass::HID
    }

    fn default_read_timeout() -> u64 {
        3000
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn transfer_modes(&self) -> TransferModes {
        TransferModes {
            input: self.input_transfer,
            output: self.output_transfer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSettings {
    #[serde(default)]
    pub algorithm: DetectorMode,
    /// Below-threshold run that ends a blink
    #[serde(default = "DetectorSettings::default_blink_interval")]
    pub blink_interval: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            algorithm: DetectorMode::default(),
            blink_interval: Self::default_blink_interval(),
        }
    }
}

impl DetectorSettings {
    fn default_blink_interval() -> u32 {
        DEFAULT_BLINK_INTERVAL
    }
}

impl SensorConfig {
    /// Load configuration from the specified path or the standard locations
    ///
    /// Returns the file the configuration was read from. Nothing is logged,
    /// so this can run before logging is set up.
    pub fn load(path: Option<PathBuf>) -> Result<(Self, PathBuf)> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/nia-sensor/sensor.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: SensorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        Ok((config, config_path))
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("nia-sensor").join("sensor.toml")
        } else {
            PathBuf::from(".config/nia-sensor/sensor.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.host.tick_interval_ms == 0 {
            return Err(anyhow!("tick_interval_ms must be greater than 0"));
        }

        if self.device.read_timeout_ms == 0 {
            return Err(anyhow!("read_timeout_ms must be greater than 0"));
        }

        if !(1..=80).contains(&self.detector.blink_interval) {
            return Err(anyhow!(
                "Invalid blink_interval {}, must be between 1 and 80",
                self.detector.blink_interval
            ));
        }

        Ok(())
    }
}
