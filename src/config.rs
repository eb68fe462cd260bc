//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::exbus::device::DeviceSettings;
use crate::exbus::supervisor::{
    SupervisorThresholds, DEFAULT_FAILSAFE_TIMEOUT_MS, DEFAULT_STALL_TIMEOUT_MS,
    DEFAULT_TICK_RATE_HZ,
};
use crate::exbus::telemetry::{
    SensorDescriptor, TelemetryParams, TELEMETRY_MAX_LABEL_LEN, TELEMETRY_MAX_SENSOR_ID,
    TELEMETRY_MAX_UNIT_LEN,
};
use crate::serial::{EXBUS_BAUD_RATE, EXBUS_BAUD_RATE_HIGH};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub supervisor: SupervisorConfig,
    pub telemetry: TelemetryConfig,
    pub status: StatusConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Supervisor timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u32,

    #[serde(default = "default_failsafe_timeout_ms")]
    pub failsafe_timeout_ms: u32,
}

/// Telemetry responder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u16,

    #[serde(default = "default_device_id")]
    pub device_id: u16,

    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_sensor_id")]
    pub sensor_id: u8,

    #[serde(default = "default_sensor_label")]
    pub sensor_label: String,

    #[serde(default = "default_sensor_unit")]
    pub sensor_unit: String,

    #[serde(default = "default_descriptor_burst")]
    pub descriptor_burst: u32,

    #[serde(default = "default_descriptor_interval")]
    pub descriptor_interval: u32,
}

/// Link status log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,

    #[serde(default = "default_status_interval_ms")]
    pub interval_ms: u64,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { EXBUS_BAUD_RATE }

fn default_tick_rate_hz() -> u32 { DEFAULT_TICK_RATE_HZ }
fn default_stall_timeout_ms() -> u32 { DEFAULT_STALL_TIMEOUT_MS }
fn default_failsafe_timeout_ms() -> u32 { DEFAULT_FAILSAFE_TIMEOUT_MS }

fn default_telemetry_enabled() -> bool { true }
fn default_manufacturer_id() -> u16 { 0xA410 }
fn default_device_id() -> u16 { 0xF3FC }
fn default_device_name() -> String { "EXBusRX".to_string() }
fn default_sensor_id() -> u8 { 1 }
fn default_sensor_label() -> String { "Alt".to_string() }
fn default_sensor_unit() -> String { "m".to_string() }
fn default_descriptor_burst() -> u32 { 10 }
fn default_descriptor_interval() -> u32 { 10 }

fn default_status_enabled() -> bool { true }
fn default_status_interval_ms() -> u64 { 1000 }

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig {
                port: default_serial_port(),
                baud_rate: default_baud_rate(),
            },
            supervisor: SupervisorConfig {
                tick_rate_hz: default_tick_rate_hz(),
                stall_timeout_ms: default_stall_timeout_ms(),
                failsafe_timeout_ms: default_failsafe_timeout_ms(),
            },
            telemetry: TelemetryConfig {
                enabled: default_telemetry_enabled(),
                manufacturer_id: default_manufacturer_id(),
                device_id: default_device_id(),
                device_name: default_device_name(),
                sensor_id: default_sensor_id(),
                sensor_label: default_sensor_label(),
                sensor_unit: default_sensor_unit(),
                descriptor_burst: default_descriptor_burst(),
                descriptor_interval: default_descriptor_interval(),
            },
            status: StatusConfig {
                enabled: default_status_enabled(),
                interval_ms: default_status_interval_ms(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use exbus_rx::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Supervisor thresholds in ticks
    pub fn supervisor_thresholds(&self) -> SupervisorThresholds {
        SupervisorThresholds::from_timeouts(
            self.supervisor.tick_rate_hz,
            self.supervisor.stall_timeout_ms,
            self.supervisor.failsafe_timeout_ms,
        )
    }

    /// Telemetry responder parameters, `None` when telemetry is disabled
    pub fn telemetry_params(&self) -> Option<TelemetryParams> {
        if !self.telemetry.enabled {
            return None;
        }

        let telemetry = &self.telemetry;
        Some(TelemetryParams {
            manufacturer_id: telemetry.manufacturer_id,
            device_id: telemetry.device_id,
            value_sensor_id: telemetry.sensor_id,
            descriptors: vec![
                SensorDescriptor {
                    id: 0,
                    label: telemetry.device_name.clone(),
                    unit: String::new(),
                },
                SensorDescriptor {
                    id: telemetry.sensor_id,
                    label: telemetry.sensor_label.clone(),
                    unit: telemetry.sensor_unit.clone(),
                },
            ],
            descriptor_burst: telemetry.descriptor_burst,
            descriptor_interval: telemetry.descriptor_interval,
        })
    }

    /// Everything needed to construct an `ExBusDevice`
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            thresholds: self.supervisor_thresholds(),
            telemetry: self.telemetry_params(),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if ![EXBUS_BAUD_RATE, EXBUS_BAUD_RATE_HIGH].contains(&self.serial.baud_rate) {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("baud_rate must be one of: 125000, 250000")
            ));
        }

        // Validate supervisor timing
        if self.supervisor.tick_rate_hz < 50 || self.supervisor.tick_rate_hz > 10000 {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("tick_rate_hz must be between 50 and 10000")
            ));
        }

        if self.supervisor.stall_timeout_ms == 0 || self.supervisor.stall_timeout_ms > 100 {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("stall_timeout_ms must be between 1 and 100")
            ));
        }

        if self.supervisor.failsafe_timeout_ms <= self.supervisor.stall_timeout_ms
            || self.supervisor.failsafe_timeout_ms > 10000 {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("failsafe_timeout_ms must exceed stall_timeout_ms and be at most 10000")
            ));
        }

        let thresholds = self.supervisor_thresholds();
        if thresholds.failsafe_ticks <= thresholds.stall_ticks {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("tick_rate_hz too low to tell stall and failsafe timeouts apart")
            ));
        }

        // Validate telemetry descriptors
        if self.telemetry.enabled {
            if self.telemetry.device_name.is_empty() || self.telemetry.sensor_label.is_empty() {
                return Err(crate::error::ExBusError::Config(
                    toml::de::Error::custom("device_name and sensor_label cannot be empty")
                ));
            }

            for (name, value, max) in [
                ("device_name", &self.telemetry.device_name, TELEMETRY_MAX_LABEL_LEN),
                ("sensor_label", &self.telemetry.sensor_label, TELEMETRY_MAX_LABEL_LEN),
                ("sensor_unit", &self.telemetry.sensor_unit, TELEMETRY_MAX_UNIT_LEN),
            ] {
                if !value.is_ascii() || value.len() > max {
                    return Err(crate::error::ExBusError::Config(
                        toml::de::Error::custom(format!("{} must be ASCII and at most {} bytes", name, max))
                    ));
                }
            }

            if self.telemetry.sensor_id == 0 || self.telemetry.sensor_id > TELEMETRY_MAX_SENSOR_ID {
                return Err(crate::error::ExBusError::Config(
                    toml::de::Error::custom("sensor_id must be between 1 and 15")
                ));
            }

            if self.telemetry.descriptor_interval == 0 {
                return Err(crate::error::ExBusError::Config(
                    toml::de::Error::custom("descriptor_interval must be greater than 0")
                ));
            }
        }

        if self.status.enabled && (self.status.interval_ms < 10 || self.status.interval_ms > 60000) {
            return Err(crate::error::ExBusError::Config(
                toml::de::Error::custom("status interval_ms must be between 10 and 60000")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let thresholds = config.supervisor_thresholds();
        assert_eq!(thresholds.stall_ticks, 5);
        assert_eq!(thresholds.failsafe_ticks, 75);
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 115200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tick_rate() {
        let mut config = Config::default();
        config.supervisor.tick_rate_hz = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failsafe_must_exceed_stall() {
        let mut config = Config::default();
        config.supervisor.failsafe_timeout_ms = config.supervisor.stall_timeout_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_label_too_long() {
        let mut config = Config::default();
        config.telemetry.device_name = "x".repeat(TELEMETRY_MAX_LABEL_LEN + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unit_too_long() {
        let mut config = Config::default();
        config.telemetry.sensor_unit = "furlongs".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sensor_id_range() {
        let mut config = Config::default();
        config.telemetry.sensor_id = 0;
        assert!(config.validate().is_err());

        config.telemetry.sensor_id = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_telemetry_skips_descriptor_checks() {
        let mut config = Config::default();
        config.telemetry.enabled = false;
        config.telemetry.device_name = String::new();

        assert!(config.validate().is_ok());
        assert!(config.telemetry_params().is_none());
    }

    #[test]
    fn test_telemetry_params_from_config() {
        let params = Config::default().telemetry_params().unwrap();

        assert_eq!(params.manufacturer_id, 0xA410);
        assert_eq!(params.value_sensor_id, 1);
        assert_eq!(params.descriptors.len(), 2);
        assert_eq!(params.descriptors[0].label, "EXBusRX");
        assert_eq!(params.descriptors[1].unit, "m");
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyAMA0"
baud_rate = 250000

[supervisor]
tick_rate_hz = 1000

[telemetry]
sensor_label = "Volt"
sensor_unit = "V"

[status]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyAMA0");
        assert_eq!(config.serial.baud_rate, 250000);
        assert_eq!(config.supervisor_thresholds().stall_ticks, 8);
        assert_eq!(config.supervisor_thresholds().failsafe_ticks, 120);
        assert_eq!(config.telemetry.sensor_label, "Volt");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
baud_rate = 9600

[supervisor]

[telemetry]

[status]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/exbus.toml").is_err());
    }
}
