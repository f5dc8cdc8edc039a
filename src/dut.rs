use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Static per-device configuration, loaded once per execution from
/// `<devices_dir>/<device_name>.json`. Read-only at runtime; `reload`
/// re-reads the file on demand.
#[derive(Debug, Clone)]
pub struct DutConfig {
    config_path: PathBuf,
    data: DeviceDefinition,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDefinition {
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub uart_port_map: HashMap<String, String>,
    #[serde(default)]
    pub boot_mode_map: HashMap<String, String>,
    #[serde(default)]
    pub health_check: HealthCheck,
    #[serde(default)]
    pub power_config: PowerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub uart_ports: Vec<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            uart_ports: Vec::new(),
            check_interval_seconds: default_check_interval(),
            error_threshold: default_error_threshold(),
        }
    }
}

fn default_check_interval() -> u64 {
    60
}

fn default_error_threshold() -> u32 {
    5
}

/// Power backend selector: `module` names the relay implementation,
/// `settings` carries the backend-specific fields (parsed by the relay
/// registry).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerConfig {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl DutConfig {
    pub fn load(device_name: &str, devices_dir: &Path) -> Result<Self> {
        let config_path = devices_dir.join(format!("{}.json", device_name));
        let data = Self::read(&config_path)?;
        Ok(Self { config_path, data })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.data = Self::read(&self.config_path)?;
        Ok(())
    }

    fn read(path: &Path) -> Result<DeviceDefinition> {
        if !path.is_file() {
            return Err(AppError::Setup(format!(
                "Device configuration not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let data = serde_json::from_str(&content).map_err(|e| {
            AppError::Setup(format!(
                "Device configuration {} is malformed: {}",
                path.display(),
                e
            ))
        })?;
        Ok(data)
    }

    pub fn device_name(&self) -> &str {
        &self.data.device_name
    }

    pub fn device_type(&self) -> &str {
        &self.data.device_type
    }

    /// Resolves a logical port name (e.g. `mcu0`, `debug`) to a device path.
    pub fn uart_port(&self, port_name: &str) -> Option<&str> {
        self.data.uart_port_map.get(port_name).map(String::as_str)
    }

    pub fn default_uart_port(&self) -> Option<&str> {
        self.uart_port("default")
    }

    /// Resolves a logical boot mode name (e.g. `sd_card`) to a hardware code.
    pub fn boot_mode(&self, mode_name: &str) -> Option<&str> {
        self.data.boot_mode_map.get(mode_name).map(String::as_str)
    }

    pub fn default_boot_mode(&self) -> Option<&str> {
        self.boot_mode("default")
    }

    pub fn health_check(&self) -> &HealthCheck {
        &self.data.health_check
    }

    pub fn power_config(&self) -> &PowerConfig {
        &self.data.power_config
    }
}
