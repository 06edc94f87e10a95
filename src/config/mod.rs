//! Daemon configuration
//!
//! The TOML boot file covers daemon-level settings plus the interfaces
//! to create at startup. Interface configuration uses the same
//! [`InterfaceConfig`] structure the control socket accepts as JSON.

use crate::policy::InterfaceConfig;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Control socket path.
    pub control_socket: PathBuf,
    /// Device the classifier mirrors snooped packets into.
    pub snoop_device: String,
    /// Station poll / idle tick interval in seconds.
    pub poll_interval: u64,
    /// Classifier object file loaded per interface.
    pub bpf_object: PathBuf,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            control_socket: PathBuf::from("/var/run/gatefilter.sock"),
            snoop_device: "gatefilter0".to_string(),
            poll_interval: 1,
            bpf_object: PathBuf::from("/lib/bpf/gatefilter.o"),
        }
    }
}

/// One interface created at boot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootInterface {
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub config: InterfaceConfig,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub log: LogConfig,
    pub interfaces: BTreeMap<String, BootInterface>,
}

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<DaemonConfig> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: DaemonConfig =
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Validation diagnostics; errors block startup, warnings do not.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &DaemonConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.daemon.poll_interval == 0 {
        result.error("daemon.poll_interval must be at least 1 second");
    }
    if config.daemon.snoop_device.is_empty() {
        result.error("daemon.snoop_device must not be empty");
    }

    let mut seen_devices: BTreeMap<&str, &str> = BTreeMap::new();
    for (name, iface) in &config.interfaces {
        if iface.devices.is_empty() {
            result.warn(format!(
                "interface {name} has no devices, nothing will be classified"
            ));
        }
        for device in &iface.devices {
            if let Some(other) = seen_devices.insert(device.as_str(), name.as_str()) {
                result.error(format!(
                    "device {device} bound to both {other} and {name}"
                ));
            }
        }

        if iface.config.client_timeout == 0 {
            result.warn(format!(
                "interface {name}: client_timeout 0 reaps idle clients on the first tick"
            ));
        }
    }

    result
}
