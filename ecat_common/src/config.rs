//! Setup document model, loader and validation.
//!
//! A setup document is one TOML file declaring the masters (one per bus) and
//! the device entries attached to them:
//!
//! ```toml
//! [[masters]]
//! bus = "eth0"
//! cyclic_period_seconds = 0.001
//! state_change_timeout_seconds = 10.0
//! update_rate_warn_threshold = 20
//! bus_diagnosis = false
//! log_error_counters = false
//!
//! [[devices]]
//! type = "joint_drive"
//! name = "drive1"
//! configuration_file = "drive1.toml"
//! ethercat_address = 5
//! ethercat_bus = "eth0"
//! ethercat_pdo_type = "A"
//! ```
//!
//! Loading is fail-fast: every structural defect (missing field, duplicate
//! bus/name/address, inconsistent diagnostic flags, unresolved configuration
//! file) is a [`ConfigError`] carrying enough context to locate the
//! offending section. No partially-valid configuration is ever returned.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for setup-document loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The setup document itself does not exist or cannot be read.
    #[error("setup document not found: {0}")]
    FileNotFound(PathBuf),

    /// TOML syntax error or missing/mistyped field.
    #[error("failed to parse setup document {path}: {message}")]
    Parse {
        /// Path of the document being parsed.
        path: PathBuf,
        /// Parser diagnostic, including the offending key where available.
        message: String,
    },

    /// Semantic validation failed. The message names the entry at fault.
    #[error("invalid setup: {0}")]
    Validation(String),

    /// A `~`-prefixed configuration-file path could not be expanded.
    #[error("device '{device}': HOME is not set, cannot expand {path}")]
    HomeUnset {
        /// Name of the device entry whose path needed expansion.
        device: String,
        /// The path as written in the document.
        path: PathBuf,
    },

    /// A device's resolved configuration file does not exist on disk.
    #[error("device '{device}': configuration file does not exist: {path}")]
    MissingDeviceConfig {
        /// Name of the device entry at fault.
        device: String,
        /// The fully resolved path that was probed.
        path: PathBuf,
    },
}

/// Device type tag.
///
/// Closed enumeration of the device types this workspace can construct.
/// Wiring in a new type means adding a variant here and registering a
/// constructor for it in the bus crate's device registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Integrated joint actuator: staged commands, readings, reading
    /// callbacks. Carries a configurable PDO layout (variants A-D).
    JointDrive,
    /// Servo drive: staged commands and reading snapshots, fixed PDO layout.
    ServoDrive,
    /// Six-axis force/torque sensor: readings and reading callbacks only.
    ForceSensor,
}

impl DeviceType {
    /// The tag as written in setup documents.
    pub fn tag(self) -> &'static str {
        match self {
            DeviceType::JointDrive => "joint_drive",
            DeviceType::ServoDrive => "servo_drive",
            DeviceType::ForceSensor => "force_sensor",
        }
    }

    /// Whether entries of this type must carry `ethercat_pdo_type`.
    pub fn requires_pdo_variant(self) -> bool {
        matches!(self, DeviceType::JointDrive)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// PDO layout variant for types with a configurable process-data image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PdoVariant {
    /// Layout A.
    A,
    /// Layout B.
    B,
    /// Layout C.
    C,
    /// Layout D.
    D,
}

impl fmt::Display for PdoVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PdoVariant::A => "A",
            PdoVariant::B => "B",
            PdoVariant::C => "C",
            PdoVariant::D => "D",
        };
        f.write_str(s)
    }
}

/// One master definition (`[[masters]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    /// Optional human-readable name; the bus identifier is used when absent.
    #[serde(default)]
    pub name: Option<String>,

    /// Bus identifier (network interface), unique across the document.
    pub bus: String,

    /// Target cyclic update period in seconds.
    pub cyclic_period_seconds: f64,

    /// Bound for blocking state changes (startup readiness wait,
    /// pre-shutdown quiescence wait), in seconds.
    pub state_change_timeout_seconds: f64,

    /// Number of consecutive overdue cyclic updates before a warning is
    /// emitted.
    pub update_rate_warn_threshold: u32,

    /// Sample link error counters while cycling.
    pub bus_diagnosis: bool,

    /// Log the sampled error counters. Requires `bus_diagnosis`.
    pub log_error_counters: bool,
}

impl MasterConfig {
    /// The configured cyclic period.
    pub fn cyclic_period(&self) -> Duration {
        Duration::from_secs_f64(self.cyclic_period_seconds)
    }

    /// The configured state-change timeout.
    pub fn state_change_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.state_change_timeout_seconds)
    }

    /// Display label: the name if set, otherwise the bus identifier.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.bus)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.is_empty() {
            return Err(ConfigError::Validation(format!(
                "master '{}': bus must not be empty",
                self.label()
            )));
        }
        if !self.cyclic_period_seconds.is_finite() || self.cyclic_period_seconds <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "master '{}': cyclic_period_seconds must be a positive number",
                self.label()
            )));
        }
        if !self.state_change_timeout_seconds.is_finite() || self.state_change_timeout_seconds <= 0.0
        {
            return Err(ConfigError::Validation(format!(
                "master '{}': state_change_timeout_seconds must be a positive number",
                self.label()
            )));
        }
        if self.update_rate_warn_threshold == 0 {
            return Err(ConfigError::Validation(format!(
                "master '{}': update_rate_warn_threshold must be at least 1",
                self.label()
            )));
        }
        if self.log_error_counters && !self.bus_diagnosis {
            return Err(ConfigError::Validation(format!(
                "master '{}': log_error_counters requires bus_diagnosis",
                self.label()
            )));
        }
        Ok(())
    }
}

/// One device entry (`[[devices]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    /// Device type tag.
    #[serde(rename = "type")]
    pub device_type: DeviceType,

    /// Logical device name, unique across the document.
    pub name: String,

    /// Path to the device's own configuration file. As written in the
    /// document until [`SetupConfig::load`] resolves it in place (absolute /
    /// `~`-expanded / relative to the document's directory).
    pub configuration_file: PathBuf,

    /// Station address on the bus, unique within `ethercat_bus`.
    pub ethercat_address: u32,

    /// Bus this device lives on; must match a declared master's bus.
    pub ethercat_bus: String,

    /// PDO layout selector, required only for variant-carrying types.
    #[serde(default)]
    pub ethercat_pdo_type: Option<PdoVariant>,
}

impl DeviceEntry {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation(
                "device entry with empty name".to_string(),
            ));
        }
        if self.ethercat_bus.is_empty() {
            return Err(ConfigError::Validation(format!(
                "device '{}': ethercat_bus must not be empty",
                self.name
            )));
        }
        if self.device_type.requires_pdo_variant() && self.ethercat_pdo_type.is_none() {
            return Err(ConfigError::Validation(format!(
                "device '{}': ethercat_pdo_type is required for type '{}'",
                self.name, self.device_type
            )));
        }
        Ok(())
    }
}

/// The parsed, validated setup document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    /// Declared masters, one per bus.
    #[serde(default)]
    pub masters: Vec<MasterConfig>,

    /// Declared device entries.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl SetupConfig {
    /// Load and validate a setup document.
    ///
    /// Device configuration-file paths are resolved in place: absolute paths
    /// are kept, `~`-prefixed paths are expanded against `HOME`, anything
    /// else is taken relative to the document's directory. Every resolved
    /// path must exist.
    ///
    /// # Errors
    /// Any structural or semantic defect aborts the load with a
    /// [`ConfigError`]; no partially-valid configuration escapes.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::load_with_home(path, home.as_deref())
    }

    /// Like [`load`](Self::load), with the home directory supplied by the
    /// caller instead of read from the environment.
    pub fn load_with_home(path: &Path, home: Option<&Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_path_buf()))?;

        let mut config: SetupConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let setup_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_device_configs(setup_dir, home)?;
        config.validate()?;
        debug!(
            masters = config.masters.len(),
            devices = config.devices.len(),
            "setup document loaded"
        );
        Ok(config)
    }

    /// Semantic validation of an already-parsed document.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.masters.is_empty() {
            return Err(ConfigError::Validation(
                "no masters declared in setup document".to_string(),
            ));
        }
        if self.devices.is_empty() {
            return Err(ConfigError::Validation(
                "no devices declared in setup document".to_string(),
            ));
        }

        let mut buses = HashSet::new();
        for master in &self.masters {
            master.validate()?;
            if !buses.insert(master.bus.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate bus identifier '{}' across master definitions",
                    master.bus
                )));
            }
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
            if !addresses.insert((device.ethercat_bus.as_str(), device.ethercat_address)) {
                return Err(ConfigError::Validation(format!(
                    "device '{}': address {} is already used on bus '{}'",
                    device.name, device.ethercat_address, device.ethercat_bus
                )));
            }
        }
        Ok(())
    }

    fn resolve_device_configs(
        &mut self,
        setup_dir: &Path,
        home: Option<&Path>,
    ) -> Result<(), ConfigError> {
        for device in &mut self.devices {
            let resolved = expand_config_path(&device.configuration_file, setup_dir, home)
                .map_err(|_| ConfigError::HomeUnset {
                    device: device.name.clone(),
                    path: device.configuration_file.clone(),
                })?;
            // Existence is checked here, not at construction time, so the
            // whole document fails before any device object is built.
            if !resolved.is_file() {
                return Err(ConfigError::MissingDeviceConfig {
                    device: device.name.clone(),
                    path: resolved,
                });
            }
            device.configuration_file = resolved;
        }
        Ok(())
    }
}

/// Failure modes of [`expand_config_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandError {
    /// The path starts with `~` and no home directory is available.
    HomeUnset,
}

/// Apply the uniform configuration-file path resolution rule.
///
/// Absolute paths pass through. A leading `~` is replaced with `home`.
/// Anything else is joined onto `setup_dir`, the directory containing the
/// setup document.
pub fn expand_config_path(
    raw: &Path,
    setup_dir: &Path,
    home: Option<&Path>,
) -> Result<PathBuf, ExpandError> {
    if raw.is_absolute() {
        return Ok(raw.to_path_buf());
    }
    let text = raw.to_string_lossy();
    if let Some(rest) = text.strip_prefix('~') {
        let home = home.ok_or(ExpandError::HomeUnset)?;
        return Ok(home.join(rest.trim_start_matches('/')));
    }
    Ok(setup_dir.join(raw))
}
