//! Six-axis force/torque sensor.
//!
//! Read-only device: reading snapshots and inline reading handlers, no
//! commands. The simulated wrench is a deterministic low-amplitude signal
//! run through the sensor's configured low-pass filter, with an optional
//! tare captured at startup.

use ecat_common::config::{ConfigError, DeviceType};
use ecat_common::device::{
    CycleContext, Device, DeviceError, Reading, ReadingEvents, ReadingHandler, ReadingSource,
};
use serde::Deserialize;
use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Static offset on the force z-axis before taring [N], the weight of the
/// sensor's own mounting plate.
const MOUNT_OFFSET_FZ: f64 = 3.2;

/// Amplitude of the simulated excitation [N].
const EXCITATION_FORCE: f64 = 0.8;

/// Frequency of the simulated excitation [Hz].
const EXCITATION_HZ: f64 = 0.5;

/// Configuration sub-format for force/torque sensors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForceSensorConfig {
    /// Scale from raw force counts to N.
    pub force_scale: f64,

    /// Scale from raw torque counts to Nm.
    pub torque_scale: f64,

    /// Low-pass cutoff applied to the wrench [Hz].
    pub filter_cutoff_hz: f64,

    /// Capture a tare at startup and subtract it from every reading.
    #[serde(default)]
    pub zero_on_startup: bool,
}

impl ForceSensorConfig {
    /// Load and validate a force-sensor configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_path_buf()))?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.force_scale <= 0.0 || self.torque_scale <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: force_scale and torque_scale must be positive",
                path.display()
            )));
        }
        if self.filter_cutoff_hz <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: filter_cutoff_hz must be positive",
                path.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SensorShared {
    force: [f64; 3],
    torque: [f64; 3],
    bias_fz: f64,
}

/// A force/torque sensor bound to one bus address.
pub struct ForceSensor {
    name: String,
    address: u32,
    config: ForceSensorConfig,
    shared: Mutex<SensorShared>,
    handlers: Mutex<Vec<ReadingHandler>>,
}

impl ForceSensor {
    /// Construct from an already-validated configuration.
    pub fn new(name: &str, address: u32, config: ForceSensorConfig) -> Self {
        Self {
            name: name.to_string(),
            address,
            config,
            shared: Mutex::new(SensorShared::default()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Construct from a configuration file.
    pub fn from_config_file(name: &str, address: u32, path: &Path) -> Result<Self, ConfigError> {
        let config = ForceSensorConfig::from_file(path)?;
        Ok(Self::new(name, address, config))
    }

    fn snapshot(shared: &SensorShared) -> Reading {
        Reading::Wrench {
            force: [
                shared.force[0],
                shared.force[1],
                shared.force[2] - shared.bias_fz,
            ],
            torque: shared.torque,
        }
    }
}

impl Device for ForceSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u32 {
        self.address
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::ForceSensor
    }

    fn startup(&self) -> Result<(), DeviceError> {
        if self.config.zero_on_startup {
            let mut shared = self.shared.lock().expect("force sensor state lock poisoned");
            shared.bias_fz = MOUNT_OFFSET_FZ * self.config.force_scale;
            debug!(device = %self.name, bias = shared.bias_fz, "force sensor tared");
        }
        Ok(())
    }

    fn update_cycle(&self, ctx: CycleContext) -> Result<(), DeviceError> {
        let reading = {
            let mut s = self.shared.lock().expect("force sensor state lock poisoned");
            let dt = ctx.period.as_secs_f64();
            let t = ctx.cycle as f64 * dt;

            // Raw channels: static mount offset plus a slow excitation.
            let raw_fz = (MOUNT_OFFSET_FZ + EXCITATION_FORCE * (TAU * EXCITATION_HZ * t).sin())
                * self.config.force_scale;
            let raw_tx =
                0.1 * EXCITATION_FORCE * (TAU * EXCITATION_HZ * t).cos() * self.config.torque_scale;

            // Single-pole low-pass at the configured cutoff.
            let rc = 1.0 / (TAU * self.config.filter_cutoff_hz);
            let alpha = dt / (dt + rc);
            s.force[2] += alpha * (raw_fz - s.force[2]);
            s.torque[0] += alpha * (raw_tx - s.torque[0]);

            Self::snapshot(&s)
        };

        let handlers = self.handlers.lock().expect("force sensor handler lock poisoned");
        for handler in handlers.iter() {
            handler(&self.name, &reading);
        }
        Ok(())
    }

    fn begin_safe_stop(&self) {
        // Passive device; nothing to quiesce.
    }

    fn is_quiescent(&self) -> bool {
        true
    }

    fn as_reading_source(&self) -> Option<&dyn ReadingSource> {
        Some(self)
    }

    fn as_reading_events(&self) -> Option<&dyn ReadingEvents> {
        Some(self)
    }
}

impl ReadingSource for ForceSensor {
    fn reading(&self) -> Reading {
        let shared = self.shared.lock().expect("force sensor state lock poisoned");
        Self::snapshot(&shared)
    }
}

impl ReadingEvents for ForceSensor {
    fn add_reading_handler(&self, handler: ReadingHandler) {
        self.handlers
            .lock()
            .expect("force sensor handler lock poisoned")
            .push(handler);
    }
}
