//! Servo drive with a fixed PDO layout.
//!
//! Supports staged commands and reading snapshots; no reading handlers.
//! The drive-state request mechanism mirrors the joint drive but completes
//! within a single cyclic pass, which is how these drives behave on the
//! wire.

use ecat_common::config::{ConfigError, DeviceType};
use ecat_common::device::{
    Command, CommandMode, CommandSink, CycleContext, Device, DeviceError, DriveState, Reading,
    ReadingSource,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Per-cycle first-order tracking gain toward a commanded velocity.
const VELOCITY_TRACKING_GAIN: f64 = 0.3;

/// Proportional gain turning a position error into a velocity request.
const POSITION_GAIN: f64 = 4.0;

/// Per-cycle velocity decay factor while safe-stopping.
const SAFE_STOP_DECAY: f64 = 0.5;

/// Velocity magnitude below which the drive counts as standing still.
const QUIESCENT_VELOCITY: f64 = 1e-4;

/// Configuration sub-format for servo drives.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServoDriveConfig {
    /// Continuous current rating [A].
    pub rated_current_a: f64,

    /// Peak current limit [A].
    pub max_current_a: f64,

    /// Velocity limit [rad/s].
    pub velocity_limit: f64,

    /// Invert the commanded direction.
    #[serde(default)]
    pub invert_direction: bool,
}

impl ServoDriveConfig {
    /// Load and validate a servo-drive configuration file.
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
        if self.rated_current_a <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: rated_current_a must be positive",
                path.display()
            )));
        }
        if self.max_current_a < self.rated_current_a {
            return Err(ConfigError::Validation(format!(
                "{}: max_current_a must be at least rated_current_a",
                path.display()
            )));
        }
        if self.velocity_limit <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: velocity_limit must be positive",
                path.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ServoShared {
    state: DriveState,
    position: f64,
    velocity: f64,
    staged: Option<Command>,
    pending_state: Option<DriveState>,
    last_change_ok: bool,
    safe_stopping: bool,
}

/// A servo drive bound to one bus address.
pub struct ServoDrive {
    name: String,
    address: u32,
    config: ServoDriveConfig,
    shared: Mutex<ServoShared>,
}

impl ServoDrive {
    /// Construct from an already-validated configuration.
    pub fn new(name: &str, address: u32, config: ServoDriveConfig) -> Self {
        Self {
            name: name.to_string(),
            address,
            config,
            shared: Mutex::new(ServoShared::default()),
        }
    }

    /// Construct from a configuration file.
    pub fn from_config_file(name: &str, address: u32, path: &Path) -> Result<Self, ConfigError> {
        let config = ServoDriveConfig::from_file(path)?;
        Ok(Self::new(name, address, config))
    }

    fn snapshot(&self, shared: &ServoShared) -> Reading {
        // Torque estimate from the current draw implied by the velocity.
        let torque = shared.velocity / self.config.velocity_limit * self.config.rated_current_a;
        Reading::Joint {
            position: shared.position,
            velocity: shared.velocity,
            torque,
            state: shared.state,
        }
    }
}

impl Device for ServoDrive {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u32 {
        self.address
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::ServoDrive
    }

    fn startup(&self) -> Result<(), DeviceError> {
        let mut shared = self.shared.lock().expect("servo drive state lock poisoned");
        shared.state = DriveState::Ready;
        shared.last_change_ok = true;
        debug!(device = %self.name, "servo drive setup complete");
        Ok(())
    }

    fn update_cycle(&self, ctx: CycleContext) -> Result<(), DeviceError> {
        let mut s = self.shared.lock().expect("servo drive state lock poisoned");
        let dt = ctx.period.as_secs_f64();

        if s.safe_stopping {
            s.velocity *= SAFE_STOP_DECAY;
            if s.velocity.abs() < QUIESCENT_VELOCITY {
                s.velocity = 0.0;
                if s.state == DriveState::OperationEnabled {
                    s.state = DriveState::Ready;
                }
            }
            s.position += s.velocity * dt;
            return Ok(());
        }

        if let Some(target) = s.pending_state.take() {
            s.state = target;
            s.last_change_ok = true;
        }

        if s.state == DriveState::OperationEnabled {
            if let Some(cmd) = s.staged {
                let sign = if self.config.invert_direction { -1.0 } else { 1.0 };
                let requested = match cmd.mode {
                    CommandMode::Velocity => cmd.target * sign,
                    CommandMode::Position => (cmd.target * sign - s.position) * POSITION_GAIN,
                    CommandMode::Torque => {
                        // Torque maps onto a current-limited velocity step.
                        s.velocity + cmd.target * sign * dt
                    }
                };
                let limit = self.config.velocity_limit;
                let target = requested.clamp(-limit, limit);
                s.velocity += (target - s.velocity) * VELOCITY_TRACKING_GAIN;
            }
            s.position += s.velocity * dt;
        }
        Ok(())
    }

    fn begin_safe_stop(&self) {
        let mut shared = self.shared.lock().expect("servo drive state lock poisoned");
        shared.staged = None;
        shared.pending_state = None;
        shared.safe_stopping = true;
    }

    fn is_quiescent(&self) -> bool {
        let shared = self.shared.lock().expect("servo drive state lock poisoned");
        shared.state != DriveState::OperationEnabled && shared.velocity == 0.0
    }

    fn as_command_sink(&self) -> Option<&dyn CommandSink> {
        Some(self)
    }

    fn as_reading_source(&self) -> Option<&dyn ReadingSource> {
        Some(self)
    }
}

impl CommandSink for ServoDrive {
    fn stage_command(&self, command: Command) -> Result<(), DeviceError> {
        if !command.target.is_finite() {
            return Err(DeviceError::CommandRejected {
                device: self.name.clone(),
                reason: "target is not finite".to_string(),
            });
        }
        let mut shared = self.shared.lock().expect("servo drive state lock poisoned");
        if shared.safe_stopping {
            return Err(DeviceError::CommandRejected {
                device: self.name.clone(),
                reason: "safe stop in progress".to_string(),
            });
        }
        shared.staged = Some(command);
        Ok(())
    }

    fn request_drive_state(&self, target: DriveState) -> Result<(), DeviceError> {
        if !matches!(target, DriveState::Ready | DriveState::OperationEnabled) {
            return Err(DeviceError::CommandRejected {
                device: self.name.clone(),
                reason: format!("cannot request drive state {target}"),
            });
        }
        let mut shared = self.shared.lock().expect("servo drive state lock poisoned");
        if shared.state == DriveState::NotReady {
            return Err(DeviceError::CommandRejected {
                device: self.name.clone(),
                reason: "drive not initialized".to_string(),
            });
        }
        if shared.safe_stopping {
            return Err(DeviceError::CommandRejected {
                device: self.name.clone(),
                reason: "safe stop in progress".to_string(),
            });
        }
        shared.pending_state = Some(target);
        shared.last_change_ok = false;
        Ok(())
    }

    fn last_state_change_successful(&self) -> bool {
        self.shared
            .lock()
            .expect("servo drive state lock poisoned")
            .last_change_ok
    }

    fn drive_state(&self) -> DriveState {
        self.shared
            .lock()
            .expect("servo drive state lock poisoned")
            .state
    }
}

impl ReadingSource for ServoDrive {
    fn reading(&self) -> Reading {
        let shared = self.shared.lock().expect("servo drive state lock poisoned");
        self.snapshot(&shared)
    }
}
