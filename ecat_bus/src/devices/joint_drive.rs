//! Integrated joint actuator.
//!
//! The most capable device type: staged commands, drive-state requests,
//! reading snapshots and inline reading handlers, plus a configurable PDO
//! layout (variants A-D). The process-data behavior is simulated: staged
//! commands are applied on the next cyclic pass and the joint state is
//! integrated at the owning master's period.

use ecat_common::config::{ConfigError, DeviceType, PdoVariant};
use ecat_common::device::{
    Command, CommandMode, CommandSink, CycleContext, Device, DeviceError, DriveState, Reading,
    ReadingEvents, ReadingHandler, ReadingSource,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Per-cycle first-order tracking gain toward a commanded velocity.
const VELOCITY_TRACKING_GAIN: f64 = 0.2;

/// Proportional gain turning a position error into a velocity request.
const POSITION_GAIN: f64 = 4.0;

/// Per-cycle velocity decay factor while safe-stopping.
const SAFE_STOP_DECAY: f64 = 0.5;

/// Velocity magnitude below which the joint counts as standing still.
const QUIESCENT_VELOCITY: f64 = 1e-4;

/// Viscous-friction coefficient for the torque estimate [Nm per rad/s].
const VISCOUS_FRICTION: f64 = 0.05;

fn default_state_change_cycles() -> u32 {
    3
}

/// Configuration sub-format for joint drives.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JointDriveConfig {
    /// Velocity limit at the joint [rad/s].
    pub max_joint_velocity: f64,

    /// Torque limit at the joint [Nm].
    pub max_joint_torque: f64,

    /// Gearbox ratio between motor and joint.
    pub gear_ratio: f64,

    /// Cyclic updates a staged drive-state request needs to complete.
    #[serde(default = "default_state_change_cycles")]
    pub state_change_cycles: u32,
}

impl JointDriveConfig {
    /// Load and validate a joint-drive configuration file.
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
        if self.max_joint_velocity <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: max_joint_velocity must be positive",
                path.display()
            )));
        }
        if self.max_joint_torque <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: max_joint_torque must be positive",
                path.display()
            )));
        }
        if self.gear_ratio <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{}: gear_ratio must be positive",
                path.display()
            )));
        }
        if self.state_change_cycles == 0 {
            return Err(ConfigError::Validation(format!(
                "{}: state_change_cycles must be at least 1",
                path.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct JointShared {
    state: DriveState,
    position: f64,
    velocity: f64,
    torque: f64,
    staged: Option<Command>,
    pending_state: Option<(DriveState, u32)>,
    last_change_ok: bool,
    safe_stopping: bool,
}

/// A joint drive bound to one bus address.
pub struct JointDrive {
    name: String,
    address: u32,
    pdo: PdoVariant,
    config: JointDriveConfig,
    shared: Mutex<JointShared>,
    handlers: Mutex<Vec<ReadingHandler>>,
}

impl JointDrive {
    /// Construct from an already-validated configuration.
    pub fn new(name: &str, address: u32, pdo: PdoVariant, config: JointDriveConfig) -> Self {
        Self {
            name: name.to_string(),
            address,
            pdo,
            config,
            shared: Mutex::new(JointShared::default()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Construct from a configuration file.
    pub fn from_config_file(
        name: &str,
        address: u32,
        pdo: PdoVariant,
        path: &Path,
    ) -> Result<Self, ConfigError> {
        let config = JointDriveConfig::from_file(path)?;
        Ok(Self::new(name, address, pdo, config))
    }

    /// The PDO layout this drive was configured with.
    pub fn pdo_variant(&self) -> PdoVariant {
        self.pdo
    }

    fn snapshot(shared: &JointShared) -> Reading {
        Reading::Joint {
            position: shared.position,
            velocity: shared.velocity,
            torque: shared.torque,
            state: shared.state,
        }
    }
}

impl Device for JointDrive {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u32 {
        self.address
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::JointDrive
    }

    fn startup(&self) -> Result<(), DeviceError> {
        let mut shared = self.shared.lock().expect("joint drive state lock poisoned");
        shared.state = DriveState::Ready;
        shared.last_change_ok = true;
        debug!(device = %self.name, pdo = %self.pdo, "joint drive setup complete");
        Ok(())
    }

    fn update_cycle(&self, ctx: CycleContext) -> Result<(), DeviceError> {
        let reading = {
            let mut s = self.shared.lock().expect("joint drive state lock poisoned");
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
                s.torque = 0.0;
            } else {
                if let Some((target, cycles_left)) = s.pending_state.take() {
                    if cycles_left > 1 {
                        s.pending_state = Some((target, cycles_left - 1));
                    } else {
                        s.state = target;
                        s.last_change_ok = true;
                        debug!(device = %self.name, state = %target, "drive state reached");
                    }
                }

                if s.state == DriveState::OperationEnabled {
                    let limit = self.config.max_joint_velocity;
                    if let Some(cmd) = s.staged {
                        let requested = match cmd.mode {
                            CommandMode::Velocity => cmd.target,
                            CommandMode::Position => (cmd.target - s.position) * POSITION_GAIN,
                            CommandMode::Torque => {
                                s.torque =
                                    cmd.target
                                        .clamp(-self.config.max_joint_torque, self.config.max_joint_torque);
                                s.velocity + s.torque * dt / self.config.gear_ratio
                            }
                        };
                        let target = requested.clamp(-limit, limit);
                        s.velocity += (target - s.velocity) * VELOCITY_TRACKING_GAIN;
                        if cmd.mode != CommandMode::Torque {
                            s.torque = s.velocity * VISCOUS_FRICTION * self.config.gear_ratio;
                        }
                    }
                    s.position += s.velocity * dt;
                }
            }

            Self::snapshot(&s)
        };

        // Handlers run outside the state lock; they may read the device but
        // must not register further handlers from inside a handler.
        let handlers = self.handlers.lock().expect("joint drive handler lock poisoned");
        for handler in handlers.iter() {
            handler(&self.name, &reading);
        }
        Ok(())
    }

    fn begin_safe_stop(&self) {
        let mut shared = self.shared.lock().expect("joint drive state lock poisoned");
        shared.staged = None;
        shared.pending_state = None;
        shared.safe_stopping = true;
    }

    fn is_quiescent(&self) -> bool {
        let shared = self.shared.lock().expect("joint drive state lock poisoned");
        shared.state != DriveState::OperationEnabled
            && shared.velocity == 0.0
            && shared.pending_state.is_none()
    }

    fn as_command_sink(&self) -> Option<&dyn CommandSink> {
        Some(self)
    }

    fn as_reading_source(&self) -> Option<&dyn ReadingSource> {
        Some(self)
    }

    fn as_reading_events(&self) -> Option<&dyn ReadingEvents> {
        Some(self)
    }
}

impl CommandSink for JointDrive {
    fn stage_command(&self, command: Command) -> Result<(), DeviceError> {
        if !command.target.is_finite() {
            return Err(DeviceError::CommandRejected {
                device: self.name.clone(),
                reason: "target is not finite".to_string(),
            });
        }
        let mut shared = self.shared.lock().expect("joint drive state lock poisoned");
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
        let mut shared = self.shared.lock().expect("joint drive state lock poisoned");
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
        shared.pending_state = Some((target, self.config.state_change_cycles));
        shared.last_change_ok = false;
        Ok(())
    }

    fn last_state_change_successful(&self) -> bool {
        self.shared
            .lock()
            .expect("joint drive state lock poisoned")
            .last_change_ok
    }

    fn drive_state(&self) -> DriveState {
        self.shared
            .lock()
            .expect("joint drive state lock poisoned")
            .state
    }
}

impl ReadingSource for JointDrive {
    fn reading(&self) -> Reading {
        let shared = self.shared.lock().expect("joint drive state lock poisoned");
        Self::snapshot(&shared)
    }
}

impl ReadingEvents for JointDrive {
    fn add_reading_handler(&self, handler: ReadingHandler) {
        self.handlers
            .lock()
            .expect("joint drive handler lock poisoned")
            .push(handler);
    }
}
