//! Device handle trait and capability traits.
//!
//! A constructed device is held as `Arc<dyn Device>`. What a device can do
//! beyond the base lifecycle varies by concrete type and is queried through
//! the capability accessors, never assumed:
//!
//! - [`CommandSink`] - staged commands and drive-state requests
//! - [`ReadingSource`] - consistent reading snapshots
//! - [`ReadingEvents`] - reading handlers invoked inline during the cycle
//!
//! # Concurrency
//!
//! Devices are read and written from both the cyclic thread and external
//! interaction threads. Every capability implementation must guarantee
//! at-most-one-writer-per-field and consistent read snapshots; in practice
//! that means short critical sections around the staged command and the
//! reading, held for a copy and nothing else.

use crate::config::DeviceType;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type for device operations.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// Service-level setup failed during master startup.
    #[error("device '{device}': setup failed: {reason}")]
    SetupFailed {
        /// Device name.
        device: String,
        /// Failure detail.
        reason: String,
    },

    /// A staged command or state request was rejected.
    #[error("device '{device}': command rejected: {reason}")]
    CommandRejected {
        /// Device name.
        device: String,
        /// Rejection detail.
        reason: String,
    },

    /// The device faulted during a cyclic pass.
    #[error("device '{device}': cyclic exchange fault: {reason}")]
    CycleFault {
        /// Device name.
        device: String,
        /// Fault detail.
        reason: String,
    },
}

/// One cyclic tick as seen by a device.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    /// Cycle counter of the owning master, starting at 1 for the first
    /// update after activation.
    pub cycle: u64,
    /// Configured cyclic period of the owning master.
    pub period: Duration,
}

/// Drive power-stage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveState {
    /// Power stage not yet initialized.
    #[default]
    NotReady,
    /// Initialized, safe, not producing torque.
    Ready,
    /// Producing torque, executing staged commands.
    OperationEnabled,
    /// Latched fault; requires external intervention (not modeled further).
    Fault,
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriveState::NotReady => "NotReady",
            DriveState::Ready => "Ready",
            DriveState::OperationEnabled => "OperationEnabled",
            DriveState::Fault => "Fault",
        };
        f.write_str(s)
    }
}

/// Command mode for staged drive commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// Target is a velocity in rad/s.
    Velocity,
    /// Target is a position in rad.
    Position,
    /// Target is a torque in Nm.
    Torque,
}

/// A command staged toward a drive, applied on its next cyclic update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    /// Interpretation of `target`.
    pub mode: CommandMode,
    /// Commanded value.
    pub target: f64,
}

impl Command {
    /// Convenience constructor for a velocity command.
    pub fn velocity(target: f64) -> Self {
        Self {
            mode: CommandMode::Velocity,
            target,
        }
    }
}

/// Snapshot of a device's latest cyclic reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Drive-side reading.
    Joint {
        /// Joint position [rad].
        position: f64,
        /// Joint velocity [rad/s].
        velocity: f64,
        /// Estimated joint torque [Nm].
        torque: f64,
        /// Power-stage state at sample time.
        state: DriveState,
    },
    /// Force/torque sensor reading.
    Wrench {
        /// Force vector [N].
        force: [f64; 3],
        /// Torque vector [Nm].
        torque: [f64; 3],
    },
}

impl Reading {
    /// Joint velocity, when this is a joint reading.
    pub fn joint_velocity(&self) -> Option<f64> {
        match self {
            Reading::Joint { velocity, .. } => Some(*velocity),
            Reading::Wrench { .. } => None,
        }
    }

    /// Drive state, when this is a joint reading.
    pub fn drive_state(&self) -> Option<DriveState> {
        match self {
            Reading::Joint { state, .. } => Some(*state),
            Reading::Wrench { .. } => None,
        }
    }
}

/// Handler invoked with `(device name, reading)` after each cyclic pass.
///
/// Handlers run inline on the cyclic thread. They must not block, sleep or
/// allocate unboundedly; a slow handler shows up directly as a late cycle
/// and, on a real bus, as slave watchdog trips.
pub type ReadingHandler = Arc<dyn Fn(&str, &Reading) + Send + Sync>;

/// Staged-command capability.
pub trait CommandSink: Send + Sync {
    /// Stage a command; the cyclic thread applies it on the next update.
    /// Staging replaces any previously staged, not-yet-applied command.
    fn stage_command(&self, command: Command) -> Result<(), DeviceError>;

    /// Request a drive-state transition. Non-blocking: the transition
    /// completes over subsequent cyclic updates.
    fn request_drive_state(&self, target: DriveState) -> Result<(), DeviceError>;

    /// Whether the most recent state request has completed successfully.
    fn last_state_change_successful(&self) -> bool;

    /// Current power-stage state.
    fn drive_state(&self) -> DriveState;
}

/// Reading-snapshot capability.
pub trait ReadingSource: Send + Sync {
    /// The latest consistent reading snapshot.
    fn reading(&self) -> Reading;
}

/// Inline reading-handler capability.
pub trait ReadingEvents: Send + Sync {
    /// Register a handler. Handlers are normally registered before the
    /// master is activated; see [`ReadingHandler`] for the blocking rules.
    fn add_reading_handler(&self, handler: ReadingHandler);
}

/// A constructed field device attached to one bus.
///
/// # Lifecycle
///
/// 1. `startup()` - service-level setup, once, while the bus is safe-op
/// 2. `update_cycle()` - every cyclic update of the owning master
/// 3. `begin_safe_stop()` / `is_quiescent()` - pre-shutdown quiescing,
///    driven to completion by further `update_cycle()` calls
///
/// `update_cycle` runs on the cyclic thread and must be deterministic:
/// no blocking calls, no unbounded allocation.
pub trait Device: Send + Sync {
    /// Logical device name from the setup document.
    fn name(&self) -> &str;

    /// Station address on the owning bus.
    fn address(&self) -> u32;

    /// The type tag this device was constructed from.
    fn device_type(&self) -> DeviceType;

    /// Service-level setup, called during the owning master's startup.
    fn startup(&self) -> Result<(), DeviceError>;

    /// One process-data pass at the owning master's cadence.
    fn update_cycle(&self, ctx: CycleContext) -> Result<(), DeviceError>;

    /// Begin the safe-stop sequence. Cyclic updates must keep running
    /// until [`is_quiescent`](Self::is_quiescent) reports true.
    fn begin_safe_stop(&self);

    /// Whether the device has reached a safe, passive state.
    fn is_quiescent(&self) -> bool;

    /// Staged-command capability, if this type supports it.
    fn as_command_sink(&self) -> Option<&dyn CommandSink> {
        None
    }

    /// Reading-snapshot capability, if this type supports it.
    fn as_reading_source(&self) -> Option<&dyn ReadingSource> {
        None
    }

    /// Reading-handler capability, if this type supports it.
    fn as_reading_events(&self) -> Option<&dyn ReadingEvents> {
        None
    }
}

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("address", &self.address())
            .field("device_type", &self.device_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_accessors() {
        let joint = Reading::Joint {
            position: 1.0,
            velocity: 2.0,
            torque: 0.5,
            state: DriveState::OperationEnabled,
        };
        assert_eq!(joint.joint_velocity(), Some(2.0));
        assert_eq!(joint.drive_state(), Some(DriveState::OperationEnabled));

        let wrench = Reading::Wrench {
            force: [0.0; 3],
            torque: [0.0; 3],
        };
        assert_eq!(wrench.joint_velocity(), None);
        assert_eq!(wrench.drive_state(), None);
    }

    #[test]
    fn device_error_display_names_device() {
        let err = DeviceError::CommandRejected {
            device: "drive1".to_string(),
            reason: "target is NaN".to_string(),
        };
        assert!(err.to_string().contains("drive1"));
        assert!(err.to_string().contains("NaN"));
    }
}
