//! Device implementations, selectable per build.
//!
//! Each device type sits behind its own cargo feature so deployments only
//! carry the support they need. The registry reports a type whose feature
//! is disabled as "support not built in", distinct from an unknown type.

#[cfg(feature = "force-sensor")]
pub mod force_sensor;
#[cfg(feature = "joint-drive")]
pub mod joint_drive;
#[cfg(feature = "servo-drive")]
pub mod servo_drive;
