//! Prelude module for common re-exports.
//!
//! ```rust
//! use ecat_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, DeviceEntry, DeviceType, MasterConfig, PdoVariant, SetupConfig,
};

// ─── Devices ────────────────────────────────────────────────────────
pub use crate::device::{
    Command, CommandMode, CommandSink, CycleContext, Device, DeviceError, DriveState, Reading,
    ReadingEvents, ReadingHandler, ReadingSource,
};

// ─── Link ───────────────────────────────────────────────────────────
pub use crate::link::{BusLink, ErrorCounters, LinkError};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{QUIESCE_POLL_INTERVAL, READY_POLL_INTERVAL, RT_CYCLE_PRIORITY};
