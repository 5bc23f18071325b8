//! Shared timing and scheduling constants.

use std::time::Duration;

/// SCHED_FIFO priority for cyclic update threads.
///
/// Cycle threads must not outrank the kernel threads that service the
/// network interface, otherwise the link itself is starved. 48 is the
/// highest value that keeps those ahead of us.
pub const RT_CYCLE_PRIORITY: i32 = 48;

/// Poll interval while waiting for a bus to become communication-ready.
pub const READY_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Poll interval while waiting for devices to quiesce during pre-shutdown.
pub const QUIESCE_POLL_INTERVAL: Duration = Duration::from_millis(1);
