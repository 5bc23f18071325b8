//! RT setup for cycle threads.
//!
//! With the `rt` feature the promotion sequence locks all current and
//! future memory pages and switches the calling thread to SCHED_FIFO at
//! the requested priority. Without it every call is a no-op so the same
//! orchestrator code runs on development hosts.

use thiserror::Error;

/// Error type for RT promotion.
#[derive(Debug, Clone, Error)]
pub enum RtError {
    /// `mlockall` failed.
    #[error("mlockall failed: {0}")]
    LockMemory(String),

    /// The scheduler switch failed, usually for lack of privileges.
    #[error("sched_setscheduler(SCHED_FIFO, {priority}) failed: {reason}")]
    Scheduler {
        /// Requested priority.
        priority: i32,
        /// OS error detail.
        reason: String,
    },
}

/// Promote the calling thread for cyclic real-time work.
///
/// 1. Lock all memory pages (no page faults in the cycle loop).
/// 2. Switch to SCHED_FIFO at `priority`.
#[cfg(feature = "rt")]
pub fn promote_cycle_thread(priority: i32) -> Result<(), RtError> {
    use nix::sys::mman::{MlockallFlags, mlockall};

    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RtError::LockMemory(e.to_string()))?;

    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        return Err(RtError::Scheduler {
            priority,
            reason: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

/// No-op without the `rt` feature; development hosts run the cycle
/// threads at normal priority.
#[cfg(not(feature = "rt"))]
pub fn promote_cycle_thread(_priority: i32) -> Result<(), RtError> {
    Ok(())
}
