//! # ECAT Runtime Library
//!
//! The orchestration layer of the EtherCAT workspace: per-master cycle
//! threads with strict startup/activation/shutdown ordering, plus the RT
//! thread setup used by those threads.
//!
//! # Module Structure
//!
//! - [`orchestrator`] - Orchestrator context, policies, cycle threads
//! - [`rt`] - Memory locking and SCHED_FIFO promotion (feature `rt`)

pub mod orchestrator;
pub mod rt;

// Re-export key types for convenience
pub use crate::orchestrator::{
    CycleErrorPolicy, CycleReport, Orchestrator, OrchestratorError, RuntimeOptions, StartupPolicy,
};
