//! Cyclic runtime orchestrator.
//!
//! Owns the device directory and one runtime slot per master: an abort
//! flag and, once activated, the dedicated thread driving that master's
//! cyclic update loop. All orchestration state lives in this context
//! object; nothing is process-global, and signal handlers only ever touch
//! the atomic flags handed out by [`Orchestrator::abort_handle`].
//!
//! # Ordering contract
//!
//! - `startup` before `activate`; a master whose startup failed is never
//!   activated.
//! - Each cycle thread observes its abort flag at iteration boundaries
//!   only, with no lock held between the flag check and the update call.
//! - `shutdown` runs in three strict phases: safe-stop every active
//!   master while its loop is still running, then stop and join every
//!   cycle thread, then tear down communication.

use crate::rt;
use ecat_bus::directory::DeviceDirectory;
use ecat_bus::master::{Master, MasterError, MasterState};
use ecat_bus::pacing::UpdateMode;
use ecat_common::consts::RT_CYCLE_PRIORITY;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{error, info, warn};

/// Error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A master failed to start under [`StartupPolicy::FailFast`].
    #[error("master '{bus}': startup failed: {source}")]
    Startup {
        /// Bus identifier of the failing master.
        bus: String,
        /// The underlying master error.
        source: MasterError,
    },

    /// No master completed startup, so there is nothing to run.
    #[error("no master completed startup")]
    NoMasterStarted,

    /// `activate` called before a successful `startup`.
    #[error("startup has not completed, cannot activate")]
    NotStarted,

    /// A cycle thread could not be spawned.
    #[error("cycle thread for bus '{bus}' could not be spawned: {reason}")]
    ThreadSpawn {
        /// Bus identifier.
        bus: String,
        /// OS error detail.
        reason: String,
    },
}

/// What a master startup failure means for the rest of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Any master's startup failure fails the whole orchestrator.
    FailFast,
    /// Failed masters are excluded; the rest keep running.
    ContinueDegraded,
}

/// What a failed cyclic update means for that master's loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleErrorPolicy {
    /// Log and keep looping; an I/O hiccup on one cycle is not terminal.
    KeepRunning,
    /// End that master's loop on the first update error.
    StopMaster,
}

/// Per-deployment runtime options.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Timing discipline for every cycle loop.
    pub update_mode: UpdateMode,
    /// Startup failure policy.
    pub startup_policy: StartupPolicy,
    /// Cyclic update failure policy.
    pub cycle_error_policy: CycleErrorPolicy,
    /// SCHED_FIFO priority for cycle threads; `None` skips promotion.
    pub rt_priority: Option<i32>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::EnforceRate,
            startup_policy: StartupPolicy::FailFast,
            cycle_error_policy: CycleErrorPolicy::KeepRunning,
            rt_priority: Some(RT_CYCLE_PRIORITY),
        }
    }
}

/// Summary of one master's finished cycle loop.
#[derive(Debug)]
pub struct CycleReport {
    /// Bus identifier.
    pub bus: String,
    /// Updates performed.
    pub cycles: u64,
    /// Updates that reported an error.
    pub update_errors: u64,
    /// How the loop ended: `Ok` for a clean abort, the terminal error
    /// otherwise (activation failure or [`CycleErrorPolicy::StopMaster`]).
    pub outcome: Result<(), MasterError>,
}

struct MasterRuntime {
    master: Arc<Master>,
    abort: Arc<AtomicBool>,
    handle: Option<JoinHandle<CycleReport>>,
    started: bool,
}

/// Drives every master through startup, activation, cycling and shutdown.
pub struct Orchestrator {
    directory: Arc<DeviceDirectory>,
    runtimes: Vec<MasterRuntime>,
    options: RuntimeOptions,
    startup_abort: Arc<AtomicBool>,
    started: bool,
}

impl Orchestrator {
    /// Take ownership of a built directory.
    pub fn new(directory: DeviceDirectory, options: RuntimeOptions) -> Self {
        let directory = Arc::new(directory);
        let runtimes = directory
            .masters()
            .into_iter()
            .map(|master| MasterRuntime {
                master,
                abort: Arc::new(AtomicBool::new(false)),
                handle: None,
                started: false,
            })
            .collect();
        Self {
            directory,
            runtimes,
            options,
            startup_abort: Arc::new(AtomicBool::new(false)),
            started: false,
        }
    }

    /// Shared handle to the directory, for interaction threads.
    pub fn directory(&self) -> Arc<DeviceDirectory> {
        Arc::clone(&self.directory)
    }

    /// Flag that aborts a blocking startup wait. Safe to set from a
    /// signal handler.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.startup_abort)
    }

    /// Start every master per the configured [`StartupPolicy`].
    pub fn startup(&mut self) -> Result<(), OrchestratorError> {
        for runtime in &mut self.runtimes {
            let bus = runtime.master.bus_name().to_string();
            match runtime.master.startup(&self.startup_abort) {
                Ok(()) => runtime.started = true,
                Err(e) => match self.options.startup_policy {
                    StartupPolicy::FailFast => {
                        error!(bus = %bus, error = %e, "master startup failed, aborting");
                        return Err(OrchestratorError::Startup { bus, source: e });
                    }
                    StartupPolicy::ContinueDegraded => {
                        warn!(bus = %bus, error = %e, "master excluded from activation");
                    }
                },
            }
        }
        if !self.runtimes.iter().any(|r| r.started) {
            return Err(OrchestratorError::NoMasterStarted);
        }
        self.started = true;
        Ok(())
    }

    /// Spawn one cycle thread per started master. Each thread activates
    /// its master and then runs the update loop until aborted.
    pub fn activate(&mut self) -> Result<(), OrchestratorError> {
        if !self.started {
            return Err(OrchestratorError::NotStarted);
        }
        let mode = self.options.update_mode;
        let policy = self.options.cycle_error_policy;
        let priority = self.options.rt_priority;

        for runtime in self.runtimes.iter_mut().filter(|r| r.started) {
            let master = Arc::clone(&runtime.master);
            let abort = Arc::clone(&runtime.abort);
            let bus = master.bus_name().to_string();
            let handle = std::thread::Builder::new()
                .name(format!("ecat-cycle-{bus}"))
                .spawn(move || cycle_loop(master, abort, mode, policy, priority))
                .map_err(|e| OrchestratorError::ThreadSpawn {
                    bus,
                    reason: e.to_string(),
                })?;
            runtime.handle = Some(handle);
        }
        Ok(())
    }

    /// Run the full shutdown sequence and collect the loop reports.
    pub fn shutdown(&mut self) -> Vec<CycleReport> {
        // Phase 1: safe-stop every active master. Its cycle thread is
        // still looping and drives the devices to quiescence.
        for runtime in &self.runtimes {
            if runtime.master.state() == MasterState::Active {
                if let Err(e) = runtime.master.pre_shutdown() {
                    warn!(bus = %runtime.master.bus_name(), error = %e, "pre-shutdown failed");
                }
            }
        }

        // Phase 2: stop and join every cycle thread.
        let mut reports = Vec::new();
        for runtime in &mut self.runtimes {
            runtime.abort.store(true, Ordering::SeqCst);
            if let Some(handle) = runtime.handle.take() {
                match handle.join() {
                    Ok(report) => reports.push(report),
                    Err(_) => {
                        error!(bus = %runtime.master.bus_name(), "cycle thread panicked");
                    }
                }
            }
        }

        // Phase 3: tear down communication. Also covers masters that
        // never started or never activated.
        for runtime in &self.runtimes {
            if runtime.master.state() != MasterState::Shutdown {
                if let Err(e) = runtime.master.shutdown() {
                    warn!(bus = %runtime.master.bus_name(), error = %e, "shutdown failed");
                }
            }
        }
        info!("orchestrator shutdown complete");
        reports
    }
}

/// Body of one master's dedicated cycle thread.
fn cycle_loop(
    master: Arc<Master>,
    abort: Arc<AtomicBool>,
    mode: UpdateMode,
    policy: CycleErrorPolicy,
    priority: Option<i32>,
) -> CycleReport {
    let bus = master.bus_name().to_string();

    if let Some(priority) = priority {
        if let Err(e) = rt::promote_cycle_thread(priority) {
            warn!(bus = %bus, error = %e,
                "could not raise cycle thread priority, check privileges");
        }
    }

    if let Err(e) = master.activate() {
        error!(bus = %bus, error = %e, "activation failed, cyclic loop not entered");
        return CycleReport {
            bus,
            cycles: 0,
            update_errors: 0,
            outcome: Err(e),
        };
    }

    let mut update_errors: u64 = 0;
    let outcome = loop {
        if abort.load(Ordering::SeqCst) {
            break Ok(());
        }
        // No lock is held between the abort check above and this call.
        match master.update(mode) {
            Ok(()) => {}
            Err(e) => {
                update_errors += 1;
                match policy {
                    CycleErrorPolicy::KeepRunning => {
                        if update_errors <= 10 || update_errors % 1000 == 0 {
                            warn!(bus = %bus, error = %e, errors = update_errors,
                                "cyclic update failed, continuing");
                        }
                    }
                    CycleErrorPolicy::StopMaster => {
                        error!(bus = %bus, error = %e, "cyclic update failed, stopping loop");
                        break Err(e);
                    }
                }
            }
        }
    };

    CycleReport {
        bus,
        cycles: master.stats().cycles,
        update_errors,
        outcome,
    }
}
