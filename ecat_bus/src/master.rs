//! Bus master: lifecycle state machine and cyclic update engine.
//!
//! One `Master` drives exactly one bus through
//! `Created -> Started -> Active -> PreShutdown -> Shutdown`. Transitions
//! are monotonic; there is no path back from `Shutdown` and any call on a
//! shut-down master is a usage error.
//!
//! The cyclic `update` is meant to be driven from one dedicated thread at
//! the configured period, while `startup` / `pre_shutdown` / `shutdown`
//! are issued from a control thread. State, link, device list and timing
//! each sit behind their own short-lived lock so no lock is ever held
//! across a sleep that another thread waits on.

use crate::pacing::{DeadlineClock, UpdateMode};
use ecat_common::config::MasterConfig;
use ecat_common::consts::QUIESCE_POLL_INTERVAL;
use ecat_common::device::{CycleContext, Device, DeviceError};
use ecat_common::link::{BusLink, ErrorCounters, LinkError};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cycles between bus-diagnosis samples of the link error counters.
const DIAG_SAMPLE_CYCLES: u64 = 1_000;

/// An inter-update gap beyond `period * 3 / 2` counts as overdue.
const OVERDUE_NUM: u32 = 3;
const OVERDUE_DEN: u32 = 2;

/// Master lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    /// Configuration loaded, nothing started.
    Created,
    /// Bus open and communication-ready; service-level access available.
    Started,
    /// Cyclic process-data exchange running.
    Active,
    /// Safe-stop signalled; cyclic exchange still running.
    PreShutdown,
    /// Terminal. No further communication.
    Shutdown,
}

impl fmt::Display for MasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MasterState::Created => "Created",
            MasterState::Started => "Started",
            MasterState::Active => "Active",
            MasterState::PreShutdown => "PreShutdown",
            MasterState::Shutdown => "Shutdown",
        };
        f.write_str(s)
    }
}

/// Error type for master operations.
#[derive(Debug, Error)]
pub enum MasterError {
    /// The requested lifecycle transition is not legal from the current
    /// state.
    #[error("bus '{bus}': invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Bus identifier.
        bus: String,
        /// State the master is in.
        from: MasterState,
        /// State the caller asked for.
        to: MasterState,
    },

    /// Operation on a master that has already been shut down.
    #[error("bus '{bus}': '{operation}' called on a shut-down master")]
    UsedAfterShutdown {
        /// Bus identifier.
        bus: String,
        /// The offending operation.
        operation: &'static str,
    },

    /// `update` outside the Active / PreShutdown states.
    #[error("bus '{bus}': update requires an activated master (currently {state})")]
    NotCyclic {
        /// Bus identifier.
        bus: String,
        /// State the master is in.
        state: MasterState,
    },

    /// `shutdown` while the cyclic exchange is still running.
    #[error("bus '{bus}': shutdown while Active; stop the cyclic loop via pre_shutdown first")]
    ShutdownWhileActive {
        /// Bus identifier.
        bus: String,
    },

    /// Device attached after the master left the Created state.
    #[error("bus '{bus}': cannot attach device '{device}' after startup")]
    AttachAfterStartup {
        /// Bus identifier.
        bus: String,
        /// Device that was being attached.
        device: String,
    },

    /// Startup was aborted via the caller's abort flag.
    #[error("bus '{bus}': startup aborted")]
    StartupAborted {
        /// Bus identifier.
        bus: String,
    },

    /// A device's service-level setup failed during startup.
    #[error("bus '{bus}': device setup failed: {source}")]
    DeviceSetup {
        /// Bus identifier.
        bus: String,
        /// The device failure.
        source: DeviceError,
    },

    /// A device faulted during the cyclic pass.
    #[error("bus '{bus}': {source}")]
    DeviceCycle {
        /// Bus identifier.
        bus: String,
        /// The device failure.
        source: DeviceError,
    },

    /// The link layer failed.
    #[error("bus '{bus}': {source}")]
    Link {
        /// Bus identifier.
        bus: String,
        /// The underlying link failure.
        source: LinkError,
    },

    /// The pacing clock could not be created.
    #[error("bus '{bus}': pacing clock unavailable: {reason}")]
    Clock {
        /// Bus identifier.
        bus: String,
        /// Failure detail.
        reason: String,
    },
}

/// Cyclic update statistics, sampled via [`Master::stats`].
#[derive(Debug, Clone, Default)]
pub struct UpdateStats {
    /// Updates performed since activation.
    pub cycles: u64,
    /// Updates whose inter-update gap was overdue.
    pub late_cycles: u64,
    /// Failed link exchanges.
    pub exchange_errors: u64,
    /// Device faults during cyclic passes.
    pub device_errors: u64,
    /// Times the rate grid had to be re-anchored after a stall.
    pub grid_reanchors: u64,
    /// Largest observed inter-update gap.
    pub max_gap: Duration,
    consecutive_late: u32,
    last_entry: Option<Instant>,
}

/// One live communication master bound to exactly one bus.
pub struct Master {
    config: MasterConfig,
    period: Duration,
    link: Mutex<Box<dyn BusLink>>,
    devices: Mutex<Vec<Arc<dyn Device>>>,
    state: Mutex<MasterState>,
    clock: Mutex<Option<DeadlineClock>>,
    stats: Mutex<UpdateStats>,
}

impl Master {
    /// Create a master in the Created state, bound to the given link.
    pub fn new(config: MasterConfig, link: Box<dyn BusLink>) -> Self {
        let period = config.cyclic_period();
        Self {
            config,
            period,
            link: Mutex::new(link),
            devices: Mutex::new(Vec::new()),
            state: Mutex::new(MasterState::Created),
            clock: Mutex::new(None),
            stats: Mutex::new(UpdateStats::default()),
        }
    }

    /// The bus identifier this master drives.
    pub fn bus_name(&self) -> &str {
        &self.config.bus
    }

    /// The master's configuration.
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MasterState {
        *self.state.lock().expect("master state lock poisoned")
    }

    /// Snapshot of the attached devices.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices
            .lock()
            .expect("master device lock poisoned")
            .clone()
    }

    /// Snapshot of the cyclic update statistics.
    pub fn stats(&self) -> UpdateStats {
        self.stats.lock().expect("master stats lock poisoned").clone()
    }

    /// Current link error counters.
    pub fn error_counters(&self) -> ErrorCounters {
        self.link
            .lock()
            .expect("master link lock poisoned")
            .error_counters()
    }

    /// Attach a device. Only legal before startup.
    pub fn attach(&self, device: Arc<dyn Device>) -> Result<(), MasterError> {
        let state = self.state();
        if state != MasterState::Created {
            return Err(MasterError::AttachAfterStartup {
                bus: self.config.bus.clone(),
                device: device.name().to_string(),
            });
        }
        debug!(bus = %self.config.bus, device = %device.name(), address = device.address(),
            "attaching device");
        self.devices
            .lock()
            .expect("master device lock poisoned")
            .push(device);
        Ok(())
    }

    /// Created -> Started.
    ///
    /// Opens the link, runs every attached device's service-level setup,
    /// then blocks until the bus is communication-ready. The wait is
    /// bounded by the configured state-change timeout and observes `abort`.
    ///
    /// # Errors
    /// A failure here is fatal to this master's activation: the state
    /// stays Created and `activate` will refuse to run.
    pub fn startup(&self, abort: &AtomicBool) -> Result<(), MasterError> {
        self.expect_state(MasterState::Created, MasterState::Started, "startup")?;
        info!(bus = %self.config.bus, "starting up master");

        self.link
            .lock()
            .expect("master link lock poisoned")
            .open()
            .map_err(|e| MasterError::Link {
                bus: self.config.bus.clone(),
                source: e,
            })?;

        {
            let devices = self.devices.lock().expect("master device lock poisoned");
            for device in devices.iter() {
                device.startup().map_err(|e| MasterError::DeviceSetup {
                    bus: self.config.bus.clone(),
                    source: e,
                })?;
            }
        }

        self.link
            .lock()
            .expect("master link lock poisoned")
            .wait_for_ready(self.config.state_change_timeout(), abort)
            .map_err(|e| match e {
                LinkError::Aborted { .. } => MasterError::StartupAborted {
                    bus: self.config.bus.clone(),
                },
                other => MasterError::Link {
                    bus: self.config.bus.clone(),
                    source: other,
                },
            })?;

        *self.state.lock().expect("master state lock poisoned") = MasterState::Started;
        info!(bus = %self.config.bus, "master started, bus communication-ready");
        Ok(())
    }

    /// Started -> Active. Enables cyclic exchange and arms the pacing
    /// clock. From here on the slave-side watchdogs expect `update` to be
    /// called promptly at the configured period.
    pub fn activate(&self) -> Result<(), MasterError> {
        self.expect_state(MasterState::Started, MasterState::Active, "activate")?;

        self.link
            .lock()
            .expect("master link lock poisoned")
            .activate()
            .map_err(|e| MasterError::Link {
                bus: self.config.bus.clone(),
                source: e,
            })?;

        let clock = DeadlineClock::new(self.period).map_err(|reason| MasterError::Clock {
            bus: self.config.bus.clone(),
            reason,
        })?;
        *self.clock.lock().expect("master clock lock poisoned") = Some(clock);
        *self.stats.lock().expect("master stats lock poisoned") = UpdateStats::default();
        *self.state.lock().expect("master state lock poisoned") = MasterState::Active;
        info!(bus = %self.config.bus, period = ?self.period, "master active, cyclic exchange enabled");
        Ok(())
    }

    /// One cyclic update: link exchange, device passes, pacing.
    ///
    /// Valid in Active and PreShutdown. The call performs the pacing sleep
    /// itself, so the caller's loop can be a bare
    /// `while !abort { master.update(mode)?; }`.
    ///
    /// # Errors
    /// A failed exchange or device pass is reported after the pacing sleep
    /// so a caller that chooses to keep looping stays on cadence.
    pub fn update(&self, mode: UpdateMode) -> Result<(), MasterError> {
        {
            let state = self.state();
            match state {
                MasterState::Active | MasterState::PreShutdown => {}
                MasterState::Shutdown => {
                    return Err(MasterError::UsedAfterShutdown {
                        bus: self.config.bus.clone(),
                        operation: "update",
                    });
                }
                _ => {
                    return Err(MasterError::NotCyclic {
                        bus: self.config.bus.clone(),
                        state,
                    });
                }
            }
        }

        let cycle = self.enter_cycle();

        // Link exchange; on failure the device pass is skipped for this
        // cycle but pacing still happens below.
        let exchange_result = {
            let mut link = self.link.lock().expect("master link lock poisoned");
            let result = link.exchange();
            if result.is_ok()
                && self.config.bus_diagnosis
                && cycle % DIAG_SAMPLE_CYCLES == 0
            {
                let counters = link.error_counters();
                if self.config.log_error_counters {
                    info!(bus = %self.config.bus,
                        rx_errors = counters.rx_errors,
                        tx_errors = counters.tx_errors,
                        lost_frames = counters.lost_frames,
                        "bus error counters");
                }
            }
            result
        };

        let mut first_device_error = None;
        if exchange_result.is_ok() {
            let ctx = CycleContext {
                cycle,
                period: self.period,
            };
            let devices = self.devices.lock().expect("master device lock poisoned");
            for device in devices.iter() {
                if let Err(e) = device.update_cycle(ctx) {
                    warn!(bus = %self.config.bus, error = %e, "device fault in cyclic pass");
                    if first_device_error.is_none() {
                        first_device_error = Some(e);
                    }
                }
            }
        }

        let reanchored = {
            let mut clock = self.clock.lock().expect("master clock lock poisoned");
            match clock.as_mut() {
                Some(clock) => clock.pace(mode),
                None => false,
            }
        };

        {
            let mut stats = self.stats.lock().expect("master stats lock poisoned");
            if reanchored {
                stats.grid_reanchors += 1;
                warn!(bus = %self.config.bus, "cyclic rate grid re-anchored after stall");
            }
            if exchange_result.is_err() {
                stats.exchange_errors += 1;
            }
            if first_device_error.is_some() {
                stats.device_errors += 1;
            }
        }

        if let Err(e) = exchange_result {
            return Err(MasterError::Link {
                bus: self.config.bus.clone(),
                source: e,
            });
        }
        if let Some(e) = first_device_error {
            return Err(MasterError::DeviceCycle {
                bus: self.config.bus.clone(),
                source: e,
            });
        }
        Ok(())
    }

    /// Active -> PreShutdown.
    ///
    /// Signals every device to begin its safe-stop sequence, then blocks
    /// until all devices report quiescence. Cyclic updates MUST keep
    /// running while this waits; they are what drives the devices to
    /// quiescence. The wait is bounded by the configured state-change
    /// timeout; on timeout a warning names the stragglers and the
    /// transition completes anyway so teardown can proceed.
    pub fn pre_shutdown(&self) -> Result<(), MasterError> {
        self.expect_state(MasterState::Active, MasterState::PreShutdown, "pre_shutdown")?;
        *self.state.lock().expect("master state lock poisoned") = MasterState::PreShutdown;

        {
            let devices = self.devices.lock().expect("master device lock poisoned");
            for device in devices.iter() {
                device.begin_safe_stop();
            }
        }
        info!(bus = %self.config.bus, "pre-shutdown: safe stop signalled, waiting for quiescence");

        let deadline = Instant::now() + self.config.state_change_timeout();
        loop {
            let pending: Vec<String> = {
                let devices = self.devices.lock().expect("master device lock poisoned");
                devices
                    .iter()
                    .filter(|d| !d.is_quiescent())
                    .map(|d| d.name().to_string())
                    .collect()
            };
            if pending.is_empty() {
                info!(bus = %self.config.bus, "pre-shutdown complete, all devices quiescent");
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(bus = %self.config.bus, devices = ?pending,
                    "quiescence wait timed out, proceeding with shutdown");
                return Ok(());
            }
            std::thread::sleep(QUIESCE_POLL_INTERVAL);
        }
    }

    /// Terminal transition: halt all communication.
    ///
    /// Legal from Created, Started and PreShutdown. Rejected while Active:
    /// the cyclic loop must have been stopped first (via `pre_shutdown`
    /// plus joining the loop thread).
    pub fn shutdown(&self) -> Result<(), MasterError> {
        {
            let state = self.state();
            match state {
                MasterState::Shutdown => {
                    return Err(MasterError::UsedAfterShutdown {
                        bus: self.config.bus.clone(),
                        operation: "shutdown",
                    });
                }
                MasterState::Active => {
                    return Err(MasterError::ShutdownWhileActive {
                        bus: self.config.bus.clone(),
                    });
                }
                MasterState::Created | MasterState::Started | MasterState::PreShutdown => {}
            }
        }

        self.link
            .lock()
            .expect("master link lock poisoned")
            .close();
        *self.state.lock().expect("master state lock poisoned") = MasterState::Shutdown;

        let stats = self.stats();
        info!(bus = %self.config.bus, cycles = stats.cycles, late = stats.late_cycles,
            "master shut down");
        Ok(())
    }

    /// Record update entry, run rate supervision, return the cycle number.
    fn enter_cycle(&self) -> u64 {
        let now = Instant::now();
        let mut stats = self.stats.lock().expect("master stats lock poisoned");
        if let Some(prev) = stats.last_entry {
            let gap = now - prev;
            if gap > stats.max_gap {
                stats.max_gap = gap;
            }
            if gap > self.period * OVERDUE_NUM / OVERDUE_DEN {
                stats.late_cycles += 1;
                stats.consecutive_late += 1;
                if stats.consecutive_late >= self.config.update_rate_warn_threshold {
                    warn!(bus = %self.config.bus, gap = ?gap, target = ?self.period,
                        "cyclic update rate too low");
                    stats.consecutive_late = 0;
                }
            } else {
                stats.consecutive_late = 0;
            }
        }
        stats.last_entry = Some(now);
        stats.cycles += 1;
        stats.cycles
    }

    fn expect_state(
        &self,
        expected: MasterState,
        to: MasterState,
        operation: &'static str,
    ) -> Result<(), MasterError> {
        let state = self.state();
        if state == MasterState::Shutdown {
            return Err(MasterError::UsedAfterShutdown {
                bus: self.config.bus.clone(),
                operation,
            });
        }
        if state != expected {
            return Err(MasterError::InvalidTransition {
                bus: self.config.bus.clone(),
                from: state,
                to,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Master {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Master")
            .field("bus", &self.config.bus)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
